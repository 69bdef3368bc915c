use std::io;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::clock::Pacer;
use crate::cpu::Cpu;

/// Commands a running CPU worker services between steps.
///
/// Each variant carries its own response channel, so a caller cannot
/// pair a command with the wrong response type.
pub enum Command {
    /// Synchronous state dump.
    DumpString(Sender<String>),
    /// Register a clock subscriber; responds with the receiving end.
    SubscribeClock(Sender<Receiver<u32>>),
    /// Register an instruction-trace subscriber.
    SubscribeTrace(Sender<Receiver<String>>),
    /// Finish the current step, release all keys, and exit.
    Stop,
}

/// Handle to the CPU's worker thread.
///
/// Dropping the handle stops the worker and joins it.
pub struct CpuWorker {
    tx: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl CpuWorker {
    /// Move `cpu` onto its own named thread and start stepping it.
    pub fn spawn(cpu: Cpu, pace: bool) -> io::Result<Self> {
        let (tx, rx) = channel();
        let handle = thread::Builder::new()
            .name("cpu".into())
            .spawn(move || run(cpu, rx, pace))?;
        Ok(CpuWorker {
            tx,
            handle: Some(handle),
        })
    }

    /// Synchronous snapshot of the CPU state, or `None` once the worker
    /// has exited.
    pub fn dump_string(&self) -> Option<String> {
        let (resp_tx, resp_rx) = channel();
        self.tx.send(Command::DumpString(resp_tx)).ok()?;
        resp_rx.recv().ok()
    }

    /// Subscribe to per-step T-cycle counts.
    pub fn subscribe_clock(&self) -> Option<Receiver<u32>> {
        let (resp_tx, resp_rx) = channel();
        self.tx.send(Command::SubscribeClock(resp_tx)).ok()?;
        resp_rx.recv().ok()
    }

    /// Subscribe to pre-execute instruction snapshots.
    pub fn subscribe_trace(&self) -> Option<Receiver<String>> {
        let (resp_tx, resp_rx) = channel();
        self.tx.send(Command::SubscribeTrace(resp_tx)).ok()?;
        resp_rx.recv().ok()
    }

    /// Stop the worker and wait for it to finish its current step.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.tx.send(Command::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("cpu worker thread panicked");
            }
        }
    }
}

impl Drop for CpuWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(mut cpu: Cpu, rx: Receiver<Command>, pace: bool) {
    log::info!("cpu worker started (pace={pace})");
    let mut pacer = pace.then(Pacer::new);

    loop {
        // Drain queued commands between steps.
        loop {
            match rx.try_recv() {
                Ok(Command::DumpString(resp)) => {
                    let _ = resp.send(cpu.snapshot());
                }
                Ok(Command::SubscribeClock(resp)) => {
                    let _ = resp.send(cpu.subscribe_clock());
                }
                Ok(Command::SubscribeTrace(resp)) => {
                    let _ = resp.send(cpu.subscribe_trace());
                }
                Ok(Command::Stop) | Err(TryRecvError::Disconnected) => {
                    cpu.release_keys();
                    log::info!("cpu worker stopped");
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        let t_cycles = cpu.step();
        if let Some(pacer) = pacer.as_mut() {
            pacer.pace(t_cycles);
        }
    }
}
