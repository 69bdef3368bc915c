use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::thread;
use std::time::{Duration, Instant};

use crate::T_CLOCK_HZ;

/// Per-subscriber cycle accumulator.
///
/// Counts are accumulated locally and flushed with a non-blocking send,
/// so a slow or absent subscriber can never back-pressure the CPU; it
/// just receives a larger batch next time it drains the channel.
pub struct ClockAccumulator {
    acc: u32,
    tx: SyncSender<u32>,
}

impl ClockAccumulator {
    pub fn new() -> (Self, Receiver<u32>) {
        let (tx, rx) = sync_channel(1);
        (ClockAccumulator { acc: 0, tx }, rx)
    }

    pub fn add_cycles(&mut self, t_cycles: u32) {
        self.acc += t_cycles;
        if self.acc == 0 {
            return;
        }
        match self.tx.try_send(self.acc) {
            Ok(()) => self.acc = 0,
            // Subscriber hasn't drained the last batch yet; keep counting.
            Err(TrySendError::Full(_)) => {}
            // Subscriber went away; counts are discarded from here on.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Wall-clock pacer gating step execution at the machine's real rate.
///
/// Pacing is a courtesy, not a correctness property: the pacer only ever
/// sleeps when emulation runs ahead of the wall clock, and sleeps are
/// batched to roughly a millisecond so the thread is not woken at the
/// M-cycle rate.
pub struct Pacer {
    started: Instant,
    credited: u64,
}

const MIN_SLEEP: Duration = Duration::from_millis(1);

impl Pacer {
    pub fn new() -> Self {
        Pacer {
            started: Instant::now(),
            credited: 0,
        }
    }

    /// Credit executed T-cycles and sleep off any lead over real time.
    pub fn pace(&mut self, t_cycles: u32) {
        self.credited += t_cycles as u64;
        let target = Duration::from_nanos(self.credited * 1_000_000_000 / T_CLOCK_HZ as u64);
        let elapsed = self.started.elapsed();
        if target > elapsed && target - elapsed >= MIN_SLEEP {
            thread::sleep(target - elapsed);
        }
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new()
    }
}
