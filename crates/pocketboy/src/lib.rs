use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{ensure, Context, Result};
use pocketboy_dmg::{Machine, MachineConfig};

/// Launcher options, typically parsed from the command line.
pub struct RunOptions {
    pub rom_path: PathBuf,
    pub boot_rom_path: Option<PathBuf>,
    /// Stop after roughly this many T-cycles; run until killed if absent.
    pub cycle_limit: Option<u64>,
    /// Print each instruction snapshot as it executes.
    pub trace: bool,
    /// Run unthrottled instead of at the real machine rate.
    pub no_pace: bool,
}

pub fn run(opts: RunOptions) -> Result<()> {
    let rom = std::fs::read(&opts.rom_path)
        .with_context(|| format!("failed to read ROM {}", opts.rom_path.display()))?;
    log::info!(
        "loaded ROM {} ({} bytes)",
        opts.rom_path.display(),
        rom.len()
    );

    let boot_rom = opts
        .boot_rom_path
        .as_deref()
        .map(read_boot_rom)
        .transpose()?;

    let config = MachineConfig::builder().rom(rom).pace(!opts.no_pace);
    let machine = match boot_rom {
        Some(boot) => Machine::power_on(config.boot_rom(boot).build()),
        None => Machine::power_on(config.build()),
    }
    .context("failed to power on machine")?;

    if opts.trace {
        let trace_rx = machine
            .cpu()
            .subscribe_trace()
            .context("cpu worker rejected trace subscription")?;
        thread::Builder::new()
            .name("trace".into())
            .spawn(move || {
                for snapshot in trace_rx {
                    println!("{snapshot}\n");
                }
            })
            .context("failed to spawn trace printer")?;
    }

    let clock_rx = machine
        .cpu()
        .subscribe_clock()
        .context("cpu worker rejected clock subscription")?;

    let mut total_cycles = 0u64;
    for batch in clock_rx {
        total_cycles += batch as u64;
        if let Some(limit) = opts.cycle_limit {
            if total_cycles >= limit {
                break;
            }
        }
    }

    if let Some(snapshot) = machine.cpu().dump_string() {
        log::info!("final state after {total_cycles} T-cycles:\n{snapshot}");
    }
    machine.shut_down();
    Ok(())
}

fn read_boot_rom(path: &Path) -> Result<[u8; 0x100]> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read boot ROM {}", path.display()))?;
    ensure!(
        bytes.len() == 0x100,
        "boot ROM must be exactly 256 bytes, got {}",
        bytes.len()
    );
    let mut boot = [0u8; 0x100];
    boot.copy_from_slice(&bytes);
    Ok(boot)
}
