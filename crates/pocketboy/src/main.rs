use std::path::PathBuf;

use clap::Parser;
use pocketboy::RunOptions;

/// DMG handheld emulator core runner.
#[derive(Parser, Debug)]
#[command(name = "pocketboy")]
#[command(about = "Run a ROM on the pocketboy DMG core", long_about = None)]
struct Args {
    /// Path to the ROM image (up to 32 KiB, mapped linearly)
    rom: PathBuf,

    /// Optional 256-byte boot ROM overlay
    #[arg(long)]
    boot_rom: Option<PathBuf>,

    /// Stop after roughly this many T-cycles (runs until killed if omitted)
    #[arg(long)]
    cycles: Option<u64>,

    /// Print every executed instruction
    #[arg(long)]
    trace: bool,

    /// Run unthrottled instead of pacing to the real machine rate
    #[arg(long)]
    no_pace: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    pocketboy::run(RunOptions {
        rom_path: args.rom,
        boot_rom_path: args.boot_rom,
        cycle_limit: args.cycles,
        trace: args.trace,
        no_pace: args.no_pace,
    })
}
