use std::io;
use std::sync::Arc;

use typed_builder::TypedBuilder;

use crate::cpu::Cpu;
use crate::mmu::Mmu;
use crate::worker::CpuWorker;


/// Assembly options for a [`Machine`].
#[derive(TypedBuilder)]
pub struct MachineConfig {
    /// Cartridge ROM image, mapped linearly from 0x0000.
    pub rom: Vec<u8>,
    /// Optional 256-byte boot ROM overlaid on 0x0000-0x00FF until the
    /// first time PC reaches 0x0100.
    #[builder(default, setter(strip_option))]
    pub boot_rom: Option<[u8; 0x100]>,
    /// Gate execution to the real machine rate. Disable for headless
    /// runs and tests.
    #[builder(default = true)]
    pub pace: bool,
}

/// The assembled handheld: shared MMU plus the CPU on its worker thread.
///
/// Other bus masters (GPU, keypad, DMA) attach through [`Machine::bus`],
/// which hands them the shared MMU; each master brings its own key set.
pub struct Machine {
    mmu: Arc<Mmu>,
    cpu: CpuWorker,
}

impl Machine {
    /// Build the MMU, attach the CPU, and start executing.
    pub fn power_on(config: MachineConfig) -> io::Result<Self> {
        let mmu = Arc::new(Mmu::new(&config.rom));
        let cpu = Cpu::new(Arc::clone(&mmu), config.boot_rom);
        let cpu = CpuWorker::spawn(cpu, config.pace)?;
        Ok(Machine { mmu, cpu })
    }

    /// The CPU worker's command surface.
    pub fn cpu(&self) -> &CpuWorker {
        &self.cpu
    }

    /// Shared bus for external bus masters.
    pub fn bus(&self) -> Arc<Mmu> {
        Arc::clone(&self.mmu)
    }

    /// Stop the CPU worker and tear the machine down.
    pub fn shut_down(self) {
        self.cpu.stop();
    }
}
