// NES Emulator Core Library
// Cycle-timed simulation of the NES: 6502 CPU, PPU, APU, cartridge mappers
// and the bus that ties them together.

// Public modules
pub mod apu;
pub mod audio;
pub mod bus;
pub mod cartridge;
pub mod cpu;
pub mod frontend;
pub mod input;
pub mod nes;
pub mod ppu;

// Re-export main types for convenience
pub use apu::{Apu, AUDIO_BUFFER_SIZE};
pub use audio::AudioRing;
pub use bus::{Bus, MemAccess};
pub use cartridge::{MapperKind, Mirroring, Rom, RomError, RomWindow, TvMode};
pub use cpu::{AddressingMode, Cpu, Instruction, Mnemonic, Operand};
pub use frontend::{Frontend, Signals};
pub use input::{Joypads, PadButton, Player};
pub use nes::{EmulatorConfig, Nes, SaveStateError, StepResult};
pub use ppu::{Ppu, FRAME_HEIGHT, FRAME_PIXELS, FRAME_WIDTH};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::NullFrontend;

    #[test]
    fn test_library_components() {
        // A minimal NROM cartridge is enough to bring the whole machine up
        let rom = cartridge::test_rom(MapperKind::Nrom, 1, 1);
        let mut fe = NullFrontend::new();
        let nes = Nes::new(rom, &mut fe).expect("NROM cartridge should be accepted");
        let _ = nes;
    }
}
