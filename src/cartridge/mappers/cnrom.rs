// CNROM (mapper 3) - 8 KiB CHR bank switching over fixed PRG
//
// PRG behaves exactly like NROM. A write to rom space selects one of up to
// four 8 KiB CHR banks through a 2-bit register; like the other discrete
// boards it suffers bus conflicts. An out-of-range bank select is warned
// about and ignored.

use super::{check_state, Mapper, MapperState, Nametables, RestoreError, RomShape, RomWindow};
use crate::cartridge::{MapperKind, Mirroring, Rom, RomError, CHR_BANK_SIZE};
use crate::frontend::Frontend;

pub struct Cnrom {
    rom: Rom,
    prg_mask: usize,
    /// Byte offset of the selected 8 KiB CHR bank.
    chr_base: usize,
    nt: Nametables,
}

impl Cnrom {
    pub fn new(rom: Rom) -> Result<Cnrom, RomError> {
        if rom.prg_count < 1
            || rom.prg_count > 2
            || rom.chr_count < 1
            || rom.chr_count > 4
            || (rom.mirroring != Mirroring::Horizontal && rom.mirroring != Mirroring::Vertical)
        {
            return Err(RomError::BadRom("unsupported CNROM configuration".into()));
        }
        let prg_mask = if rom.prg_count == 1 { 0x3FFF } else { 0x7FFF };
        let nt = Nametables::new(rom.mirroring);
        Ok(Cnrom {
            rom,
            prg_mask,
            chr_base: 0,
            nt,
        })
    }
}

impl Mapper for Cnrom {
    fn kind(&self) -> MapperKind {
        MapperKind::Cnrom
    }

    fn reset(&mut self) {
        self.chr_base = 0;
    }

    fn read_prg(&self, addr: u16) -> u8 {
        self.rom.prg[addr as usize & self.prg_mask]
    }

    fn write_prg(&mut self, addr: u16, data: u8, fe: &mut dyn Frontend) -> bool {
        if self.read_prg(addr) != data {
            fe.warning(format_args!(
                "bus conflict at ${:04X}",
                addr.wrapping_add(0x8000)
            ));
        }
        let bank = (data & 0x3) as usize;
        if bank >= self.rom.chr_count {
            fe.warning(format_args!("CNROM CHR bank {} out of range", bank));
        } else {
            self.chr_base = bank * CHR_BANK_SIZE;
        }
        true
    }

    fn read_vram(&mut self, addr: u16) -> u8 {
        if addr < 0x2000 {
            self.rom.chr[self.chr_base + addr as usize]
        } else {
            self.nt.read(addr)
        }
    }

    fn write_vram(&mut self, addr: u16, data: u8) {
        if addr >= 0x2000 {
            self.nt.write(addr, data);
        }
    }

    fn rom_window(&self) -> RomWindow {
        if self.rom.prg_count == 1 {
            RomWindow {
                p0: 0,
                p1: 1,
                p2: 0,
                p3: 1,
            }
        } else {
            RomWindow {
                p0: 0,
                p1: 1,
                p2: 2,
                p3: 3,
            }
        }
    }

    fn snapshot(&self) -> MapperState {
        MapperState::Cnrom {
            shape: RomShape::of(&self.rom),
            chr_base: self.chr_base,
            nt: self.nt.snapshot(),
        }
    }

    fn restore(&mut self, state: MapperState) -> Result<(), RestoreError> {
        let MapperState::Cnrom {
            shape,
            chr_base,
            nt,
        } = state
        else {
            return Err(RestoreError("snapshot is for another mapper".into()));
        };
        shape.check(&self.rom)?;
        check_state!(
            chr_base % CHR_BANK_SIZE == 0 && chr_base < self.rom.chr.len(),
            "CHR bank offset {:#x} out of range",
            chr_base
        );
        self.nt.restore(nt)?;
        self.chr_base = chr_base;
        Ok(())
    }
}
