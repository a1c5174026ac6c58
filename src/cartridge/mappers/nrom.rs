// NROM (mapper 0) - no banking at all
//
// 16 KiB PRG roms are mirrored twice into the $8000-$FFFF window, 32 KiB
// roms fill it. CHR is a single bank, or CHR-RAM when the cartridge has
// none. Writes to rom space cannot switch anything; a write whose value
// differs from the byte already on the bus is reported as a bus conflict.

use super::{
    check_state, ChrLatches, Mapper, MapperState, Nametables, RestoreError, RomShape, RomWindow,
    CHR_RAM_SIZE,
};
use crate::cartridge::{MapperKind, Mirroring, Rom, RomError};
use crate::frontend::Frontend;

pub struct Nrom {
    rom: Rom,
    /// $3FFF for one PRG bank (mirrored), $7FFF for two.
    prg_mask: usize,
    chr_ram: Option<Vec<u8>>,
    nt: Nametables,
}

impl Nrom {
    pub fn new(rom: Rom) -> Result<Nrom, RomError> {
        if rom.prg_count < 1
            || rom.prg_count > 2
            || rom.chr_count > 1
            || (rom.mirroring != Mirroring::Horizontal && rom.mirroring != Mirroring::Vertical)
        {
            return Err(RomError::BadRom("unsupported NROM configuration".into()));
        }
        let prg_mask = if rom.prg_count == 1 { 0x3FFF } else { 0x7FFF };
        let chr_ram = (rom.chr_count == 0).then(|| vec![0u8; CHR_RAM_SIZE]);
        let nt = Nametables::new(rom.mirroring);
        Ok(Nrom {
            rom,
            prg_mask,
            chr_ram,
            nt,
        })
    }
}

impl Mapper for Nrom {
    fn kind(&self) -> MapperKind {
        MapperKind::Nrom
    }

    fn reset(&mut self) {}

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
        false
    }

    fn read_vram(&mut self, addr: u16) -> u8 {
        if addr < 0x2000 {
            match &self.chr_ram {
                Some(ram) => ram[addr as usize],
                None => self.rom.chr[addr as usize],
            }
        } else {
            self.nt.read(addr)
        }
    }

    fn write_vram(&mut self, addr: u16, data: u8) {
        if addr < 0x2000 {
            if let Some(ram) = &mut self.chr_ram {
                ram[addr as usize] = data;
            }
        } else {
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

    fn chr_latches(&self) -> ChrLatches {
        ChrLatches::default()
    }

    fn snapshot(&self) -> MapperState {
        MapperState::Nrom {
            shape: RomShape::of(&self.rom),
            chr_ram: self.chr_ram.clone(),
            nt: self.nt.snapshot(),
        }
    }

    fn restore(&mut self, state: MapperState) -> Result<(), RestoreError> {
        let MapperState::Nrom {
            shape,
            chr_ram,
            nt,
        } = state
        else {
            return Err(RestoreError("snapshot is for another mapper".into()));
        };
        shape.check(&self.rom)?;
        check_state!(
            chr_ram.is_some() == self.chr_ram.is_some(),
            "CHR-RAM presence mismatch"
        );
        if let Some(ram) = &chr_ram {
            check_state!(ram.len() == CHR_RAM_SIZE, "bad CHR-RAM size");
        }
        self.nt.restore(nt)?;
        self.chr_ram = chr_ram;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::test_rom;
    use crate::frontend::NullFrontend;

    #[test]
    fn test_single_bank_is_mirrored() {
        let mut rom = test_rom(MapperKind::Nrom, 1, 1);
        rom.prg[0x0123] = 0x42;
        let nrom = Nrom::new(rom).unwrap();
        assert_eq!(nrom.read_prg(0x0123), 0x42);
        assert_eq!(nrom.read_prg(0x4123), 0x42, "upper window mirrors the bank");
    }

    #[test]
    fn test_double_bank_is_linear() {
        let mut rom = test_rom(MapperKind::Nrom, 2, 1);
        rom.prg[0x4000] = 0x55;
        let nrom = Nrom::new(rom).unwrap();
        assert_eq!(nrom.read_prg(0x0000), 0x00);
        assert_eq!(nrom.read_prg(0x4000), 0x55);
    }

    #[test]
    fn test_bus_conflict_warns() {
        let rom = test_rom(MapperKind::Nrom, 1, 1);
        let mut nrom = Nrom::new(rom).unwrap();
        let mut fe = NullFrontend::new();
        nrom.write_prg(0x0000, 0x00, &mut fe); // matches rom byte, no warning
        assert_eq!(fe.warnings, 0);
        nrom.write_prg(0x0000, 0x12, &mut fe);
        assert_eq!(fe.warnings, 1);
    }

    #[test]
    fn test_chr_ram_is_writable_only_without_chr() {
        let mut with_chr = Nrom::new(test_rom(MapperKind::Nrom, 1, 1)).unwrap();
        with_chr.write_vram(0x0100, 0x99);
        assert_eq!(with_chr.read_vram(0x0100), 0x00, "CHR-ROM ignores writes");

        let mut with_ram = Nrom::new(test_rom(MapperKind::Nrom, 1, 0)).unwrap();
        with_ram.write_vram(0x0100, 0x99);
        assert_eq!(with_ram.read_vram(0x0100), 0x99);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(Nrom::new(test_rom(MapperKind::Nrom, 3, 1)).is_err());
        assert!(Nrom::new(test_rom(MapperKind::Nrom, 1, 2)).is_err());
        let mut rom = test_rom(MapperKind::Nrom, 1, 1);
        rom.mirroring = Mirroring::FourScreen;
        assert!(Nrom::new(rom).is_err());
    }
}
