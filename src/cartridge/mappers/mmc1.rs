// MMC1 (mapper 1) - serial-loaded banking ASIC
//
// All writes to $8000-$FFFF feed a 5-bit shift register one bit at a time.
// A write with bit 7 set aborts the sequence and forces the fix-last PRG
// mode. On the fifth bit the accumulated value latches into one of four
// registers picked by address bits 13-14:
//
//   $8000-$9FFF control   mirroring, PRG bank mode, CHR bank mode
//   $A000-$BFFF CHR bank 0
//   $C000-$DFFF CHR bank 1 (ignored in 8 KiB CHR mode)
//   $E000-$FFFF PRG bank
//
// PRG bank modes: 0/1 switch 32 KiB at $8000, 2 fixes the first bank at
// $8000, 3 fixes the last bank at $C000. CHR mode 0 switches 8 KiB at a
// time, mode 1 two independent 4 KiB banks.

use super::{
    check_state, Mapper, MapperState, Nametables, RestoreError, RomShape, RomWindow, CHR_RAM_SIZE,
};
use crate::cartridge::{MapperKind, Mirroring, Rom, RomError, PRG_BANK_SIZE};
use crate::frontend::Frontend;

/// 4 KiB CHR window size.
const CHR_WINDOW: usize = 0x1000;

pub struct Mmc1 {
    rom: Rom,

    // Serial load register
    load_reg: u8,
    write_count: u8,

    // Control state
    prg_bank_mode: u8,
    chr_bank_mode: u8,

    /// Byte offsets of the two 16 KiB PRG windows.
    prg_base: [usize; 2],
    /// Byte offsets of the two 4 KiB CHR windows.
    chr_base: [usize; 2],

    chr_ram: Option<Vec<u8>>,
    nt: Nametables,
}

impl Mmc1 {
    pub fn new(rom: Rom) -> Result<Mmc1, RomError> {
        if rom.prg_count < 1
            || rom.prg_count > 32
            || rom.chr_count > 16
            || rom.mirroring == Mirroring::FourScreen
        {
            return Err(RomError::BadRom("unsupported MMC1 configuration".into()));
        }
        let chr_ram = (rom.chr_count == 0).then(|| vec![0u8; CHR_RAM_SIZE]);
        let mut nt = Nametables::new(rom.mirroring);
        nt.set_single(0);
        let last = (rom.prg_count - 1) * PRG_BANK_SIZE;
        Ok(Mmc1 {
            rom,
            load_reg: 0,
            write_count: 0,
            prg_bank_mode: 3,
            chr_bank_mode: 0,
            prg_base: [0, last],
            chr_base: [0, CHR_WINDOW],
            chr_ram,
            nt,
        })
    }

    fn last_prg_base(&self) -> usize {
        (self.rom.prg_count - 1) * PRG_BANK_SIZE
    }

    /// Latch the completed 5-bit value into the register picked by the
    /// address of the final write.
    fn dispatch(&mut self, addr: u16, reg: u8, fe: &mut dyn Frontend) {
        match addr {
            // Control
            0x0000..=0x1FFF => {
                match reg & 0x3 {
                    0 => self.nt.set_single(0),
                    1 => self.nt.set_single(1),
                    2 => self.nt.set_mirroring(Mirroring::Vertical),
                    _ => self.nt.set_mirroring(Mirroring::Horizontal),
                }
                self.prg_bank_mode = (reg >> 2) & 0x3;
                match self.prg_bank_mode {
                    2 => self.prg_base[0] = 0,
                    3 => self.prg_base[1] = self.last_prg_base(),
                    _ => {}
                }
                self.chr_bank_mode = (reg >> 4) & 0x1;
            }

            // CHR bank 0
            0x2000..=0x3FFF => {
                let bank = (reg >> 1) as usize; // 8 KiB units
                if self.chr_ram.is_some() {
                    if self.chr_bank_mode != 0 || reg != 0 {
                        fe.warning(format_args!("MMC1 cannot switch CHR-RAM banks"));
                    }
                } else if bank >= self.rom.chr_count {
                    fe.warning(format_args!("MMC1 CHR bank {} out of range", bank));
                } else if self.chr_bank_mode == 0 {
                    self.chr_base[0] = bank * 2 * CHR_WINDOW;
                    self.chr_base[1] = bank * 2 * CHR_WINDOW + CHR_WINDOW;
                } else {
                    self.chr_base[0] = bank * 2 * CHR_WINDOW + ((reg & 1) as usize) * CHR_WINDOW;
                }
            }

            // CHR bank 1
            0x4000..=0x5FFF => {
                if self.chr_bank_mode == 0 {
                    return;
                }
                let bank = (reg >> 1) as usize;
                if self.chr_ram.is_some() {
                    if reg != 0 {
                        fe.warning(format_args!("MMC1 cannot switch CHR-RAM banks"));
                    }
                } else if bank >= self.rom.chr_count {
                    fe.warning(format_args!("MMC1 CHR bank {} out of range", bank));
                } else {
                    self.chr_base[1] = bank * 2 * CHR_WINDOW + ((reg & 1) as usize) * CHR_WINDOW;
                }
            }

            // PRG bank. Bit 4 (PRG-RAM chip enable) is ignored.
            _ => {
                let bank = (reg & 0xF) as usize;
                if bank >= self.rom.prg_count {
                    fe.warning(format_args!("MMC1 PRG bank {} out of range", bank));
                    return;
                }
                match self.prg_bank_mode {
                    0 | 1 => {
                        let low = bank & 0xE;
                        let high = low | 0x1;
                        if high >= self.rom.prg_count {
                            fe.warning(format_args!("MMC1 PRG bank {} out of range", high));
                            return;
                        }
                        self.prg_base[0] = low * PRG_BANK_SIZE;
                        self.prg_base[1] = high * PRG_BANK_SIZE;
                    }
                    2 => self.prg_base[1] = bank * PRG_BANK_SIZE,
                    _ => self.prg_base[0] = bank * PRG_BANK_SIZE,
                }
            }
        }
    }
}

impl Mapper for Mmc1 {
    fn kind(&self) -> MapperKind {
        MapperKind::Mmc1
    }

    fn reset(&mut self) {
        self.prg_base = [0, self.last_prg_base()];
        if self.chr_ram.is_none() {
            self.chr_base = [0, CHR_WINDOW];
        }
        self.load_reg = 0;
        self.write_count = 0;
        self.prg_bank_mode = 3;
        self.chr_bank_mode = 0;
        self.nt.set_single(0);
    }

    fn read_prg(&self, addr: u16) -> u8 {
        self.rom.prg[self.prg_base[(addr >> 14) as usize & 1] + (addr as usize & 0x3FFF)]
    }

    fn write_prg(&mut self, addr: u16, data: u8, fe: &mut dyn Frontend) -> bool {
        // Bit 7 resets the shift register and forces fix-last PRG mode
        if data & 0x80 != 0 {
            self.load_reg = 0;
            self.write_count = 0;
            self.nt.set_single(0);
            self.prg_bank_mode = 3;
            self.prg_base[1] = self.last_prg_base();
            self.chr_bank_mode = 0;
            return true;
        }

        if data & 0x1 != 0 {
            self.load_reg |= 0x10;
        }
        self.write_count += 1;
        if self.write_count != 5 {
            self.load_reg >>= 1;
            return false;
        }
        let reg = self.load_reg;
        self.load_reg = 0;
        self.write_count = 0;
        self.dispatch(addr, reg, fe);
        true
    }

    fn read_vram(&mut self, addr: u16) -> u8 {
        if addr < 0x2000 {
            match &self.chr_ram {
                Some(ram) => ram[addr as usize],
                None => self.rom.chr[self.chr_base[(addr >> 12) as usize] + (addr as usize & 0xFFF)],
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
        let p0 = self.prg_base[0] / 0x2000;
        let p2 = self.prg_base[1] / 0x2000;
        RomWindow {
            p0,
            p1: p0 + 1,
            p2,
            p3: p2 + 1,
        }
    }

    fn snapshot(&self) -> MapperState {
        MapperState::Mmc1 {
            shape: RomShape::of(&self.rom),
            load_reg: self.load_reg,
            write_count: self.write_count,
            prg_bank_mode: self.prg_bank_mode,
            chr_bank_mode: self.chr_bank_mode,
            prg_base: self.prg_base,
            chr_base: self.chr_base,
            chr_ram: self.chr_ram.clone(),
            nt: self.nt.snapshot(),
        }
    }

    fn restore(&mut self, state: MapperState) -> Result<(), RestoreError> {
        let MapperState::Mmc1 {
            shape,
            load_reg,
            write_count,
            prg_bank_mode,
            chr_bank_mode,
            prg_base,
            chr_base,
            chr_ram,
            nt,
        } = state
        else {
            return Err(RestoreError("snapshot is for another mapper".into()));
        };
        shape.check(&self.rom)?;
        check_state!(write_count < 5, "shift counter {} out of range", write_count);
        check_state!(load_reg & 0x1F == load_reg, "load register out of range");
        for base in prg_base {
            check_state!(
                base % PRG_BANK_SIZE == 0 && base <= self.last_prg_base(),
                "PRG bank offset {:#x} out of range",
                base
            );
        }
        if self.chr_ram.is_some() {
            check_state!(chr_ram.is_some(), "CHR-RAM contents missing");
        } else {
            check_state!(chr_ram.is_none(), "unexpected CHR-RAM contents");
            for base in chr_base {
                check_state!(
                    base % CHR_WINDOW == 0 && base + CHR_WINDOW <= self.rom.chr.len(),
                    "CHR bank offset {:#x} out of range",
                    base
                );
            }
        }
        if let Some(ram) = &chr_ram {
            check_state!(ram.len() == CHR_RAM_SIZE, "bad CHR-RAM size");
        }
        self.nt.restore(nt)?;
        self.load_reg = load_reg;
        self.write_count = write_count;
        self.prg_bank_mode = prg_bank_mode & 0x3;
        self.chr_bank_mode = chr_bank_mode & 0x1;
        self.prg_base = prg_base;
        self.chr_base = chr_base;
        if chr_ram.is_some() {
            self.chr_ram = chr_ram;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::test_rom;
    use crate::frontend::NullFrontend;

    fn mmc1() -> Mmc1 {
        let mut rom = test_rom(MapperKind::Mmc1, 8, 2);
        for bank in 0..8 {
            rom.prg[bank * PRG_BANK_SIZE] = bank as u8;
        }
        for window in 0..4 {
            rom.chr[window * CHR_WINDOW] = 0x40 + window as u8;
        }
        Mmc1::new(rom).unwrap()
    }

    fn load(m: &mut Mmc1, addr: u16, value: u8, fe: &mut NullFrontend) {
        for bit in 0..5 {
            m.write_prg(addr, (value >> bit) & 1, fe);
        }
    }

    #[test]
    fn test_power_on_layout() {
        let m = mmc1();
        assert_eq!(m.read_prg(0x0000), 0, "first bank at $8000");
        assert_eq!(m.read_prg(0x4000), 7, "last bank fixed at $C000");
    }

    #[test]
    fn test_serial_control_write() {
        let mut m = mmc1();
        let mut fe = NullFrontend::new();
        // Five writes of 1,1,1,0,0 accumulate LSB-first
        for data in [0x01, 0x01, 0x01, 0x00, 0x00] {
            m.write_prg(0x0000, data, &mut fe);
        }
        // Bits 0-1 = 3: horizontal mirroring
        m.write_vram(0x2000, 0x55);
        assert_eq!(m.read_vram(0x2400), 0x55, "horizontal mirroring selected");
        assert_eq!(m.read_vram(0x2800), 0x00);
        // Bits 2-3 = 1: 32 KiB PRG switching
        load(&mut m, 0x6000, 0x03, &mut fe); // PRG bank 3 -> pair 2/3
        assert_eq!(m.read_prg(0x0000), 2);
        assert_eq!(m.read_prg(0x4000), 3);
    }

    #[test]
    fn test_reset_bit_forces_fix_last() {
        let mut m = mmc1();
        let mut fe = NullFrontend::new();
        // Put the mapper in 32 KiB mode and move the banks around
        load(&mut m, 0x0000, 0x07, &mut fe);
        load(&mut m, 0x6000, 0x04, &mut fe);
        assert_eq!(m.read_prg(0x4000), 5);
        // Two bits into a sequence, a bit-7 write aborts it
        m.write_prg(0x0000, 0x01, &mut fe);
        m.write_prg(0x0000, 0x80, &mut fe);
        assert_eq!(m.read_prg(0x4000), 7, "fix-last mode restored");
        // The next five writes form a fresh value
        load(&mut m, 0x6000, 0x02, &mut fe);
        assert_eq!(m.read_prg(0x0000), 2, "PRG mode 3 switches the low bank");
        assert_eq!(m.read_prg(0x4000), 7);
    }

    #[test]
    fn test_chr_4k_banking() {
        let mut m = mmc1();
        let mut fe = NullFrontend::new();
        load(&mut m, 0x0000, 0x1F, &mut fe); // CHR mode 1 (4 KiB)
        load(&mut m, 0x2000, 0x03, &mut fe); // CHR0 <- 4K window 3
        load(&mut m, 0x4000, 0x01, &mut fe); // CHR1 <- 4K window 1
        assert_eq!(m.read_vram(0x0000), 0x43);
        assert_eq!(m.read_vram(0x1000), 0x41);
    }

    #[test]
    fn test_oversized_prg_bank_warns_and_ignores() {
        let mut m = mmc1();
        let mut fe = NullFrontend::new();
        load(&mut m, 0x6000, 0x0C, &mut fe); // bank 12 >= 8
        assert_eq!(fe.warnings, 1);
        assert_eq!(m.read_prg(0x0000), 0, "mapping unchanged");
    }
}
