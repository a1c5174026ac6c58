// MMC3 (mapper 4) - fine-grained banking plus the scanline IRQ counter
//
// Eight registers cover six 1 KiB CHR windows (two of them paired into
// 2 KiB) and two 8 KiB PRG windows; two mode bits swap which half of each
// address space stays fixed. The even/odd register pairs at $8000-$BFFF
// select and load banks and control mirroring; $C000-$FFFF drive the IRQ
// counter.
//
// The counter decrements once per rendered scanline (the PPU calls
// `clock_scanline` at the end of its sprite-evaluation step, which is where
// the A12 rising edge lands with the standard pattern-table split) and
// asserts the IRQ line when it reaches zero with interrupts enabled.
// Writing $C001 does not zero the counter; it only flags a reload from the
// latch at the next clock. The counter also self-reloads when clocked at
// zero. MegaMan 4 is the regression test for both choices.

use super::{
    check_state, Mapper, MapperState, Nametables, RestoreError, RomShape, RomWindow, CHR_RAM_SIZE,
};
use crate::cartridge::{MapperKind, Mirroring, Rom, RomError};
use crate::frontend::Frontend;

/// 8 KiB PRG window size.
const PRG_WINDOW: usize = 0x2000;

/// 1 KiB CHR window size.
const CHR_WINDOW: usize = 0x400;

pub struct Mmc3 {
    rom: Rom,

    /// Bank registers R0-R7 (R0-R5 CHR, R6-R7 PRG).
    regs: [u8; 8],
    /// Register picked by the last bank-select write.
    sel_reg: u8,
    prg_bank_mode: u8,
    chr_bank_mode: u8,

    /// Byte offsets of the four 8 KiB PRG windows.
    prg_base: [usize; 4],
    /// Byte offsets of the eight 1 KiB CHR windows.
    chr_base: [usize; 8],

    /// Mask applied to PRG bank selects (next power of two - 1).
    prg_mask: u8,
    four_screen: bool,

    // IRQ unit
    irq_counter: u8,
    irq_latch: u8,
    irq_enabled: bool,
    irq_reload: bool,
    irq_active: bool,

    chr_ram: Option<Vec<u8>>,
    nt: Nametables,
}

impl Mmc3 {
    pub fn new(rom: Rom) -> Result<Mmc3, RomError> {
        if rom.prg_count < 1
            || rom.prg_count > 32
            || rom.chr_count > 32
            || rom.mirroring == Mirroring::Single
        {
            return Err(RomError::BadRom("unsupported MMC3 configuration".into()));
        }
        let mut prg_mask = 0u8;
        let mut banks = rom.prg_count * 2;
        while banks > 1 {
            banks >>= 1;
            prg_mask = (prg_mask << 1) | 1;
        }
        let four_screen = rom.mirroring == Mirroring::FourScreen;
        let nt = Nametables::new(if four_screen {
            Mirroring::FourScreen
        } else {
            Mirroring::Vertical
        });
        let chr_ram = (rom.chr_count == 0).then(|| vec![0u8; CHR_RAM_SIZE]);
        let mut mmc3 = Mmc3 {
            rom,
            regs: [0; 8],
            sel_reg: 0,
            prg_bank_mode: 0,
            chr_bank_mode: 0,
            prg_base: [0; 4],
            chr_base: [0; 8],
            prg_mask,
            four_screen,
            irq_counter: 0,
            irq_latch: 0,
            irq_enabled: false,
            irq_reload: false,
            irq_active: false,
            chr_ram,
            nt,
        };
        mmc3.power_on_regs();
        mmc3.update_mmap();
        Ok(mmc3)
    }

    fn prg_banks8(&self) -> usize {
        self.rom.prg_count * 2
    }

    fn chr_banks1(&self) -> usize {
        self.rom.chr_count * 8
    }

    fn power_on_regs(&mut self) {
        self.prg_bank_mode = 0;
        self.chr_bank_mode = 0;
        self.regs[6] = 0;
        self.regs[7] = 1;
        if self.rom.chr_count != 0 {
            self.regs[0] = 0;
            self.regs[1] = 2;
            self.regs[2] = 4;
            self.regs[3] = 5;
            self.regs[4] = 6;
            self.regs[5] = 7;
        }
    }

    /// Recompute the PRG windows. Returns the offending bank when a
    /// register points outside the rom, leaving the mapping untouched.
    fn update_prg_map(&mut self) -> Result<(), u8> {
        let banks = self.prg_banks8();
        for reg in [self.regs[6], self.regs[7]] {
            if reg as usize >= banks {
                return Err(reg);
            }
        }
        let r6 = self.regs[6] as usize * PRG_WINDOW;
        let r7 = self.regs[7] as usize * PRG_WINDOW;
        let fixed_lo = (banks - 2) * PRG_WINDOW;
        let fixed_hi = (banks - 1) * PRG_WINDOW;
        self.prg_base = if self.prg_bank_mode == 0 {
            [r6, r7, fixed_lo, fixed_hi]
        } else {
            [fixed_lo, r7, r6, fixed_hi]
        };
        Ok(())
    }

    /// Recompute the CHR windows; same contract as `update_prg_map`.
    fn update_chr_map(&mut self) -> Result<(), u8> {
        if self.rom.chr_count == 0 {
            return Ok(());
        }
        let banks = self.chr_banks1();
        for reg in [
            self.regs[0] | 0x01,
            self.regs[1] | 0x01,
            self.regs[2],
            self.regs[3],
            self.regs[4],
            self.regs[5],
        ] {
            if reg as usize >= banks {
                return Err(reg);
            }
        }
        let pair0_lo = (self.regs[0] & 0xFE) as usize * CHR_WINDOW;
        let pair0_hi = (self.regs[0] | 0x01) as usize * CHR_WINDOW;
        let pair1_lo = (self.regs[1] & 0xFE) as usize * CHR_WINDOW;
        let pair1_hi = (self.regs[1] | 0x01) as usize * CHR_WINDOW;
        let r2 = self.regs[2] as usize * CHR_WINDOW;
        let r3 = self.regs[3] as usize * CHR_WINDOW;
        let r4 = self.regs[4] as usize * CHR_WINDOW;
        let r5 = self.regs[5] as usize * CHR_WINDOW;
        self.chr_base = if self.chr_bank_mode == 0 {
            [pair0_lo, pair0_hi, pair1_lo, pair1_hi, r2, r3, r4, r5]
        } else {
            [r2, r3, r4, r5, pair0_lo, pair0_hi, pair1_lo, pair1_hi]
        };
        Ok(())
    }

    fn update_mmap(&mut self) -> (Result<(), u8>, Result<(), u8>) {
        (self.update_prg_map(), self.update_chr_map())
    }

    fn update_mmap_warn(&mut self, fe: &mut dyn Frontend) {
        let (prg, chr) = self.update_mmap();
        if let Err(bank) = prg {
            fe.warning(format_args!("MMC3 PRG bank {} out of range", bank));
        }
        if let Err(bank) = chr {
            fe.warning(format_args!("MMC3 CHR bank {} out of range", bank));
        }
    }
}

impl Mapper for Mmc3 {
    fn kind(&self) -> MapperKind {
        MapperKind::Mmc3
    }

    fn reset(&mut self) {
        self.power_on_regs();
        if !self.four_screen {
            self.nt.set_mirroring(Mirroring::Vertical);
        }
        let _ = self.update_mmap(); // power-on registers are always in range
        self.sel_reg = 0;
        self.irq_counter = 0;
        self.irq_latch = 0;
        self.irq_enabled = false;
        self.irq_reload = false;
        self.irq_active = false;
    }

    fn read_prg(&self, addr: u16) -> u8 {
        self.rom.prg[self.prg_base[(addr >> 13) as usize] + (addr as usize & 0x1FFF)]
    }

    fn write_prg(&mut self, addr: u16, data: u8, fe: &mut dyn Frontend) -> bool {
        match addr {
            // $8000-$9FFF: bank select / bank data
            0x0000..=0x1FFF => {
                if addr & 0x1 != 0 {
                    let reg = self.sel_reg as usize;
                    self.regs[reg] = if reg >= 6 { data & self.prg_mask } else { data };
                } else {
                    self.sel_reg = data & 0x7;
                    self.prg_bank_mode = (data >> 6) & 0x1;
                    self.chr_bank_mode = (data >> 7) & 0x1;
                }
                self.update_mmap_warn(fe);
                true
            }

            // $A000-$BFFF: mirroring / PRG-RAM protect (not implemented,
            // per the usual NesDev advice)
            0x2000..=0x3FFF => {
                if addr & 0x1 == 0 && !self.four_screen {
                    self.nt.set_mirroring(if data & 0x1 != 0 {
                        Mirroring::Horizontal
                    } else {
                        Mirroring::Vertical
                    });
                }
                true
            }

            // $C000-$DFFF: IRQ latch / IRQ reload
            0x4000..=0x5FFF => {
                if addr & 0x1 != 0 {
                    self.irq_reload = true;
                } else {
                    self.irq_latch = data;
                }
                false
            }

            // $E000-$FFFF: IRQ disable / enable
            _ => {
                if addr & 0x1 != 0 {
                    self.irq_enabled = true;
                } else {
                    self.irq_enabled = false;
                    self.irq_active = false;
                }
                false
            }
        }
    }

    fn read_vram(&mut self, addr: u16) -> u8 {
        if addr < 0x2000 {
            match &self.chr_ram {
                Some(ram) => ram[addr as usize],
                None => {
                    self.rom.chr[self.chr_base[(addr >> 10) as usize] + (addr as usize & 0x3FF)]
                }
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
        RomWindow {
            p0: self.prg_base[0] / PRG_WINDOW,
            p1: self.prg_base[1] / PRG_WINDOW,
            p2: self.prg_base[2] / PRG_WINDOW,
            p3: self.prg_base[3] / PRG_WINDOW,
        }
    }

    fn clock_scanline(&mut self) {
        if self.irq_counter != 0 {
            self.irq_counter -= 1;
        } else {
            self.irq_counter = self.irq_latch;
        }
        if self.irq_reload {
            self.irq_reload = false;
            self.irq_counter = self.irq_latch;
        }
        if self.irq_counter == 0 && self.irq_enabled {
            self.irq_active = true;
        }
    }

    fn irq_active(&self) -> bool {
        self.irq_active
    }

    fn snapshot(&self) -> MapperState {
        MapperState::Mmc3 {
            shape: RomShape::of(&self.rom),
            regs: self.regs,
            sel_reg: self.sel_reg,
            prg_bank_mode: self.prg_bank_mode,
            chr_bank_mode: self.chr_bank_mode,
            prg_base: self.prg_base,
            chr_base: self.chr_base,
            irq_counter: self.irq_counter,
            irq_latch: self.irq_latch,
            irq_enabled: self.irq_enabled,
            irq_reload: self.irq_reload,
            irq_active: self.irq_active,
            chr_ram: self.chr_ram.clone(),
            nt: self.nt.snapshot(),
        }
    }

    fn restore(&mut self, state: MapperState) -> Result<(), RestoreError> {
        let MapperState::Mmc3 {
            shape,
            regs,
            sel_reg,
            prg_bank_mode,
            chr_bank_mode,
            prg_base,
            chr_base,
            irq_counter,
            irq_latch,
            irq_enabled,
            irq_reload,
            irq_active,
            chr_ram,
            nt,
        } = state
        else {
            return Err(RestoreError("snapshot is for another mapper".into()));
        };
        shape.check(&self.rom)?;
        check_state!(sel_reg < 8, "selected register {} out of range", sel_reg);
        for base in prg_base {
            check_state!(
                base % PRG_WINDOW == 0 && base + PRG_WINDOW <= self.rom.prg.len(),
                "PRG bank offset {:#x} out of range",
                base
            );
        }
        if self.chr_ram.is_some() {
            check_state!(chr_ram.is_some(), "CHR-RAM contents missing");
            if let Some(ram) = &chr_ram {
                check_state!(ram.len() == CHR_RAM_SIZE, "bad CHR-RAM size");
            }
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
        self.nt.restore(nt)?;
        self.regs = regs;
        self.sel_reg = sel_reg;
        self.prg_bank_mode = prg_bank_mode & 0x1;
        self.chr_bank_mode = chr_bank_mode & 0x1;
        self.prg_base = prg_base;
        self.chr_base = chr_base;
        self.irq_counter = irq_counter;
        self.irq_latch = irq_latch;
        self.irq_enabled = irq_enabled;
        self.irq_reload = irq_reload;
        self.irq_active = irq_active;
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

    fn mmc3() -> Mmc3 {
        let mut rom = test_rom(MapperKind::Mmc3, 4, 2);
        for bank in 0..8 {
            rom.prg[bank * PRG_WINDOW] = 0x80 + bank as u8;
        }
        for window in 0..16 {
            rom.chr[window * CHR_WINDOW] = window as u8;
        }
        Mmc3::new(rom).unwrap()
    }

    #[test]
    fn test_power_on_layout() {
        let m = mmc3();
        assert_eq!(m.read_prg(0x0000), 0x80);
        assert_eq!(m.read_prg(0x2000), 0x81);
        assert_eq!(m.read_prg(0x4000), 0x86, "second-to-last bank fixed");
        assert_eq!(m.read_prg(0x6000), 0x87, "last bank fixed");
    }

    #[test]
    fn test_prg_mode_swaps_fixed_half() {
        let mut m = mmc3();
        let mut fe = NullFrontend::new();
        m.write_prg(0x0000, 0x46, &mut fe); // select R6, PRG mode 1
        m.write_prg(0x0001, 0x03, &mut fe); // R6 <- bank 3
        assert_eq!(m.read_prg(0x0000), 0x86, "fixed bank moved to $8000");
        assert_eq!(m.read_prg(0x4000), 0x83, "switchable bank at $C000");
    }

    #[test]
    fn test_chr_banking_modes() {
        let mut m = mmc3();
        let mut fe = NullFrontend::new();
        // R0 pair maps at $0000 in mode 0
        m.write_prg(0x0000, 0x00, &mut fe);
        m.write_prg(0x0001, 0x06, &mut fe); // R0 <- banks 6/7
        assert_eq!(m.read_vram(0x0000), 6);
        assert_eq!(m.read_vram(0x0400), 7);
        // Mode 1 moves the pairs to $1000
        m.write_prg(0x0000, 0x80, &mut fe);
        assert_eq!(m.read_vram(0x1000), 6);
        assert_eq!(m.read_vram(0x1400), 7);
    }

    #[test]
    fn test_irq_counts_scanlines() {
        let mut m = mmc3();
        let mut fe = NullFrontend::new();
        m.write_prg(0x4000, 3, &mut fe); // latch = 3
        m.write_prg(0x4001, 0, &mut fe); // reload pending
        m.write_prg(0x6001, 0, &mut fe); // enable
        m.clock_scanline(); // reload applies: counter = 3
        assert!(!m.irq_active());
        m.clock_scanline(); // 2
        m.clock_scanline(); // 1
        assert!(!m.irq_active());
        m.clock_scanline(); // 0 -> IRQ
        assert!(m.irq_active(), "IRQ asserts when the counter hits zero");
    }

    #[test]
    fn test_reload_write_does_not_zero_counter() {
        let mut m = mmc3();
        let mut fe = NullFrontend::new();
        m.write_prg(0x4000, 10, &mut fe);
        m.write_prg(0x4001, 0, &mut fe);
        m.clock_scanline(); // counter = 10
        m.write_prg(0x4001, 0, &mut fe); // reload again mid-count
        m.write_prg(0x6001, 0, &mut fe);
        m.clock_scanline(); // pending reload applies after the decrement
        assert!(!m.irq_active(), "counter was reloaded, not zeroed");
    }

    #[test]
    fn test_irq_disable_clears_line() {
        let mut m = mmc3();
        let mut fe = NullFrontend::new();
        m.write_prg(0x4000, 0, &mut fe); // latch 0: every clock fires
        m.write_prg(0x6001, 0, &mut fe);
        m.clock_scanline();
        assert!(m.irq_active());
        m.write_prg(0x6000, 0, &mut fe); // disable
        assert!(!m.irq_active());
    }
}
