// MMC2 (mapper 9) - CHR banks selected by pattern-read latches
//
// Each 4 KiB CHR window has a latch that flips between two bank registers
// ("FD" and "FE") when the PPU fetches specific tile addresses: $0FD8 and
// $0FE8 for the low window, $1FD8-$1FDF and $1FE8-$1FEF for the high one.
// The running program places the trigger tiles in its nametables, so bank
// switches happen exactly where the raster reaches them. Punch-Out!! is
// the one famous user.
//
// PRG is a single switchable 8 KiB bank at $8000 with the top three banks
// fixed. Mirroring is program-selected through $F000-$FFFF. Boards are
// exactly 128 KiB PRG / 128 KiB CHR.

use super::{
    check_state, ChrLatches, Mapper, MapperState, Nametables, RestoreError, RomShape, RomWindow,
};
use crate::cartridge::{MapperKind, Mirroring, Rom, RomError};
use crate::frontend::Frontend;

/// 8 KiB PRG window size.
const PRG_WINDOW: usize = 0x2000;

/// 4 KiB CHR window size.
const CHR_WINDOW: usize = 0x1000;

pub struct Mmc2 {
    rom: Rom,

    /// Byte offsets of the four 8 KiB PRG windows; only the first switches.
    prg_base: [usize; 4],

    // Bank registers (4 KiB units) per latch state
    latch0_fd: usize,
    latch0_fe: usize,
    latch1_fd: usize,
    latch1_fe: usize,
    latch0_is_fd: bool,
    latch1_is_fd: bool,

    /// Derived byte offsets of the two CHR windows.
    chr_base: [usize; 2],

    nt: Nametables,

    /// Set when a pattern read flipped a latch; drained by the tracer.
    changed: bool,
}

impl Mmc2 {
    pub fn new(rom: Rom) -> Result<Mmc2, RomError> {
        if rom.prg_count != 8
            || rom.chr_count != 16
            || (rom.mirroring != Mirroring::Horizontal && rom.mirroring != Mirroring::Vertical)
        {
            return Err(RomError::BadRom("unsupported MMC2 configuration".into()));
        }
        let nt = Nametables::new(Mirroring::Vertical);
        let banks8 = rom.prg_count * 2;
        let mut mmc2 = Mmc2 {
            rom,
            prg_base: [
                0,
                (banks8 - 3) * PRG_WINDOW,
                (banks8 - 2) * PRG_WINDOW,
                (banks8 - 1) * PRG_WINDOW,
            ],
            latch0_fd: 0,
            latch0_fe: 0,
            latch1_fd: 0,
            latch1_fe: 0,
            latch0_is_fd: false,
            latch1_is_fd: false,
            chr_base: [0, 0],
            nt,
            changed: false,
        };
        mmc2.update_chr();
        Ok(mmc2)
    }

    fn chr_banks4(&self) -> usize {
        self.rom.chr_count * 2
    }

    fn update_chr(&mut self) {
        self.chr_base[0] = if self.latch0_is_fd {
            self.latch0_fd
        } else {
            self.latch0_fe
        } * CHR_WINDOW;
        self.chr_base[1] = if self.latch1_is_fd {
            self.latch1_fd
        } else {
            self.latch1_fe
        } * CHR_WINDOW;
    }

    fn select_chr(
        &mut self,
        data: u8,
        fe: &mut dyn Frontend,
        set: fn(&mut Mmc2, usize),
    ) {
        let bank = (data & 0x1F) as usize;
        if bank >= self.chr_banks4() {
            fe.warning(format_args!("MMC2 CHR bank {} out of range", bank));
            return;
        }
        set(self, bank);
        self.update_chr();
    }
}

impl Mapper for Mmc2 {
    fn kind(&self) -> MapperKind {
        MapperKind::Mmc2
    }

    fn reset(&mut self) {
        let banks8 = self.rom.prg_count * 2;
        self.prg_base = [
            0,
            (banks8 - 3) * PRG_WINDOW,
            (banks8 - 2) * PRG_WINDOW,
            (banks8 - 1) * PRG_WINDOW,
        ];
        self.latch0_fd = 0;
        self.latch0_fe = 0;
        self.latch0_is_fd = false;
        self.latch1_fd = 0;
        self.latch1_fe = 0;
        self.latch1_is_fd = false;
        self.update_chr();
        self.nt.set_mirroring(Mirroring::Vertical);
    }

    fn read_prg(&self, addr: u16) -> u8 {
        self.rom.prg[self.prg_base[(addr >> 13) as usize] + (addr as usize & 0x1FFF)]
    }

    fn write_prg(&mut self, addr: u16, data: u8, fe: &mut dyn Frontend) -> bool {
        match addr {
            // $8000-$9FFF: no register lives here
            0x0000..=0x1FFF => false,

            // $A000-$AFFF: PRG bank select (8 KiB units)
            0x2000..=0x2FFF => {
                let bank = (data & 0xF) as usize;
                if bank >= self.rom.prg_count * 2 {
                    fe.warning(format_args!("MMC2 PRG bank {} out of range", bank));
                } else {
                    self.prg_base[0] = bank * PRG_WINDOW;
                }
                true
            }

            // $B000-$BFFF: CHR FD/0000 bank
            0x3000..=0x3FFF => {
                self.select_chr(data, fe, |m, b| m.latch0_fd = b);
                true
            }

            // $C000-$CFFF: CHR FE/0000 bank
            0x4000..=0x4FFF => {
                self.select_chr(data, fe, |m, b| m.latch0_fe = b);
                true
            }

            // $D000-$DFFF: CHR FD/1000 bank
            0x5000..=0x5FFF => {
                self.select_chr(data, fe, |m, b| m.latch1_fd = b);
                true
            }

            // $E000-$EFFF: CHR FE/1000 bank
            0x6000..=0x6FFF => {
                self.select_chr(data, fe, |m, b| m.latch1_fe = b);
                true
            }

            // $F000-$FFFF: mirroring
            _ => {
                self.nt.set_mirroring(if data & 0x1 != 0 {
                    Mirroring::Horizontal
                } else {
                    Mirroring::Vertical
                });
                true
            }
        }
    }

    fn read_vram(&mut self, addr: u16) -> u8 {
        if addr < 0x2000 {
            let data =
                self.rom.chr[self.chr_base[(addr >> 12) as usize] + (addr as usize & 0xFFF)];
            // The latch triggers sit in the last tile rows; the cheap
            // pre-filter matches the decoded address lines.
            if addr & 0x0FC0 == 0x0FC0 {
                if addr == 0x0FD8 {
                    self.latch0_is_fd = true;
                    self.update_chr();
                    self.changed = true;
                } else if addr == 0x0FE8 {
                    self.latch0_is_fd = false;
                    self.update_chr();
                    self.changed = true;
                } else if (0x1FD8..=0x1FDF).contains(&addr) {
                    self.latch1_is_fd = true;
                    self.update_chr();
                    self.changed = true;
                } else if (0x1FE8..=0x1FEF).contains(&addr) {
                    self.latch1_is_fd = false;
                    self.update_chr();
                    self.changed = true;
                }
            }
            data
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
        RomWindow {
            p0: self.prg_base[0] / PRG_WINDOW,
            p1: self.prg_base[1] / PRG_WINDOW,
            p2: self.prg_base[2] / PRG_WINDOW,
            p3: self.prg_base[3] / PRG_WINDOW,
        }
    }

    fn chr_latches(&self) -> ChrLatches {
        ChrLatches {
            latch0_fd: self.latch0_is_fd,
            latch1_fd: self.latch1_is_fd,
        }
    }

    fn set_chr_latches(&mut self, latches: ChrLatches) {
        self.latch0_is_fd = latches.latch0_fd;
        self.latch1_is_fd = latches.latch1_fd;
        self.update_chr();
    }

    fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    fn snapshot(&self) -> MapperState {
        MapperState::Mmc2 {
            shape: RomShape::of(&self.rom),
            prg_base: self.prg_base,
            latch0_fd: self.latch0_fd,
            latch0_fe: self.latch0_fe,
            latch1_fd: self.latch1_fd,
            latch1_fe: self.latch1_fe,
            latch0_is_fd: self.latch0_is_fd,
            latch1_is_fd: self.latch1_is_fd,
            nt: self.nt.snapshot(),
        }
    }

    fn restore(&mut self, state: MapperState) -> Result<(), RestoreError> {
        let MapperState::Mmc2 {
            shape,
            prg_base,
            latch0_fd,
            latch0_fe,
            latch1_fd,
            latch1_fe,
            latch0_is_fd,
            latch1_is_fd,
            nt,
        } = state
        else {
            return Err(RestoreError("snapshot is for another mapper".into()));
        };
        shape.check(&self.rom)?;
        for base in prg_base {
            check_state!(
                base % PRG_WINDOW == 0 && base + PRG_WINDOW <= self.rom.prg.len(),
                "PRG bank offset {:#x} out of range",
                base
            );
        }
        for bank in [latch0_fd, latch0_fe, latch1_fd, latch1_fe] {
            check_state!(bank < self.chr_banks4(), "CHR bank {} out of range", bank);
        }
        self.nt.restore(nt)?;
        self.prg_base = prg_base;
        self.latch0_fd = latch0_fd;
        self.latch0_fe = latch0_fe;
        self.latch1_fd = latch1_fd;
        self.latch1_fe = latch1_fe;
        self.latch0_is_fd = latch0_is_fd;
        self.latch1_is_fd = latch1_is_fd;
        self.update_chr();
        Ok(())
    }
}
