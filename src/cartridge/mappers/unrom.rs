// UNROM / UxROM (mapper 2) - 16 KiB PRG bank switching
//
// $8000-$BFFF is a switchable 16 KiB bank, $C000-$FFFF is fixed to the last
// bank. A write anywhere in rom space selects the low bank; the board has
// no write decoding, so the written value also drives the data bus and a
// mismatch with the rom byte is a bus conflict. CHR is always RAM.

use super::{
    check_state, Mapper, MapperState, Nametables, RestoreError, RomShape, RomWindow, CHR_RAM_SIZE,
};
use crate::cartridge::{MapperKind, Mirroring, Rom, RomError, PRG_BANK_SIZE};
use crate::frontend::Frontend;

pub struct Unrom {
    rom: Rom,
    /// Selected 16 KiB bank at $8000.
    bank: usize,
    /// 3 bits on 128 KiB boards (UNROM), 4 bits on 256 KiB (UOROM).
    bank_mask: u8,
    chr_ram: Vec<u8>,
    nt: Nametables,
}

impl Unrom {
    pub fn new(rom: Rom) -> Result<Unrom, RomError> {
        if (rom.prg_count != 8 && rom.prg_count != 16)
            || rom.chr_count != 0
            || (rom.mirroring != Mirroring::Horizontal && rom.mirroring != Mirroring::Vertical)
        {
            return Err(RomError::BadRom("unsupported UNROM configuration".into()));
        }
        let bank_mask = if rom.prg_count == 8 { 0x7 } else { 0xF };
        let nt = Nametables::new(rom.mirroring);
        Ok(Unrom {
            rom,
            bank: 0,
            bank_mask,
            chr_ram: vec![0u8; CHR_RAM_SIZE],
            nt,
        })
    }
}

impl Mapper for Unrom {
    fn kind(&self) -> MapperKind {
        MapperKind::Unrom
    }

    fn reset(&mut self) {
        self.bank = 0;
    }

    fn read_prg(&self, addr: u16) -> u8 {
        let base = if addr < 0x4000 {
            self.bank * PRG_BANK_SIZE
        } else {
            (self.rom.prg_count - 1) * PRG_BANK_SIZE
        };
        self.rom.prg[base + (addr as usize & 0x3FFF)]
    }

    fn write_prg(&mut self, addr: u16, data: u8, fe: &mut dyn Frontend) -> bool {
        if self.read_prg(addr) != data {
            fe.warning(format_args!(
                "bus conflict at ${:04X}",
                addr.wrapping_add(0x8000)
            ));
        }
        self.bank = (data & self.bank_mask) as usize;
        true
    }

    fn read_vram(&mut self, addr: u16) -> u8 {
        if addr < 0x2000 {
            self.chr_ram[addr as usize]
        } else {
            self.nt.read(addr)
        }
    }

    fn write_vram(&mut self, addr: u16, data: u8) {
        if addr < 0x2000 {
            self.chr_ram[addr as usize] = data;
        } else {
            self.nt.write(addr, data);
        }
    }

    fn rom_window(&self) -> RomWindow {
        RomWindow {
            p0: self.bank * 2,
            p1: self.bank * 2 + 1,
            p2: (self.rom.prg_count - 1) * 2,
            p3: (self.rom.prg_count - 1) * 2 + 1,
        }
    }

    fn snapshot(&self) -> MapperState {
        MapperState::Unrom {
            shape: RomShape::of(&self.rom),
            bank: self.bank,
            chr_ram: self.chr_ram.clone(),
            nt: self.nt.snapshot(),
        }
    }

    fn restore(&mut self, state: MapperState) -> Result<(), RestoreError> {
        let MapperState::Unrom {
            shape,
            bank,
            chr_ram,
            nt,
        } = state
        else {
            return Err(RestoreError("snapshot is for another mapper".into()));
        };
        shape.check(&self.rom)?;
        check_state!(bank < self.rom.prg_count, "PRG bank {} out of range", bank);
        check_state!(chr_ram.len() == CHR_RAM_SIZE, "bad CHR-RAM size");
        self.nt.restore(nt)?;
        self.bank = bank;
        self.chr_ram = chr_ram;
        Ok(())
    }
}
