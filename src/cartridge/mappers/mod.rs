// Mappers module - cartridge bank switching framework
//
// Every mapper answers the same contract: translate CPU reads/writes in
// $8000-$FFFF (passed in here rebased to $0000-$7FFF) and PPU accesses in
// $0000-$2FFF onto the cartridge banks, react to the writes that
// reconfigure banking, and expose an IRQ line for the one family that has
// one (MMC3). The mapper owns the nametable RAM and its mirror routing, and
// the CHR-RAM when the cartridge has no CHR banks.
//
// The original hardware wires the PPU address bus straight into the
// cartridge, which is why CHR latches (MMC2) flip on *reads*: `read_vram`
// takes `&mut self` for that reason alone.
//
// Bank positions are byte offsets into the rom payload, never pointers, so
// snapshots serialise directly.

mod axrom;
mod cnrom;
mod mmc1;
mod mmc2;
mod mmc3;
mod nrom;
mod unrom;

use serde::{Deserialize, Serialize};

use super::{MapperKind, Mirroring, Rom, RomError};
use crate::frontend::Frontend;

pub use axrom::Axrom;
pub use cnrom::Cnrom;
pub use mmc1::Mmc1;
pub use mmc2::Mmc2;
pub use mmc3::Mmc3;
pub use nrom::Nrom;
pub use unrom::Unrom;

/// Size of the CHR-RAM carried by cartridges without CHR banks.
pub const CHR_RAM_SIZE: usize = 0x2000;

/// The four 8 KiB rom pages currently visible at $8000/$A000/$C000/$E000.
///
/// Used by tracers to relate CPU addresses back to rom offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomWindow {
    pub p0: usize,
    pub p1: usize,
    pub p2: usize,
    pub p3: usize,
}

/// MMC2 CHR latch state, snapshotted around the sprite-zero probe so probe
/// fetches cannot flip a latch behind the renderer's back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChrLatches {
    pub latch0_fd: bool,
    pub latch1_fd: bool,
}

/// A snapshot that does not fit the inserted cartridge.
#[derive(Debug)]
pub struct RestoreError(pub String);

impl std::fmt::Display for RestoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "state does not match inserted cartridge: {}", self.0)
    }
}

impl std::error::Error for RestoreError {}

macro_rules! check_state {
    ($cond:expr, $($msg:tt)*) => {
        if !($cond) {
            return Err(RestoreError(format!($($msg)*)));
        }
    };
}
pub(crate) use check_state;

/// Common mapper contract.
pub trait Mapper {
    /// Mapper family, used by the PPU for its MMC2/MMC3 couplings.
    fn kind(&self) -> MapperKind;

    /// Re-apply the power-on bank layout. Called from CPU reset; the bus
    /// has already forced the PPU to catch up its clock debt.
    fn reset(&mut self);

    /// CPU read. `addr` is rebased: 0 corresponds to $8000.
    fn read_prg(&self, addr: u16) -> u8;

    /// CPU write, usually a bank reconfiguration. Returns true when the
    /// visible mapping may have changed (drives the `mapper_changed` trace
    /// hook). The bus synchronises the PPU before calling this.
    fn write_prg(&mut self, addr: u16, data: u8, fe: &mut dyn Frontend) -> bool;

    /// PPU read, $0000-$2FFF.
    fn read_vram(&mut self, addr: u16) -> u8;

    /// PPU write, $0000-$2FFF.
    fn write_vram(&mut self, addr: u16, data: u8);

    /// Current rom pages mapped at $8000/$A000/$C000/$E000.
    fn rom_window(&self) -> RomWindow;

    /// Scanline tick for the MMC3 IRQ counter. Everyone else ignores it.
    fn clock_scanline(&mut self) {}

    /// State of the mapper IRQ line.
    fn irq_active(&self) -> bool {
        false
    }

    /// CHR latch snapshot (MMC2).
    fn chr_latches(&self) -> ChrLatches {
        ChrLatches::default()
    }

    /// CHR latch restore (MMC2).
    fn set_chr_latches(&mut self, _latches: ChrLatches) {}

    /// True when a pattern-table read reconfigured the mapping since the
    /// last call (MMC2 latch flips). Polled by the tracer.
    fn take_changed(&mut self) -> bool {
        false
    }

    /// Serialisable snapshot of the mapper state.
    fn snapshot(&self) -> MapperState;

    /// Restore a snapshot, validating it against the inserted cartridge.
    fn restore(&mut self, state: MapperState) -> Result<(), RestoreError>;
}

/// Rom facts every mapper snapshot embeds so a state file cannot be loaded
/// against a different cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomShape {
    pub prg_count: usize,
    pub chr_count: usize,
    pub mapper: MapperKind,
    pub mirroring: Mirroring,
}

impl RomShape {
    pub fn of(rom: &Rom) -> RomShape {
        RomShape {
            prg_count: rom.prg_count,
            chr_count: rom.chr_count,
            mapper: rom.mapper,
            mirroring: rom.mirroring,
        }
    }

    pub fn check(&self, rom: &Rom) -> Result<(), RestoreError> {
        check_state!(*self == RomShape::of(rom), "rom shape mismatch");
        Ok(())
    }
}

/// Per-kind mapper snapshot. Bank fields are byte offsets into the rom
/// payload; every offset is range-checked on restore.
#[derive(Debug, Serialize, Deserialize)]
pub enum MapperState {
    Nrom {
        shape: RomShape,
        chr_ram: Option<Vec<u8>>,
        nt: NametablesState,
    },
    Unrom {
        shape: RomShape,
        bank: usize,
        chr_ram: Vec<u8>,
        nt: NametablesState,
    },
    Cnrom {
        shape: RomShape,
        chr_base: usize,
        nt: NametablesState,
    },
    Axrom {
        shape: RomShape,
        prg_base: usize,
        chr_ram: Vec<u8>,
        nt: NametablesState,
    },
    Mmc1 {
        shape: RomShape,
        load_reg: u8,
        write_count: u8,
        prg_bank_mode: u8,
        chr_bank_mode: u8,
        prg_base: [usize; 2],
        chr_base: [usize; 2],
        chr_ram: Option<Vec<u8>>,
        nt: NametablesState,
    },
    Mmc2 {
        shape: RomShape,
        prg_base: [usize; 4],
        latch0_fd: usize,
        latch0_fe: usize,
        latch1_fd: usize,
        latch1_fe: usize,
        latch0_is_fd: bool,
        latch1_is_fd: bool,
        nt: NametablesState,
    },
    Mmc3 {
        shape: RomShape,
        regs: [u8; 8],
        sel_reg: u8,
        prg_bank_mode: u8,
        chr_bank_mode: u8,
        prg_base: [usize; 4],
        chr_base: [usize; 8],
        irq_counter: u8,
        irq_latch: u8,
        irq_enabled: bool,
        irq_reload: bool,
        irq_active: bool,
        chr_ram: Option<Vec<u8>>,
        nt: NametablesState,
    },
}

/// Nametable RAM plus the mirror-routing table mapping the four logical
/// 1 KiB pages onto physical pages.
#[derive(Debug, Clone)]
pub struct Nametables {
    ram: Vec<u8>,
    map: [usize; 4],
}

/// Serialisable form of [`Nametables`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NametablesState {
    pub ram: Vec<u8>,
    pub map: [usize; 4],
}

impl Nametables {
    /// Two physical pages, the stock configuration.
    pub fn new(mirroring: Mirroring) -> Nametables {
        let pages = if mirroring == Mirroring::FourScreen { 4 } else { 2 };
        let mut nt = Nametables {
            ram: vec![0u8; pages * 0x400],
            map: [0; 4],
        };
        nt.set_mirroring(mirroring);
        nt
    }

    pub fn set_mirroring(&mut self, mirroring: Mirroring) {
        match mirroring {
            Mirroring::Single => self.set_single(0),
            Mirroring::Horizontal => self.map = [0, 0, 0x400, 0x400],
            Mirroring::Vertical => self.map = [0, 0x400, 0, 0x400],
            Mirroring::FourScreen => self.map = [0, 0x400, 0x800, 0xC00],
        }
    }

    /// Route all four logical pages onto one physical page.
    pub fn set_single(&mut self, area: usize) {
        let base = if area != 0 { 0x400 } else { 0 };
        self.map = [base; 4];
    }

    pub fn clear(&mut self) {
        self.ram.fill(0);
    }

    #[inline]
    pub fn read(&self, addr: u16) -> u8 {
        self.ram[self.map[((addr >> 10) & 0x3) as usize] + (addr & 0x3FF) as usize]
    }

    #[inline]
    pub fn write(&mut self, addr: u16, data: u8) {
        self.ram[self.map[((addr >> 10) & 0x3) as usize] + (addr & 0x3FF) as usize] = data;
    }

    pub fn snapshot(&self) -> NametablesState {
        NametablesState {
            ram: self.ram.clone(),
            map: self.map,
        }
    }

    pub fn restore(&mut self, state: NametablesState) -> Result<(), RestoreError> {
        check_state!(
            state.ram.len() == self.ram.len(),
            "nametable size {} != {}",
            state.ram.len(),
            self.ram.len()
        );
        for page in state.map {
            check_state!(
                page % 0x400 == 0 && page + 0x400 <= self.ram.len(),
                "nametable page offset {:#x} out of range",
                page
            );
        }
        self.ram = state.ram;
        self.map = state.map;
        Ok(())
    }
}

/// Pick and build the mapper for a cartridge.
///
/// Validates the (PRG count, CHR count, mirroring) combination the mapper
/// accepts and rejects anything else with [`RomError::BadRom`] before the
/// simulation is touched. The rom moves into the mapper, which is the only
/// component that ever addresses its banks.
pub fn create_mapper(rom: Rom) -> Result<Box<dyn Mapper>, RomError> {
    match rom.mapper {
        MapperKind::Axrom => Ok(Box::new(Axrom::new(rom)?)),
        MapperKind::Cnrom => Ok(Box::new(Cnrom::new(rom)?)),
        MapperKind::Mmc1 => Ok(Box::new(Mmc1::new(rom)?)),
        MapperKind::Mmc2 => Ok(Box::new(Mmc2::new(rom)?)),
        MapperKind::Mmc3 => Ok(Box::new(Mmc3::new(rom)?)),
        MapperKind::Nrom => Ok(Box::new(Nrom::new(rom)?)),
        MapperKind::Unrom => Ok(Box::new(Unrom::new(rom)?)),
        MapperKind::Unknown => Err(RomError::UnknownMapper(rom.ines_mapper)),
    }
}
