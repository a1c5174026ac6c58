// Bus module - the CPU-side memory map
//
// One read/write pair routes every CPU access to work RAM, the PPU
// registers, the APU/IO registers, cartridge PRG-RAM or the mapper. The
// bus owns the PPU, APU, joypads and mapper, which keeps the
// cross-subsystem calls honest: a mapper write first forces the PPU to
// catch up its clock debt, a DMC fetch reaches the mapper directly, and
// nobody holds a pointer to anybody else.
//
// # CPU Memory Map
//
// ```text
// $0000-$1FFF: 2 KiB work RAM, mirrored every $0800
// $2000-$3FFF: eight PPU registers, mirrored every 8 bytes
// $4000-$4013: APU channel registers
// $4014      : sprite DMA
// $4015      : APU status / channel enable
// $4016      : joypad strobe / pad 1 data
// $4017      : pad 2 data / APU frame sequencer
// $4018-$5FFF: expansion area (unsupported: warn, read 0)
// $6000-$7FFF: cartridge PRG-RAM when present
// $8000-$FFFF: mapper
// ```

use serde::{Deserialize, Serialize};

use crate::apu::Apu;
use crate::cartridge::{Mapper, MapperKind, TvMode};
use crate::frontend::Frontend;
use crate::input::Joypads;
use crate::ppu::Ppu;

/// PRG-RAM window size at $6000-$7FFF.
pub const PRG_RAM_SIZE: usize = 0x2000;

/// Kind of a traced memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    Read,
    Write,
}

/// Accumulator for cycles stolen outside normal instruction flow (sprite
/// DMA, DMC priming). Replaces a mutable global in spirit: the orchestrator
/// drains it once per step.
#[derive(Debug, Default)]
pub struct ExtraCycles(u32);

impl ExtraCycles {
    pub fn add(&mut self, cycles: u32) {
        self.0 += cycles;
    }

    pub fn take(&mut self) -> u32 {
        std::mem::take(&mut self.0)
    }
}

/// The CPU-visible machine: memory map plus the devices behind it.
pub struct Bus {
    ram: [u8; 0x800],
    prg_ram: Option<Vec<u8>>,
    /// Trainer payload, re-applied to PRG-RAM at power-on.
    trainer: Option<Vec<u8>>,

    pub(crate) ppu: Ppu,
    pub(crate) apu: Apu,
    pub(crate) joypads: Joypads,
    pub(crate) mapper: Box<dyn Mapper>,

    extra_cycles: ExtraCycles,
    trace: bool,
}

/// Serialisable snapshot of the bus-level memory.
#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryState {
    pub ram: Vec<u8>,
    pub has_trainer: bool,
    pub prg_ram: Option<Vec<u8>>,
}

impl Bus {
    /// Assemble the machine around an already-built mapper.
    pub fn new(
        mapper: Box<dyn Mapper>,
        tv_mode: TvMode,
        mapper_kind: MapperKind,
        has_prg_ram: bool,
        trainer: Option<Vec<u8>>,
    ) -> Bus {
        let mut bus = Bus {
            ram: [0; 0x800],
            prg_ram: (has_prg_ram || trainer.is_some()).then(|| vec![0u8; PRG_RAM_SIZE]),
            trainer,
            ppu: Ppu::new(tv_mode, mapper_kind),
            apu: Apu::new(tv_mode),
            joypads: Joypads::new(),
            mapper,
            extra_cycles: ExtraCycles::default(),
            trace: false,
        };
        bus.power_on_memory();
        bus
    }

    /// Power-on memory pattern: mostly $FF with a few characteristic
    /// holes, and the trainer copied to the head of PRG-RAM.
    pub(crate) fn power_on_memory(&mut self) {
        self.ram.fill(0xFF);
        self.ram[0x0008] = 0xF7;
        self.ram[0x0009] = 0xEF;
        self.ram[0x000A] = 0xDF;
        self.ram[0x000F] = 0xBF;
        if let (Some(prg_ram), Some(trainer)) = (&mut self.prg_ram, &self.trainer) {
            prg_ram[..trainer.len()].copy_from_slice(trainer);
        }
    }

    /// Route a CPU read.
    pub fn read(&mut self, addr: u16, fe: &mut dyn Frontend) -> u8 {
        let data = match addr {
            0x0000..=0x1FFF => self.ram[(addr & 0x7FF) as usize],

            // PPU registers; the write-only ones read back 0
            0x2000..=0x3FFF => match addr & 0x7 {
                2 => self.ppu.read_status(&mut *self.mapper, fe),
                4 => self.ppu.read_oam_data(),
                7 => self.ppu.read_data(&mut *self.mapper, fe),
                _ => 0x00,
            },

            0x4015 => self.apu.read_status(),
            0x4016 => self.joypads.read_pad1(fe),
            0x4017 => self.joypads.read_pad2(fe),
            0x4000..=0x4014 => 0x00,

            0x4018..=0x5FFF => {
                fe.warning(format_args!("expansion ROM is not supported"));
                0x00
            }

            0x6000..=0x7FFF => match &self.prg_ram {
                Some(prg_ram) => prg_ram[(addr & 0x1FFF) as usize],
                None => {
                    fe.warning(format_args!("this cartridge has no PRG-RAM"));
                    0x00
                }
            },

            0x8000..=0xFFFF => self.mapper.read_prg(addr & 0x7FFF),
        };
        if self.trace {
            fe.mem_access(MemAccess::Read, addr, data);
        }
        data
    }

    /// Route a CPU write.
    pub fn write(&mut self, addr: u16, data: u8, fe: &mut dyn Frontend) {
        match addr {
            0x0000..=0x1FFF => self.ram[(addr & 0x7FF) as usize] = data,

            0x2000..=0x3FFF => match addr & 0x7 {
                0 => self.ppu.write_ctrl(data, &mut *self.mapper, fe),
                1 => self.ppu.write_mask(data, &mut *self.mapper, fe),
                2 => {}
                3 => self.ppu.write_oam_addr(data),
                4 => self.ppu.write_oam_data(data, &mut *self.mapper, fe),
                5 => self.ppu.write_scroll(data, &mut *self.mapper, fe),
                6 => self.ppu.write_addr(data, &mut *self.mapper, fe),
                _ => self.ppu.write_data(data, &mut *self.mapper, fe),
            },

            0x4014 => self.sprite_dma(data, fe),
            0x4015 => self
                .apu
                .write_control(data, &mut *self.mapper, &mut self.extra_cycles),
            0x4016 => self.joypads.write_strobe(data),
            0x4017 => {
                self.joypads.write_expansion_latch(data);
                self.apu.write_frame_counter(data);
            }
            0x4000..=0x4013 => self.apu.write_register(addr, data),

            0x4018..=0x5FFF => {
                fe.warning(format_args!("expansion ROM is not supported"));
            }

            0x6000..=0x7FFF => match &mut self.prg_ram {
                Some(prg_ram) => prg_ram[(addr & 0x1FFF) as usize] = data,
                None => fe.warning(format_args!("this cartridge has no PRG-RAM")),
            },

            0x8000..=0xFFFF => {
                // The PPU must not observe the new banking for pixels it
                // has already been handed the clocks for
                self.ppu.catch_up(&mut *self.mapper, fe);
                let changed = self.mapper.write_prg(addr & 0x7FFF, data, fe);
                if self.trace && changed {
                    fe.mapper_changed();
                }
            }
        }
        if self.trace {
            fe.mem_access(MemAccess::Write, addr, data);
        }
    }

    /// Little-endian 16-bit read.
    pub fn read_u16(&mut self, addr: u16, fe: &mut dyn Frontend) -> u16 {
        let lo = self.read(addr, fe) as u16;
        let hi = self.read(addr.wrapping_add(1), fe) as u16;
        (hi << 8) | lo
    }

    /// $4014 write: copy a 256-byte CPU page into OAM, billing 2 extra
    /// cycles per byte through the accumulator.
    fn sprite_dma(&mut self, page: u8, fe: &mut dyn Frontend) {
        self.ppu.catch_up(&mut *self.mapper, fe);
        let base = (page as u16) << 8;
        for offset in 0..256u16 {
            let data = self.read(base + offset, fe);
            self.ppu.oam_write_masked(data);
            self.extra_cycles.add(2);
        }
    }

    // ========================================
    // Orchestrator plumbing
    // ========================================

    /// Cycles stolen by DMA since the last call.
    pub fn take_extra_cycles(&mut self) -> u32 {
        self.extra_cycles.take()
    }

    /// Clock the APU; the budget may grow when the DMC fetches.
    pub fn clock_apu(&mut self, cc: &mut u32, fe: &mut dyn Frontend) -> bool {
        self.apu.clock(cc, &mut *self.mapper, fe)
    }

    /// Hand finished cycles to the PPU.
    pub fn clock_ppu(&mut self, cc: u32, fe: &mut dyn Frontend) {
        self.ppu.clock(cc, &mut *self.mapper, fe);
    }

    /// Sync the PPU, then re-apply the mapper's power-on layout. Called
    /// from CPU reset.
    pub fn reset_mapper(&mut self, fe: &mut dyn Frontend) {
        self.ppu.catch_up(&mut *self.mapper, fe);
        self.mapper.reset();
    }

    /// State of the mapper IRQ line.
    pub fn mapper_irq_active(&self) -> bool {
        self.mapper.irq_active()
    }

    /// Enable or disable the trace wrappers around every access.
    pub fn set_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    pub fn ppu_mut(&mut self) -> &mut Ppu {
        &mut self.ppu
    }

    pub fn apu(&self) -> &Apu {
        &self.apu
    }

    pub fn mapper(&self) -> &dyn Mapper {
        &*self.mapper
    }

    pub fn mapper_mut(&mut self) -> &mut dyn Mapper {
        &mut *self.mapper
    }

    pub fn joypads_mut(&mut self) -> &mut Joypads {
        &mut self.joypads
    }

    // ========================================
    // Snapshots
    // ========================================

    pub fn snapshot_memory(&self) -> MemoryState {
        MemoryState {
            ram: self.ram.to_vec(),
            has_trainer: self.trainer.is_some(),
            prg_ram: self.prg_ram.clone(),
        }
    }

    pub fn restore_memory(&mut self, state: MemoryState) -> Result<(), String> {
        if state.ram.len() != self.ram.len() {
            return Err("work RAM size mismatch".into());
        }
        if state.has_trainer != self.trainer.is_some() {
            return Err("trainer presence mismatch".into());
        }
        match (&state.prg_ram, &self.prg_ram) {
            (Some(saved), Some(_)) if saved.len() == PRG_RAM_SIZE => {}
            (None, None) => {}
            _ => return Err("PRG-RAM mismatch".into()),
        }
        self.ram.copy_from_slice(&state.ram);
        self.prg_ram = state.prg_ram;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cartridge::{create_mapper, test_rom};
    use crate::frontend::NullFrontend;

    /// A bus around a blank 16 KiB NROM cartridge, RAM zeroed for
    /// predictable arithmetic in the CPU tests.
    pub(crate) fn test_bus() -> Bus {
        let rom = test_rom(MapperKind::Nrom, 1, 1);
        let mapper = create_mapper(rom).unwrap();
        let mut bus = Bus::new(mapper, TvMode::Ntsc, MapperKind::Nrom, false, None);
        bus.ram.fill(0);
        bus
    }

    #[test]
    fn test_ram_mirroring() {
        let mut fe = NullFrontend::new();
        let mut bus = test_bus();
        bus.write(0x0123, 0xAB, &mut fe);
        assert_eq!(bus.read(0x0123, &mut fe), 0xAB);
        assert_eq!(bus.read(0x0923, &mut fe), 0xAB, "first mirror");
        assert_eq!(bus.read(0x1123, &mut fe), 0xAB, "second mirror");
        assert_eq!(bus.read(0x1923, &mut fe), 0xAB, "third mirror");
        bus.write(0x1FFF, 0x55, &mut fe);
        assert_eq!(bus.read(0x07FF, &mut fe), 0x55, "mirrors are writable");
    }

    #[test]
    fn test_power_on_ram_pattern() {
        let rom = test_rom(MapperKind::Nrom, 1, 1);
        let mapper = create_mapper(rom).unwrap();
        let mut bus = Bus::new(mapper, TvMode::Ntsc, MapperKind::Nrom, false, None);
        let mut fe = NullFrontend::new();
        assert_eq!(bus.read(0x0000, &mut fe), 0xFF);
        assert_eq!(bus.read(0x0008, &mut fe), 0xF7);
        assert_eq!(bus.read(0x0009, &mut fe), 0xEF);
        assert_eq!(bus.read(0x000A, &mut fe), 0xDF);
        assert_eq!(bus.read(0x000F, &mut fe), 0xBF);
    }

    #[test]
    fn test_write_only_ppu_registers_read_zero() {
        let mut fe = NullFrontend::new();
        let mut bus = test_bus();
        assert_eq!(bus.read(0x2000, &mut fe), 0);
        assert_eq!(bus.read(0x2005, &mut fe), 0);
        assert_eq!(bus.read(0x2006, &mut fe), 0);
    }

    #[test]
    fn test_ppu_register_mirroring() {
        let mut fe = NullFrontend::new();
        let mut bus = test_bus();
        bus.write(0x2003, 0x20, &mut fe); // OAMADDR
        bus.write(0x3FFC, 0x99, &mut fe); // mirror of $2004: OAMDATA
        assert_eq!(bus.read(0x2004, &mut fe), 0x99, "written through mirror");
    }

    #[test]
    fn test_expansion_area_warns_and_reads_zero() {
        let mut fe = NullFrontend::new();
        let mut bus = test_bus();
        assert_eq!(bus.read(0x4018, &mut fe), 0);
        bus.write(0x5000, 0x42, &mut fe);
        assert_eq!(bus.read(0x5000, &mut fe), 0);
        assert_eq!(fe.warnings, 3);
    }

    #[test]
    fn test_prg_ram_round_trip_and_absence() {
        let mut fe = NullFrontend::new();
        let rom = test_rom(MapperKind::Nrom, 1, 1);
        let mapper = create_mapper(rom).unwrap();
        let mut bus = Bus::new(mapper, TvMode::Ntsc, MapperKind::Nrom, true, None);
        bus.write(0x6000, 0x42, &mut fe);
        bus.write(0x7FFF, 0x43, &mut fe);
        assert_eq!(bus.read(0x6000, &mut fe), 0x42);
        assert_eq!(bus.read(0x7FFF, &mut fe), 0x43);
        assert_eq!(fe.warnings, 0);

        let mut without = test_bus();
        assert_eq!(without.read(0x6000, &mut fe), 0);
        without.write(0x6000, 0x42, &mut fe);
        assert_eq!(fe.warnings, 2, "reads and writes both warn");
    }

    #[test]
    fn test_trainer_lands_in_prg_ram() {
        let mut fe = NullFrontend::new();
        let rom = test_rom(MapperKind::Nrom, 1, 1);
        let mapper = create_mapper(rom).unwrap();
        let trainer = vec![0xAB; 512];
        let mut bus = Bus::new(mapper, TvMode::Ntsc, MapperKind::Nrom, false, Some(trainer));
        assert_eq!(bus.read(0x6000, &mut fe), 0xAB);
        assert_eq!(bus.read(0x61FF, &mut fe), 0xAB);
        assert_eq!(bus.read(0x6200, &mut fe), 0x00, "trainer is 512 bytes");
    }

    #[test]
    fn test_sprite_dma_copies_a_page_and_bills_cycles() {
        let mut fe = NullFrontend::new();
        let mut bus = test_bus();
        for i in 0..256u16 {
            bus.write(0x0300 + i, i as u8, &mut fe);
        }
        bus.write(0x2003, 0x00, &mut fe); // OAMADDR = 0
        bus.write(0x4014, 0x03, &mut fe); // DMA from $0300
        assert_eq!(bus.take_extra_cycles(), 512, "2 cycles per byte");
        bus.write(0x2003, 0x10, &mut fe);
        assert_eq!(bus.read(0x2004, &mut fe), 0x10);
        bus.write(0x2003, 0x12, &mut fe);
        assert_eq!(
            bus.read(0x2004, &mut fe),
            0x12 & 0xE3,
            "attribute bytes are masked during DMA"
        );
    }

    #[test]
    fn test_mapper_reads_above_8000() {
        let mut fe = NullFrontend::new();
        let mut rom = test_rom(MapperKind::Nrom, 1, 1);
        rom.prg[0x0000] = 0x11;
        rom.prg[0x3FFF] = 0x22;
        let mapper = create_mapper(rom).unwrap();
        let mut bus = Bus::new(mapper, TvMode::Ntsc, MapperKind::Nrom, false, None);
        assert_eq!(bus.read(0x8000, &mut fe), 0x11);
        assert_eq!(bus.read(0xBFFF, &mut fe), 0x22);
        assert_eq!(bus.read(0xFFFF, &mut fe), 0x22, "16 KiB rom mirrors");
    }

    #[test]
    fn test_trace_mode_reports_accesses() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct TraceFrontend {
            log: Rc<RefCell<Vec<(MemAccess, u16, u8)>>>,
        }
        impl Frontend for TraceFrontend {
            fn warning(&mut self, _args: std::fmt::Arguments<'_>) {}
            fn update_screen(&mut self, _frame: &[u16]) {}
            fn play_frame(&mut self, _samples: &[f64]) {}
            fn check_pad_button(
                &mut self,
                _player: crate::input::Player,
                _button: crate::input::PadButton,
            ) -> bool {
                false
            }
            fn check_signals(&mut self) -> crate::frontend::Signals {
                Default::default()
            }
            fn mem_access(&mut self, kind: MemAccess, addr: u16, data: u8) {
                self.log.borrow_mut().push((kind, addr, data));
            }
        }

        let log = Rc::new(RefCell::new(Vec::new()));
        let mut fe = TraceFrontend { log: Rc::clone(&log) };
        let mut bus = test_bus();
        bus.set_trace(true);
        bus.write(0x0010, 0x77, &mut fe);
        let _ = bus.read(0x0010, &mut fe);
        bus.set_trace(false);
        let _ = bus.read(0x0010, &mut fe);
        assert_eq!(
            log.borrow().as_slice(),
            &[
                (MemAccess::Write, 0x0010, 0x77),
                (MemAccess::Read, 0x0010, 0x77)
            ],
            "only traced accesses are reported"
        );
    }
}
