// Nes module - the machine orchestrator
//
// One `step` is one CPU instruction plus everything it drags along:
//
//   1. run the instruction, collecting its base cycle count
//   2. add the cycles sprite DMA stole during it
//   3. hand the total to the APU, which may inflate it again when the DMC
//      fetches a sample byte
//   4. hand the final total to the PPU, which advances its dot clock and
//      may schedule an NMI or clock the MMC3 counter
//   5. gather the pending interrupt lines and pulse the CPU
//
// Roughly every hundredth of a simulated second the frontend's signal hook
// runs; a requested reset re-initialises the subsystems in mapper, PPU,
// APU, joypads, CPU order, and a stop request ends `run`.

mod config;
mod save_state;

pub use config::{AudioConfig, EmulatorConfig, SaveStateConfig, VideoConfig};
pub use save_state::SaveStateError;

use crate::bus::Bus;
use crate::cartridge::{create_mapper, MapperKind, Rom, RomError, RomWindow, TvMode};
use crate::cpu::{clock_rate, Cpu};
use crate::frontend::Frontend;

/// Outcome of one orchestrated step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepResult {
    /// CPU cycles the step consumed, DMA inflation included.
    pub cycles: u32,
    /// The frontend asked the run loop to return.
    pub stop: bool,
}

/// The assembled machine.
pub struct Nes {
    cpu: Cpu,
    bus: Bus,
    tv_mode: TvMode,
    mapper_kind: MapperKind,
    /// Cycles between frontend signal polls (~1/100 s of simulated time).
    cc_per_poll: u32,
    cc_accum: u32,
}

impl Nes {
    /// Insert a cartridge and power the machine on. The mapper validates
    /// the rom shape before anything else is built.
    pub fn new(mut rom: Rom, fe: &mut dyn Frontend) -> Result<Nes, RomError> {
        let tv_mode = rom.tv_mode;
        let mapper_kind = rom.mapper;
        let has_prg_ram = rom.sram;
        let trainer = rom.trainer.take();
        let mapper = create_mapper(rom)?;
        let bus = Bus::new(mapper, tv_mode, mapper_kind, has_prg_ram, trainer);
        let cycles_per_sec = match tv_mode {
            TvMode::Ntsc => clock_rate::NTSC_CYCLES_PER_SEC,
            TvMode::Pal => clock_rate::PAL_CYCLES_PER_SEC,
        };
        let mut nes = Nes {
            cpu: Cpu::new(),
            bus,
            tv_mode,
            mapper_kind,
            cc_per_poll: cycles_per_sec / 100,
            cc_accum: 0,
        };
        nes.cpu.power_on(&mut nes.bus, fe);
        Ok(nes)
    }

    /// One instruction through the whole machine, without signal polling.
    fn step_core(&mut self, fe: &mut dyn Frontend) -> u32 {
        let mut irq = false;

        // The CPU and APU share a die: the instruction's cycles, plus
        // whatever DMA stole, all pass through the APU's mixer
        let mut cc = self.cpu.step(&mut self.bus, fe);
        cc += self.bus.take_extra_cycles();
        if self.bus.clock_apu(&mut cc, fe) {
            irq = true;
        }
        self.bus.clock_ppu(cc, fe);
        if self.bus.mapper_irq_active() {
            irq = true;
        }

        if self.bus.ppu_mut().take_nmi() {
            self.cpu.nmi(&mut self.bus, fe);
        }
        if irq {
            self.cpu.irq(&mut self.bus, fe);
        }
        cc
    }

    /// Run one instruction. Polls the frontend signals at the ~100 Hz
    /// cadence, applying a requested reset in-loop.
    pub fn step(&mut self, fe: &mut dyn Frontend) -> StepResult {
        let cycles = self.step_core(fe);
        let mut stop = false;
        self.cc_accum += cycles;
        if self.cc_accum >= self.cc_per_poll {
            self.cc_accum -= self.cc_per_poll;
            let signals = fe.check_signals();
            if signals.reset {
                self.reset(fe);
            }
            stop = signals.stop;
        }
        StepResult { cycles, stop }
    }

    /// Run until the frontend requests a stop. A simultaneous reset and
    /// stop applies the reset first, so a later resume continues from the
    /// reset machine.
    pub fn run(&mut self, fe: &mut dyn Frontend) {
        loop {
            if self.step(fe).stop {
                return;
            }
        }
    }

    /// One traced instruction: the decoded record goes to the `cpu_inst`
    /// hook, every memory access to `mem_access`, and any mapper
    /// reconfiguration to `mapper_changed`.
    pub fn trace(&mut self, fe: &mut dyn Frontend) -> u32 {
        let (inst, next_addr) = self.cpu.decode_next(&mut self.bus, fe);
        fe.cpu_inst(&inst, next_addr);
        self.bus.set_trace(true);
        let cycles = self.step_core(fe);
        if self.bus.mapper_mut().take_changed() {
            // Latch flips from pattern reads surface here
            fe.mapper_changed();
        }
        self.bus.set_trace(false);
        cycles
    }

    /// Pulse the CPU's NMI line by hand, as the VBlank logic would.
    pub fn nmi(&mut self, fe: &mut dyn Frontend) {
        self.cpu.nmi(&mut self.bus, fe);
    }

    /// Pulse the CPU's IRQ line by hand. A no-op while interrupts are
    /// disabled.
    pub fn irq(&mut self, fe: &mut dyn Frontend) {
        self.cpu.irq(&mut self.bus, fe);
    }

    /// The reset button: subsystems re-initialise in mapper, PPU, APU,
    /// joypads, CPU order.
    pub fn reset(&mut self, fe: &mut dyn Frontend) {
        self.bus.reset_mapper(fe);
        self.bus.ppu.reset();
        self.bus.apu.reset();
        self.bus.joypads.reset();
        self.cpu.reset(&mut self.bus, fe);
    }

    /// Reinitialise every subsystem to power-on, keeping the cartridge.
    /// This is the fallback after a failed state load.
    pub(crate) fn power_on(&mut self, fe: &mut dyn Frontend) {
        let _ = self.bus.take_extra_cycles();
        self.bus.power_on_memory();
        self.bus.mapper.reset();
        self.bus.ppu.power_on();
        self.bus.apu.power_on();
        self.bus.joypads.reset();
        self.cpu.power_on(&mut self.bus, fe);
    }

    // ========================================
    // Accessors
    // ========================================

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn tv_mode(&self) -> TvMode {
        self.tv_mode
    }

    pub fn mapper_kind(&self) -> MapperKind {
        self.mapper_kind
    }

    /// The rom pages currently visible in the four CPU-space windows.
    pub fn rom_window(&self) -> RomWindow {
        self.bus.mapper().rom_window()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::test_rom;
    use crate::frontend::{NullFrontend, Signals};

    /// NROM image with NOPs at $8000 and the vectors pointed into them.
    fn nop_rom() -> Rom {
        let mut rom = test_rom(MapperKind::Nrom, 1, 1);
        rom.prg.fill(0xEA); // NOP everywhere
        rom.prg[0x3FFC] = 0x00; // reset vector -> $8000
        rom.prg[0x3FFD] = 0x80;
        rom.prg[0x3FFA] = 0x05; // NMI vector -> $8005
        rom.prg[0x3FFB] = 0x80;
        rom
    }

    #[test]
    fn test_power_on_loads_reset_vector() {
        let mut fe = NullFrontend::new();
        let nes = Nes::new(nop_rom(), &mut fe).unwrap();
        assert_eq!(nes.cpu().pc, 0x8000);
    }

    #[test]
    fn test_nop_steps_cost_two_cycles() {
        let mut fe = NullFrontend::new();
        let mut nes = Nes::new(nop_rom(), &mut fe).unwrap();
        let mut total = 0;
        for _ in 0..3 {
            total += nes.step(&mut fe).cycles;
        }
        assert_eq!(nes.cpu().pc, 0x8003);
        assert_eq!(total, 6, "three NOPs, two cycles each");
    }

    #[test]
    fn test_manual_nmi_and_rti() {
        let mut fe = NullFrontend::new();
        let mut rom = nop_rom();
        rom.prg[0x0005] = 0x40; // RTI at $8005, where the NMI vector points
        let mut nes = Nes::new(rom, &mut fe).unwrap();
        for _ in 0..3 {
            nes.step(&mut fe);
        }
        assert_eq!(nes.cpu().pc, 0x8003);
        let sp_before = nes.cpu().sp;
        let (cpu, bus) = (&mut nes.cpu, &mut nes.bus);
        cpu.nmi(bus, &mut fe);
        assert_eq!(nes.cpu().pc, 0x8005, "NMI vector taken");
        assert_eq!(nes.cpu().sp, sp_before.wrapping_sub(3));
        assert!(nes.cpu().nmi_taken());
        // The next step executes the RTI (6 cycles + the 7 billed by the
        // interrupt entry)
        let result = nes.step(&mut fe);
        assert_eq!(result.cycles, 13);
        assert_eq!(nes.cpu().pc, 0x8003, "RTI returns to the NOP stream");
        assert!(!nes.cpu().nmi_taken());
    }

    #[test]
    fn test_signals_polled_at_cadence() {
        let mut fe = NullFrontend::new();
        let mut nes = Nes::new(nop_rom(), &mut fe).unwrap();
        fe.signals = Signals {
            reset: false,
            stop: true,
        };
        // A stop lands within ~1/100 s of simulated time: under 10000
        // steps of 2-cycle NOPs against the 17897-cycle cadence
        let mut steps = 0;
        loop {
            steps += 1;
            if nes.step(&mut fe).stop {
                break;
            }
            assert!(steps < 10_000, "stop request must surface at the poll");
        }
    }

    #[test]
    fn test_run_returns_on_stop() {
        let mut fe = NullFrontend::new();
        let mut nes = Nes::new(nop_rom(), &mut fe).unwrap();
        fe.signals = Signals {
            reset: false,
            stop: true,
        };
        nes.run(&mut fe); // must return
    }

    #[test]
    fn test_reset_rewinds_to_vector() {
        let mut fe = NullFrontend::new();
        let mut nes = Nes::new(nop_rom(), &mut fe).unwrap();
        for _ in 0..5 {
            nes.step(&mut fe);
        }
        assert_ne!(nes.cpu().pc, 0x8000);
        let sp = nes.cpu().sp;
        nes.reset(&mut fe);
        assert_eq!(nes.cpu().pc, 0x8000);
        assert_eq!(nes.cpu().sp, sp.wrapping_sub(3));
        // The billed reset cycles land on the next instruction
        let result = nes.step(&mut fe);
        assert_eq!(result.cycles, 2 + 7);
    }

    #[test]
    fn test_unknown_mapper_is_rejected() {
        let mut fe = NullFrontend::new();
        let rom = test_rom(MapperKind::Unknown, 1, 1);
        assert!(matches!(
            Nes::new(rom, &mut fe),
            Err(RomError::UnknownMapper(_))
        ));
    }

    #[test]
    fn test_trace_reports_instruction() {
        use crate::cpu::{Instruction, Mnemonic};
        use std::cell::RefCell;
        use std::rc::Rc;

        struct TraceFrontend {
            seen: Rc<RefCell<Vec<(Mnemonic, u16)>>>,
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
            fn check_signals(&mut self) -> Signals {
                Signals::default()
            }
            fn cpu_inst(&mut self, inst: &Instruction, next_addr: u16) {
                self.seen.borrow_mut().push((inst.mnemonic, next_addr));
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut null = NullFrontend::new();
        let mut nes = Nes::new(nop_rom(), &mut null).unwrap();
        let mut fe = TraceFrontend {
            seen: Rc::clone(&seen),
        };
        nes.trace(&mut fe);
        assert_eq!(seen.borrow().as_slice(), &[(Mnemonic::Nop, 0x8001)]);
    }

    #[test]
    fn test_rom_window_reports_nrom_layout() {
        let mut fe = NullFrontend::new();
        let nes = Nes::new(nop_rom(), &mut fe).unwrap();
        let window = nes.rom_window();
        assert_eq!(
            (window.p0, window.p1, window.p2, window.p3),
            (0, 1, 0, 1),
            "16 KiB NROM mirrors its two pages"
        );
    }
}
