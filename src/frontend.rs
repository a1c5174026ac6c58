// Frontend interface - the functions the core calls on its host
//
// The core never touches the screen, the audio device or the keyboard
// directly. Everything host-facing goes through this trait: diagnostics,
// finished video frames, finished audio buffers, pad polling and the
// reset/stop signal check. The optional trace hooks let a debugger watch
// instructions, memory accesses and mapper reconfigurations without the
// core knowing anything about it.

use crate::cpu::Instruction;
use crate::bus::MemAccess;
use crate::input::{PadButton, Player};

/// Signals sampled from the host at ~100 Hz of simulated time.
///
/// `reset` requests an in-loop subsystem reset, `stop` makes the run loop
/// return. When both are set in the same sample the reset is applied first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
    pub reset: bool,
    pub stop: bool,
}

/// Host interface.
///
/// `update_screen` receives 256x240 colour indices per frame; each entry is
/// the 9-bit value (6-bit palette colour | emphasis bits << 6) that indexes
/// [`crate::ppu::palette_lookup`]. `play_frame` receives
/// [`crate::AUDIO_BUFFER_SIZE`] samples, one per CPU cycle.
pub trait Frontend {
    /// Diagnostic sink for runtime deviations (bus conflicts, half-strobes,
    /// unknown opcodes, out-of-range bank selections, ...). Emulation
    /// continues with a well-defined fallback after every warning.
    fn warning(&mut self, args: std::fmt::Arguments<'_>);

    /// Called once per complete video frame.
    fn update_screen(&mut self, frame: &[u16]);

    /// Called once per full audio buffer (about a hundredth of a second).
    fn play_frame(&mut self, samples: &[f64]);

    /// Poll one pad button. Called once per scanline-equivalent while the
    /// running program reads the controller ports.
    fn check_pad_button(&mut self, player: Player, button: PadButton) -> bool;

    /// Poll reset/stop requests.
    fn check_signals(&mut self) -> Signals;

    // ========================================
    // Trace hooks (all optional)
    // ========================================

    /// Invoked by [`crate::Nes::trace`] with the decoded instruction about
    /// to execute and the address following it.
    fn cpu_inst(&mut self, _inst: &Instruction, _next_addr: u16) {}

    /// Invoked for every memory access while trace mode is active.
    fn mem_access(&mut self, _kind: MemAccess, _addr: u16, _data: u8) {}

    /// Invoked when a traced step reconfigured the active mapper.
    fn mapper_changed(&mut self) {}
}

/// Frontend that discards everything. Handy for tests and headless runs.
pub struct NullFrontend {
    /// Number of warnings swallowed, so tests can assert on deviations.
    pub warnings: usize,
    /// Frames delivered through `update_screen`.
    pub frames: usize,
    /// Audio buffers delivered through `play_frame`.
    pub audio_frames: usize,
    /// Signals handed out by the next `check_signals` call.
    pub signals: Signals,
}

impl NullFrontend {
    pub fn new() -> Self {
        NullFrontend {
            warnings: 0,
            frames: 0,
            audio_frames: 0,
            signals: Signals::default(),
        }
    }
}

impl Default for NullFrontend {
    fn default() -> Self {
        Self::new()
    }
}

impl Frontend for NullFrontend {
    fn warning(&mut self, args: std::fmt::Arguments<'_>) {
        log::warn!("{}", args);
        self.warnings += 1;
    }

    fn update_screen(&mut self, _frame: &[u16]) {
        self.frames += 1;
    }

    fn play_frame(&mut self, _samples: &[f64]) {
        self.audio_frames += 1;
    }

    fn check_pad_button(&mut self, _player: Player, _button: PadButton) -> bool {
        false
    }

    fn check_signals(&mut self) -> Signals {
        self.signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_frontend_counts_warnings() {
        let mut fe = NullFrontend::new();
        fe.warning(format_args!("something odd at ${:04X}", 0x8000));
        fe.warning(format_args!("again"));
        assert_eq!(fe.warnings, 2);
    }

    #[test]
    fn test_null_frontend_signals_default_to_idle() {
        let mut fe = NullFrontend::new();
        let signals = fe.check_signals();
        assert!(!signals.reset);
        assert!(!signals.stop);
    }
}
