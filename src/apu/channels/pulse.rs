// Pulse (square) channel

use serde::{Deserialize, Serialize};

use crate::apu::components::{Envelope, LengthCounter, Sweep};
use crate::apu::constants::DUTY_PATTERNS;

/// One of the two square-wave channels. The timer divides the CPU clock by
/// (period + 1) twice per duty step, so the waveform runs at half the
/// timer rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseChannel {
    pub envelope: Envelope,
    pub length: LengthCounter,
    pub sweep: Sweep,
    pub period: i32,
    pub timer: i32,
    /// Halves the timer rate into the duty stepper.
    pub divider2: u8,
    /// Position in the 8-step duty sequence.
    pub step: usize,
    /// Selected duty pattern, 0-3.
    pub duty: usize,
}

impl PulseChannel {
    pub fn new(channel_index: i32) -> Self {
        PulseChannel {
            envelope: Envelope::new(),
            length: LengthCounter::new(),
            sweep: Sweep::new(channel_index),
            period: 0,
            timer: 1,
            divider2: 0,
            step: 0,
            duty: 0,
        }
    }

    pub fn reset(&mut self) {
        let negate_extra = self.sweep.negate_extra;
        *self = PulseChannel::new(negate_extra);
    }

    /// $4000/$4004: duty, halt/loop, envelope.
    pub fn write_control(&mut self, data: u8) {
        let halt = data & 0x20 != 0;
        self.duty = (data >> 6) as usize;
        self.envelope.configure(halt, data & 0x10 != 0, data & 0xF);
        self.length.set_halted(halt);
    }

    /// $4001/$4005: sweep unit.
    pub fn write_sweep(&mut self, data: u8) {
        self.sweep.configure(data);
    }

    /// $4002/$4006: period low byte.
    pub fn write_timer_low(&mut self, data: u8) {
        self.period = (self.period & 0x700) | data as i32;
    }

    /// $4003/$4007: length load, period high bits; restarts the envelope
    /// and the duty sequence.
    pub fn write_timer_high(&mut self, data: u8) {
        self.length.load(data >> 3);
        self.period = (self.period & 0xFF) | (((data & 0x7) as i32) << 8);
        self.envelope.restart();
        self.step = 0;
    }

    /// One CPU cycle.
    pub fn clock_timer(&mut self) {
        self.timer -= 1;
        if self.timer == 0 {
            self.timer = self.period + 1;
            if self.divider2 != 0 {
                self.step = (self.step + 1) & 0x7;
            }
            self.divider2 ^= 1;
        }
    }

    /// Current DAC level, 0-15.
    pub fn output(&self) -> u8 {
        if !self.length.active()
            || DUTY_PATTERNS[self.duty][self.step] == 0
            || self.period < 8
            || self.sweep.muting()
        {
            0
        } else {
            self.envelope.volume()
        }
    }
}
