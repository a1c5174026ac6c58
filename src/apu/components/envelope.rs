// Envelope generator - decaying or constant channel volume

use serde::{Deserialize, Serialize};

/// When disabled the 4-bit parameter is the volume directly; when enabled
/// it is the divider period of a 15-to-0 decay, optionally looping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub looped: bool,
    pub disabled: bool,
    /// Volume or period, depending on `disabled`.
    pub n: u8,
    /// A write to the channel's fourth register restarts the decay at the
    /// next quarter-frame clock.
    pub start: bool,
    pub divider: i32,
    pub counter: u8,
}

impl Envelope {
    pub fn new() -> Self {
        Envelope {
            looped: false,
            disabled: true,
            n: 0,
            start: false,
            divider: 0,
            counter: 0,
        }
    }

    /// Quarter-frame clock.
    pub fn clock(&mut self) {
        if self.start {
            self.counter = 15;
            self.divider = self.n as i32 + 1;
            self.start = false;
        } else {
            self.divider -= 1;
            if self.divider == 0 {
                self.divider = self.n as i32 + 1;
                if self.counter == 0 {
                    if self.looped {
                        self.counter = 15;
                    }
                } else {
                    self.counter -= 1;
                }
            }
        }
    }

    /// Configuration from the channel's control register.
    pub fn configure(&mut self, looped: bool, disabled: bool, n: u8) {
        self.looped = looped;
        self.disabled = disabled;
        self.n = n;
        self.divider = n as i32 + 1;
    }

    pub fn restart(&mut self) {
        self.start = true;
    }

    pub fn volume(&self) -> u8 {
        if self.disabled {
            self.n
        } else {
            self.counter
        }
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}
