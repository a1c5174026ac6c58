// Sweep unit - periodic pitch bend for the pulse channels

use serde::{Deserialize, Serialize};

use super::LengthCounter;

/// Shifts the channel period up or down on each divider expiry. The two
/// pulse channels negate differently: the first adds the plain complement
/// of the shifted period, the second subtracts one more.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sweep {
    pub enabled: bool,
    pub period: u8,
    pub divider: i32,
    pub negated: bool,
    pub shift: u8,
    /// Last computed target period; the mixer mutes the channel when it
    /// overflows 11 bits in additive mode.
    pub result: i32,
    /// 0 for pulse 1, 1 for pulse 2 (the extra subtraction).
    pub negate_extra: i32,
}

impl Sweep {
    pub fn new(negate_extra: i32) -> Self {
        Sweep {
            enabled: false,
            period: 0,
            divider: 1,
            negated: false,
            shift: 0,
            result: 0,
            negate_extra,
        }
    }

    /// Configuration from the channel's second register.
    pub fn configure(&mut self, data: u8) {
        self.enabled = data & 0x80 != 0;
        self.period = (data >> 4) & 0x7;
        self.divider = self.period as i32 + 1;
        self.negated = data & 0x08 != 0;
        self.shift = data & 0x7;
    }

    /// Half-frame clock; may rewrite the channel period.
    pub fn clock(&mut self, channel_period: &mut i32, length: &LengthCounter) {
        if self.enabled {
            let mut result = *channel_period >> self.shift;
            if self.negated {
                result += self.negate_extra;
                result = -result;
            }
            result += *channel_period;
            self.result = result;
        }

        self.divider -= 1;
        if self.divider == 0 {
            self.divider = self.period as i32 + 1;
            if self.enabled && self.shift != 0 && length.active() && *channel_period >= 8 {
                if self.result <= 0x7FF || self.negated {
                    *channel_period = self.result;
                }
            }
        }
    }

    /// True when the computed target mutes the channel.
    pub fn muting(&self) -> bool {
        self.result > 0x7FF && !self.negated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_length() -> LengthCounter {
        let mut lc = LengthCounter::new();
        lc.load(0x01); // 254
        lc
    }

    #[test]
    fn test_sweep_raises_period() {
        let mut sweep = Sweep::new(0);
        sweep.configure(0x81); // enabled, period 0, shift 1
        let mut period = 0x100;
        let length = active_length();
        sweep.clock(&mut period, &length);
        assert_eq!(period, 0x180, "period plus period>>1");
    }

    #[test]
    fn test_sweep_negate_modes() {
        let mut one = Sweep::new(0);
        one.configure(0x89); // enabled, negate, shift 1
        let mut period = 0x100;
        one.clock(&mut period, &active_length());
        assert_eq!(period, 0x80, "pulse 1 subtracts the shifted period");

        let mut two = Sweep::new(1);
        two.configure(0x89);
        let mut period = 0x100;
        two.clock(&mut period, &active_length());
        assert_eq!(period, 0x7F, "pulse 2 subtracts one more");
    }

    #[test]
    fn test_overflow_mutes_instead_of_writing() {
        let mut sweep = Sweep::new(0);
        sweep.configure(0x81);
        let mut period = 0x600;
        sweep.clock(&mut period, &active_length());
        assert_eq!(period, 0x600, "target 0x900 overflows and is dropped");
        assert!(sweep.muting());
    }
}
