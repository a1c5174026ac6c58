// Length counter - the note-duration gate every channel carries

use serde::{Deserialize, Serialize};

use crate::apu::constants::LENGTH_COUNTER_TABLE;

/// Counts down once per half-frame; the channel is silent at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LengthCounter {
    /// Last 5-bit table index loaded.
    pub index: usize,
    pub count: u16,
    /// While halted the counter holds its value.
    pub halted: bool,
}

impl LengthCounter {
    pub fn new() -> Self {
        LengthCounter {
            index: 0,
            count: 0,
            halted: true,
        }
    }

    /// Half-frame clock.
    pub fn clock(&mut self) {
        if self.count != 0 && !self.halted {
            self.count -= 1;
        }
    }

    /// Reload from the lookup table; happens when the fourth channel
    /// register is written.
    pub fn load(&mut self, index: u8) {
        self.index = (index & 0x1F) as usize;
        self.count = LENGTH_COUNTER_TABLE[self.index];
    }

    pub fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    /// Channel-disable via $4015 forces the counter to zero.
    pub fn silence(&mut self) {
        self.count = 0;
    }

    pub fn active(&self) -> bool {
        self.count != 0
    }
}

impl Default for LengthCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_and_count_down() {
        let mut lc = LengthCounter::new();
        lc.load(0x03); // table entry 3 = 2
        lc.set_halted(false);
        assert_eq!(lc.count, 2);
        lc.clock();
        lc.clock();
        assert!(!lc.active());
        lc.clock();
        assert_eq!(lc.count, 0, "never wraps below zero");
    }

    #[test]
    fn test_halt_freezes_counter() {
        let mut lc = LengthCounter::new();
        lc.load(0x00); // 10
        lc.set_halted(true);
        lc.clock();
        assert_eq!(lc.count, 10);
    }
}
