// Linear counter - the triangle channel's fine-grained duration gate

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearCounter {
    /// Reload at the next quarter-frame instead of counting.
    pub halt: bool,
    /// While set, `halt` is never cleared (the counter keeps reloading).
    pub control: bool,
    pub reload_value: u8,
    pub counter: u8,
}

impl LinearCounter {
    pub fn new() -> Self {
        LinearCounter {
            halt: false,
            control: false,
            reload_value: 0,
            counter: 0,
        }
    }

    /// Quarter-frame clock.
    pub fn clock(&mut self) {
        if self.halt {
            self.counter = self.reload_value;
        } else if self.counter > 0 {
            self.counter -= 1;
        }
        if !self.control {
            self.halt = false;
        }
    }

    pub fn active(&self) -> bool {
        self.counter != 0
    }
}

impl Default for LinearCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_then_count() {
        let mut lin = LinearCounter::new();
        lin.reload_value = 3;
        lin.halt = true;
        lin.clock(); // reload, halt drops
        assert_eq!(lin.counter, 3);
        lin.clock();
        lin.clock();
        lin.clock();
        assert!(!lin.active());
    }

    #[test]
    fn test_control_keeps_reloading() {
        let mut lin = LinearCounter::new();
        lin.reload_value = 5;
        lin.control = true;
        lin.halt = true;
        lin.clock();
        lin.clock();
        assert_eq!(lin.counter, 5, "halt persists while control is set");
    }
}
