// Input module - joypad serial protocol
//
// The two controller ports live at $4016/$4017. Writing 1 then 0 to bit 0
// of $4016 latches both pads; successive reads then shift out one bit per
// read: the eight buttons, four zeros, a signature 1 (index 19 on port 1,
// 18 on port 2) and zeros to complete a 24-step cycle. Button state is
// pulled from the frontend at read time.
//
// Reading while the 1-then-0 strobe has not completed ("half-strobing") is
// not supported: it warns and returns 0.

use serde::{Deserialize, Serialize};

use crate::frontend::Frontend;

/// Buttons of a standard controller, in shift order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadButton {
    A,
    B,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
}

impl PadButton {
    /// Button at a shift index 0-7.
    pub fn from_index(index: u8) -> PadButton {
        match index {
            0 => PadButton::A,
            1 => PadButton::B,
            2 => PadButton::Select,
            3 => PadButton::Start,
            4 => PadButton::Up,
            5 => PadButton::Down,
            6 => PadButton::Left,
            _ => PadButton::Right,
        }
    }
}

/// Controller port selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Player {
    One,
    Two,
}

/// Shift-register state of both controller ports.
pub struct Joypads {
    /// The 1-then-0 strobe sequence has completed; reads are valid.
    latched: bool,
    shift1: u8,
    shift2: u8,
}

/// Serialisable snapshot of the joypads.
#[derive(Debug, Serialize, Deserialize)]
pub struct JoypadsState {
    pub latched: bool,
    pub shift1: u8,
    pub shift2: u8,
}

impl Joypads {
    pub fn new() -> Joypads {
        Joypads {
            latched: true,
            shift1: 0,
            shift2: 0,
        }
    }

    pub fn reset(&mut self) {
        self.latched = true;
        self.shift1 = 0;
        self.shift2 = 0;
    }

    /// $4016 write: bit 0 high resets the shifters, the following low
    /// edge completes the strobe.
    pub fn write_strobe(&mut self, data: u8) {
        if data & 0x01 != 0 {
            self.shift1 = 0;
            self.shift2 = 0;
            self.latched = false;
        } else {
            self.latched = true;
        }
    }

    fn read_pad(
        shift: &mut u8,
        latched: bool,
        signature_index: u8,
        player: Player,
        fe: &mut dyn Frontend,
    ) -> u8 {
        if !latched {
            fe.warning(format_args!(
                "half-strobing the controller ports is not supported"
            ));
            return 0x00;
        }
        let value = if *shift < 8 {
            fe.check_pad_button(player, PadButton::from_index(*shift)) as u8
        } else if *shift == signature_index {
            0x01
        } else {
            0x00
        };
        *shift += 1;
        if *shift == 24 {
            *shift = 0;
        }
        value
    }

    /// $4016 read.
    pub fn read_pad1(&mut self, fe: &mut dyn Frontend) -> u8 {
        Joypads::read_pad(&mut self.shift1, self.latched, 19, Player::One, fe)
    }

    /// $4017 read.
    pub fn read_pad2(&mut self, fe: &mut dyn Frontend) -> u8 {
        Joypads::read_pad(&mut self.shift2, self.latched, 18, Player::Two, fe)
    }

    /// $4017 write side: the expansion port latch, unsupported.
    pub fn write_expansion_latch(&mut self, _data: u8) {}

    pub fn snapshot(&self) -> JoypadsState {
        JoypadsState {
            latched: self.latched,
            shift1: self.shift1,
            shift2: self.shift2,
        }
    }

    pub fn restore(&mut self, state: JoypadsState) -> Result<(), String> {
        if state.shift1 >= 24 || state.shift2 >= 24 {
            return Err("joypad shift index out of range".into());
        }
        self.latched = state.latched;
        self.shift1 = state.shift1;
        self.shift2 = state.shift2;
        Ok(())
    }
}

impl Default for Joypads {
    fn default() -> Self {
        Self::new()
    }
}
