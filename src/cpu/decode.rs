// Instruction decoder for the tracer
//
// Produces a structured record of the instruction at an address without
// executing it. The decoder reads through the bus, so pointing it at
// live registers has the same side effects the real fetch would.

use super::addressing::AddressingMode;
use super::opcodes::{Mnemonic, OPCODE_TABLE};
use super::Cpu;
use crate::bus::Bus;
use crate::frontend::Frontend;

/// Decoded operand, keyed by addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Implied and accumulator forms.
    None,
    /// Immediate byte.
    Immediate(u8),
    /// Absolute/zero-page style address (pre-indexing).
    Address(u16),
    /// Zero-page pointer of the indirect modes.
    ZeroPagePtr(u8),
    /// Branch displacement and its resolved target.
    Branch { target: u16, offset: i8 },
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
    pub operand: Operand,
    /// Raw instruction bytes, zero-padded.
    pub bytes: [u8; 3],
    /// Instruction length, 1-3.
    pub len: u8,
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.mnemonic.as_str();
        match (self.mode, self.operand) {
            (AddressingMode::Accumulator, _) => write!(f, "{} A", name),
            (_, Operand::None) => write!(f, "{}", name),
            (_, Operand::Immediate(value)) => write!(f, "{} #${:02X}", name, value),
            (AddressingMode::ZeroPage, Operand::Address(addr)) => {
                write!(f, "{} ${:02X}", name, addr)
            }
            (AddressingMode::ZeroPageX, Operand::Address(addr)) => {
                write!(f, "{} ${:02X},X", name, addr)
            }
            (AddressingMode::ZeroPageY, Operand::Address(addr)) => {
                write!(f, "{} ${:02X},Y", name, addr)
            }
            (AddressingMode::AbsoluteX, Operand::Address(addr)) => {
                write!(f, "{} ${:04X},X", name, addr)
            }
            (AddressingMode::AbsoluteY, Operand::Address(addr)) => {
                write!(f, "{} ${:04X},Y", name, addr)
            }
            (AddressingMode::Indirect, Operand::Address(addr)) => {
                write!(f, "{} (${:04X})", name, addr)
            }
            (_, Operand::Address(addr)) => write!(f, "{} ${:04X}", name, addr),
            (AddressingMode::IndexedIndirect, Operand::ZeroPagePtr(ptr)) => {
                write!(f, "{} (${:02X},X)", name, ptr)
            }
            (_, Operand::ZeroPagePtr(ptr)) => write!(f, "{} (${:02X}),Y", name, ptr),
            (_, Operand::Branch { target, .. }) => write!(f, "{} ${:04X}", name, target),
        }
    }
}

impl Cpu {
    /// Decode the instruction at `addr`; returns the record and the
    /// address of the following instruction.
    pub fn decode(bus: &mut Bus, fe: &mut dyn Frontend, addr: u16) -> (Instruction, u16) {
        let opcode = bus.read(addr, fe);
        let info = &OPCODE_TABLE[opcode as usize];
        let mut bytes = [opcode, 0, 0];
        for i in 1..info.bytes as usize {
            bytes[i] = bus.read(addr.wrapping_add(i as u16), fe);
        }
        let next = addr.wrapping_add(info.bytes as u16);

        let operand = match info.mode {
            AddressingMode::Implied | AddressingMode::Accumulator => Operand::None,
            AddressingMode::Immediate => Operand::Immediate(bytes[1]),
            AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY => Operand::Address(bytes[1] as u16),
            AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect => {
                Operand::Address(u16::from_le_bytes([bytes[1], bytes[2]]))
            }
            AddressingMode::IndexedIndirect | AddressingMode::IndirectIndexed => {
                Operand::ZeroPagePtr(bytes[1])
            }
            AddressingMode::Relative => {
                let offset = bytes[1] as i8;
                Operand::Branch {
                    target: next.wrapping_add(offset as u16),
                    offset,
                }
            }
        };

        (
            Instruction {
                mnemonic: info.mnemonic,
                mode: info.mode,
                operand,
                bytes,
                len: info.bytes,
            },
            next,
        )
    }

    /// Decode the instruction the CPU would execute next.
    pub fn decode_next(&self, bus: &mut Bus, fe: &mut dyn Frontend) -> (Instruction, u16) {
        Cpu::decode(bus, fe, self.pc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::tests::test_bus;
    use crate::frontend::NullFrontend;

    #[test]
    fn test_decode_lda_absolute_x() {
        let mut fe = NullFrontend::new();
        let mut bus = test_bus();
        bus.write(0x0200, 0xBD, &mut fe);
        bus.write(0x0201, 0x34, &mut fe);
        bus.write(0x0202, 0x12, &mut fe);
        let (inst, next) = Cpu::decode(&mut bus, &mut fe, 0x0200);
        assert_eq!(inst.mnemonic, Mnemonic::Lda);
        assert_eq!(inst.operand, Operand::Address(0x1234));
        assert_eq!(inst.len, 3);
        assert_eq!(next, 0x0203);
        assert_eq!(inst.to_string(), "LDA $1234,X");
    }

    #[test]
    fn test_decode_branch_target() {
        let mut fe = NullFrontend::new();
        let mut bus = test_bus();
        bus.write(0x0200, 0xD0, &mut fe); // BNE -4
        bus.write(0x0201, 0xFC, &mut fe);
        let (inst, next) = Cpu::decode(&mut bus, &mut fe, 0x0200);
        assert_eq!(next, 0x0202);
        assert_eq!(
            inst.operand,
            Operand::Branch {
                target: 0x01FE,
                offset: -4
            }
        );
    }

    #[test]
    fn test_decode_formats() {
        let mut fe = NullFrontend::new();
        let mut bus = test_bus();
        let cases: &[(&[u8], &str)] = &[
            (&[0xEA], "NOP"),
            (&[0x0A], "ASL A"),
            (&[0xA9, 0x10], "LDA #$10"),
            (&[0xA5, 0x42], "LDA $42"),
            (&[0x6C, 0x00, 0x80], "JMP ($8000)"),
            (&[0xA1, 0x20], "LDA ($20,X)"),
            (&[0xB1, 0x20], "LDA ($20),Y"),
        ];
        for (bytes, expected) in cases {
            for (i, byte) in bytes.iter().enumerate() {
                bus.write(0x0300 + i as u16, *byte, &mut fe);
            }
            let (inst, _) = Cpu::decode(&mut bus, &mut fe, 0x0300);
            assert_eq!(&inst.to_string(), expected);
        }
    }
}
