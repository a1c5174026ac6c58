// Instruction implementations for the 6502 interpreter
//
// Flag semantics follow the 2A03 die: binary ADC/SBC (the D flag is stored
// but never consulted), compares as subtract-without-store, and the
// pushed-status rules documented in cpu/mod.rs.

use super::addressing::AddressingResult;
use super::{flags, vectors};
use crate::bus::Bus;
use crate::frontend::Frontend;

impl super::Cpu {
    /// Operand read shared by every value-consuming instruction.
    #[inline]
    fn read_operand(&self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) -> u8 {
        match ar.value {
            Some(value) => value,
            None => bus.read(ar.address, fe),
        }
    }

    // ========================================
    // Load / Store
    // ========================================

    pub(crate) fn lda(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        self.a = self.read_operand(bus, fe, ar);
        self.update_zero_and_negative_flags(self.a);
    }

    pub(crate) fn ldx(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        self.x = self.read_operand(bus, fe, ar);
        self.update_zero_and_negative_flags(self.x);
    }

    pub(crate) fn ldy(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        self.y = self.read_operand(bus, fe, ar);
        self.update_zero_and_negative_flags(self.y);
    }

    pub(crate) fn sta(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        bus.write(ar.address, self.a, fe);
    }

    pub(crate) fn stx(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        bus.write(ar.address, self.x, fe);
    }

    pub(crate) fn sty(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        bus.write(ar.address, self.y, fe);
    }

    // ========================================
    // Register Transfers
    // ========================================
    // All update Z/N except TXS.

    pub(crate) fn tax(&mut self) {
        self.x = self.a;
        self.update_zero_and_negative_flags(self.x);
    }

    pub(crate) fn tay(&mut self) {
        self.y = self.a;
        self.update_zero_and_negative_flags(self.y);
    }

    pub(crate) fn txa(&mut self) {
        self.a = self.x;
        self.update_zero_and_negative_flags(self.a);
    }

    pub(crate) fn tya(&mut self) {
        self.a = self.y;
        self.update_zero_and_negative_flags(self.a);
    }

    pub(crate) fn tsx(&mut self) {
        self.x = self.sp;
        self.update_zero_and_negative_flags(self.x);
    }

    pub(crate) fn txs(&mut self) {
        self.sp = self.x;
    }

    // ========================================
    // Arithmetic
    // ========================================

    /// A = A + M + C. Overflow is set when both inputs share a sign and
    /// the result does not.
    fn add_to_accumulator(&mut self, value: u8) {
        let carry = (self.status & flags::CARRY) as u16;
        let sum = self.a as u16 + value as u16 + carry;
        let result = sum as u8;
        self.update_flag(flags::CARRY, sum > 0xFF);
        self.update_flag(
            flags::OVERFLOW,
            (!(self.a ^ value) & (result ^ value) & 0x80) != 0,
        );
        self.a = result;
        self.update_zero_and_negative_flags(result);
    }

    pub(crate) fn adc(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        let value = self.read_operand(bus, fe, ar);
        self.add_to_accumulator(value);
    }

    /// A = A - M - (1 - C), computed as A + !M + C.
    pub(crate) fn sbc(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        let value = self.read_operand(bus, fe, ar);
        self.add_to_accumulator(!value);
    }

    pub(crate) fn inc(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        let value = bus.read(ar.address, fe).wrapping_add(1);
        self.update_zero_and_negative_flags(value);
        bus.write(ar.address, value, fe);
    }

    pub(crate) fn dec(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        let value = bus.read(ar.address, fe).wrapping_sub(1);
        self.update_zero_and_negative_flags(value);
        bus.write(ar.address, value, fe);
    }

    pub(crate) fn inx(&mut self) {
        self.x = self.x.wrapping_add(1);
        self.update_zero_and_negative_flags(self.x);
    }

    pub(crate) fn iny(&mut self) {
        self.y = self.y.wrapping_add(1);
        self.update_zero_and_negative_flags(self.y);
    }

    pub(crate) fn dex(&mut self) {
        self.x = self.x.wrapping_sub(1);
        self.update_zero_and_negative_flags(self.x);
    }

    pub(crate) fn dey(&mut self) {
        self.y = self.y.wrapping_sub(1);
        self.update_zero_and_negative_flags(self.y);
    }

    // ========================================
    // Compares
    // ========================================
    // Subtract without storing: carry set when no borrow, Z/N from the
    // difference, the register keeps its value.

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.update_flag(flags::CARRY, register >= value);
        self.update_zero_and_negative_flags(result);
    }

    pub(crate) fn cmp(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        let value = self.read_operand(bus, fe, ar);
        self.compare(self.a, value);
    }

    pub(crate) fn cpx(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        let value = self.read_operand(bus, fe, ar);
        self.compare(self.x, value);
    }

    pub(crate) fn cpy(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        let value = self.read_operand(bus, fe, ar);
        self.compare(self.y, value);
    }

    // ========================================
    // Logic
    // ========================================

    pub(crate) fn and(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        self.a &= self.read_operand(bus, fe, ar);
        self.update_zero_and_negative_flags(self.a);
    }

    pub(crate) fn ora(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        self.a |= self.read_operand(bus, fe, ar);
        self.update_zero_and_negative_flags(self.a);
    }

    pub(crate) fn eor(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        self.a ^= self.read_operand(bus, fe, ar);
        self.update_zero_and_negative_flags(self.a);
    }

    /// N and V come straight from the memory operand; Z from the AND.
    pub(crate) fn bit(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        let value = self.read_operand(bus, fe, ar);
        self.status = (self.status & 0x3D)
            | (value & 0xC0)
            | if value & self.a == 0 { flags::ZERO } else { 0 };
    }

    // ========================================
    // Shifts and Rotates
    // ========================================

    fn shift_operand<F>(
        &mut self,
        bus: &mut Bus,
        fe: &mut dyn Frontend,
        ar: &AddressingResult,
        accumulator: bool,
        op: F,
    ) where
        F: Fn(u8, u8) -> (u8, bool), // (value, old_carry) -> (result, carry)
    {
        let carry_in = self.status & flags::CARRY;
        if accumulator {
            let (result, carry) = op(self.a, carry_in);
            self.a = result;
            self.update_flag(flags::CARRY, carry);
            self.update_zero_and_negative_flags(result);
        } else {
            let value = bus.read(ar.address, fe);
            let (result, carry) = op(value, carry_in);
            self.update_flag(flags::CARRY, carry);
            self.update_zero_and_negative_flags(result);
            bus.write(ar.address, result, fe);
        }
    }

    pub(crate) fn asl(
        &mut self,
        bus: &mut Bus,
        fe: &mut dyn Frontend,
        ar: &AddressingResult,
        accumulator: bool,
    ) {
        self.shift_operand(bus, fe, ar, accumulator, |v, _| (v << 1, v & 0x80 != 0));
    }

    pub(crate) fn lsr(
        &mut self,
        bus: &mut Bus,
        fe: &mut dyn Frontend,
        ar: &AddressingResult,
        accumulator: bool,
    ) {
        self.shift_operand(bus, fe, ar, accumulator, |v, _| (v >> 1, v & 0x01 != 0));
    }

    pub(crate) fn rol(
        &mut self,
        bus: &mut Bus,
        fe: &mut dyn Frontend,
        ar: &AddressingResult,
        accumulator: bool,
    ) {
        self.shift_operand(bus, fe, ar, accumulator, |v, c| {
            ((v << 1) | c, v & 0x80 != 0)
        });
    }

    pub(crate) fn ror(
        &mut self,
        bus: &mut Bus,
        fe: &mut dyn Frontend,
        ar: &AddressingResult,
        accumulator: bool,
    ) {
        self.shift_operand(bus, fe, ar, accumulator, |v, c| {
            ((v >> 1) | (c << 7), v & 0x01 != 0)
        });
    }

    // ========================================
    // Branches
    // ========================================
    // One extra cycle when taken, another when the target is on a
    // different page from the following instruction.

    fn branch(&mut self, condition: bool, ar: &AddressingResult) -> u32 {
        if !condition {
            return 0;
        }
        self.pc = ar.address;
        if ar.page_crossed {
            2
        } else {
            1
        }
    }

    pub(crate) fn bcc(&mut self, ar: &AddressingResult) -> u32 {
        self.branch(!self.get_flag(flags::CARRY), ar)
    }

    pub(crate) fn bcs(&mut self, ar: &AddressingResult) -> u32 {
        self.branch(self.get_flag(flags::CARRY), ar)
    }

    pub(crate) fn beq(&mut self, ar: &AddressingResult) -> u32 {
        self.branch(self.get_flag(flags::ZERO), ar)
    }

    pub(crate) fn bne(&mut self, ar: &AddressingResult) -> u32 {
        self.branch(!self.get_flag(flags::ZERO), ar)
    }

    pub(crate) fn bmi(&mut self, ar: &AddressingResult) -> u32 {
        self.branch(self.get_flag(flags::NEGATIVE), ar)
    }

    pub(crate) fn bpl(&mut self, ar: &AddressingResult) -> u32 {
        self.branch(!self.get_flag(flags::NEGATIVE), ar)
    }

    pub(crate) fn bvs(&mut self, ar: &AddressingResult) -> u32 {
        self.branch(self.get_flag(flags::OVERFLOW), ar)
    }

    pub(crate) fn bvc(&mut self, ar: &AddressingResult) -> u32 {
        self.branch(!self.get_flag(flags::OVERFLOW), ar)
    }

    // ========================================
    // Jumps and Subroutines
    // ========================================

    pub(crate) fn jmp(&mut self, ar: &AddressingResult) {
        self.pc = ar.address;
    }

    /// Pushes the address of the last byte of the JSR instruction; RTS
    /// pops it and adds one.
    pub(crate) fn jsr(&mut self, bus: &mut Bus, fe: &mut dyn Frontend, ar: &AddressingResult) {
        let return_addr = self.pc.wrapping_sub(1);
        self.stack_push_u16(bus, fe, return_addr);
        self.pc = ar.address;
    }

    pub(crate) fn rts(&mut self, bus: &mut Bus, fe: &mut dyn Frontend) {
        self.pc = self.stack_pop_u16(bus, fe).wrapping_add(1);
    }

    // ========================================
    // Stack
    // ========================================

    pub(crate) fn pha(&mut self, bus: &mut Bus, fe: &mut dyn Frontend) {
        self.stack_push(bus, fe, self.a);
    }

    pub(crate) fn pla(&mut self, bus: &mut Bus, fe: &mut dyn Frontend) {
        self.a = self.stack_pop(bus, fe);
        self.update_zero_and_negative_flags(self.a);
    }

    /// PHP pushes with bits 4 and 5 set, like BRK.
    pub(crate) fn php(&mut self, bus: &mut Bus, fe: &mut dyn Frontend) {
        let pushed = (self.status & 0xCF) | 0x30;
        self.stack_push(bus, fe, pushed);
    }

    pub(crate) fn plp(&mut self, bus: &mut Bus, fe: &mut dyn Frontend) {
        self.status = self.stack_pop(bus, fe);
    }

    // ========================================
    // Flag Operations
    // ========================================

    pub(crate) fn clc(&mut self) {
        self.status &= !flags::CARRY;
    }

    pub(crate) fn cld(&mut self) {
        self.status &= !flags::DECIMAL;
    }

    pub(crate) fn cli(&mut self) {
        self.status &= !flags::INTERRUPT_DISABLE;
    }

    pub(crate) fn clv(&mut self) {
        self.status &= !flags::OVERFLOW;
    }

    pub(crate) fn sec(&mut self) {
        self.status |= flags::CARRY;
    }

    pub(crate) fn sed(&mut self) {
        self.status |= flags::DECIMAL;
    }

    pub(crate) fn sei(&mut self) {
        self.status |= flags::INTERRUPT_DISABLE;
    }

    // ========================================
    // BRK / RTI / NOP
    // ========================================

    /// BRK skips its signature byte and, with interrupts enabled, takes
    /// the IRQ vector with bits 4-5 set in the pushed status. During an
    /// outstanding NMI the live B bit is set but nothing else happens;
    /// with I set the whole thing is a two-byte NOP.
    pub(crate) fn brk(&mut self, bus: &mut Bus, fe: &mut dyn Frontend) {
        self.pc = self.pc.wrapping_add(1);
        if !self.get_flag(flags::INTERRUPT_DISABLE) {
            self.status |= flags::BREAK;
            if !self.nmi_taken() {
                self.stack_push_u16(bus, fe, self.pc);
                let pushed = (self.status & 0xCF) | 0x30;
                self.stack_push(bus, fe, pushed);
                self.status |= flags::INTERRUPT_DISABLE;
                self.pc = bus.read_u16(vectors::IRQ, fe);
            }
        }
    }

    pub(crate) fn rti(&mut self, bus: &mut Bus, fe: &mut dyn Frontend) {
        self.set_nmi_taken(false);
        self.status = self.stack_pop(bus, fe);
        self.pc = self.stack_pop_u16(bus, fe);
    }

    pub(crate) fn nop(&self) {}
}
