// Definitions of the small value types instructions are built from: operand
// size, the byte/word value an effective address resolves to, the eight
// addressing modes, and branch condition codes. The parser is the naturally
// messy code that turns opcode bits into these; this module just defines
// what they mean and how they affect the condition codes.

use crate::conversions::Truncate;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Size {
    Byte = 1,
    Word = 2,
}

impl Size {
    pub fn from<T>(&self, value: T) -> OpResult
    where
        T: Truncate<u8> + Truncate<u16>,
    {
        match *self {
            Size::Byte => OpResult::Byte(value.truncate()),
            Size::Word => OpResult::Word(value.truncate()),
        }
    }

    pub fn zero(&self) -> OpResult {
        self.from(0u16)
    }

    /// The register step for auto-increment/decrement addressing: a byte
    /// operation normally steps by one, but R6 (SP) and R7 (PC) always step
    /// by two so the stack and program counter stay word-aligned.
    pub fn step(&self, register: usize) -> u16 {
        match (*self, register) {
            (Size::Byte, 6) | (Size::Byte, 7) => 2,
            (Size::Byte, _) => 1,
            (Size::Word, _) => 2,
        }
    }

    pub fn as_asm(&self) -> &'static str {
        match *self {
            Size::Byte => "b",
            Size::Word => "",
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_asm())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpResult {
    Byte(u8),
    Word(u16),
}

/// The subset of the PSW that an ALU operation produces: N, Z, V, C. Each
/// field is `None` when the operation in question leaves that flag alone
/// (most do touch all four, but a few -- CLC and friends, or moves of an
/// address -- only touch some).
#[derive(Debug, Default, Copy, Clone)]
pub struct ConditionCodes {
    pub n: Option<bool>,
    pub z: Option<bool>,
    pub v: Option<bool>,
    pub c: Option<bool>,
}

impl ConditionCodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(n: bool, z: bool, v: bool, c: bool) -> Self {
        Self { n: Some(n), z: Some(z), v: Some(v), c: Some(c) }
    }
}

impl OpResult {
    pub fn size(&self) -> Size {
        match self {
            OpResult::Byte(_) => Size::Byte,
            OpResult::Word(_) => Size::Word,
        }
    }

    pub fn inner(&self) -> u16 {
        match *self {
            OpResult::Byte(b) => b as u16,
            OpResult::Word(w) => w,
        }
    }

    pub fn sign_extend(&self) -> i32 {
        match *self {
            OpResult::Byte(b) => b as i8 as i32,
            OpResult::Word(w) => w as i16 as i32,
        }
    }

    pub fn is_negative(&self) -> bool {
        match *self {
            OpResult::Byte(b) => (b as i8) < 0,
            OpResult::Word(w) => (w as i16) < 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.inner() == 0
    }

    /// `self + other (+ carry_in)`, PDP-11 style: ADD/ADC semantics, V and C
    /// computed from the two operands' signs and the result's sign.
    pub fn add(&self, other: Self, carry_in: bool) -> (Self, ConditionCodes) {
        let size = self.size();
        let src = self.sign_extend();
        let dst = other.sign_extend();
        let raw = dst.wrapping_add(src).wrapping_add(carry_in as i32);
        let result = size.from(raw);
        let n = result.is_negative();
        let z = result.is_zero();
        let v = (src >= 0 && dst >= 0 && n) || (src < 0 && dst < 0 && !n);
        let c = match size {
            Size::Byte => (dst as u8 as u32) + (src as u8 as u32) + carry_in as u32 > 0xff,
            Size::Word => (dst as u16 as u32) + (src as u16 as u32) + carry_in as u32 > 0xffff,
        };
        (result, ConditionCodes::all(n, z, v, c))
    }

    /// `other - self (- borrow_in)`: SUB/SBC/CMP semantics (self is the
    /// subtrahend, matching the PDP-11 operand order src,dst -> dst-src).
    pub fn sub_from(&self, other: Self, borrow_in: bool) -> (Self, ConditionCodes) {
        let size = self.size();
        let src = self.sign_extend();
        let dst = other.sign_extend();
        let raw = dst.wrapping_sub(src).wrapping_sub(borrow_in as i32);
        let result = size.from(raw);
        let n = result.is_negative();
        let z = result.is_zero();
        let v = (src < 0 && dst >= 0 && n) || (src >= 0 && dst < 0 && !n);
        let c = match size {
            Size::Byte => (dst as u8 as i32) - (src as u8 as i32) - borrow_in as i32 < 0,
            Size::Word => (dst as u16 as i32) - (src as u16 as i32) - borrow_in as i32 < 0,
        };
        (result, ConditionCodes::all(n, z, v, c))
    }

    /// NEG: `result = 0 - self`. V is set iff the operand was the most
    /// negative representable value (it has no positive counterpart); C is
    /// clear only when the operand was already zero.
    pub fn negate(&self) -> (Self, ConditionCodes) {
        let size = self.size();
        let was_zero = self.is_zero();
        let result = size.from(0u16.wrapping_sub(self.inner()));
        let n = result.is_negative();
        let z = result.is_zero();
        let v = match size {
            Size::Byte => self.inner() == 0x80,
            Size::Word => self.inner() == 0x8000,
        };
        let c = !was_zero;
        (result, ConditionCodes::all(n, z, v, c))
    }

    fn bitwise(&self, other: Self, op: impl Fn(u16, u16) -> u16) -> (Self, ConditionCodes) {
        let size = self.size();
        let result = size.from(op(self.inner(), other.inner()));
        let n = result.is_negative();
        let z = result.is_zero();
        (result, ConditionCodes { n: Some(n), z: Some(z), v: Some(false), c: None })
    }

    pub fn and(&self, other: Self) -> (Self, ConditionCodes) {
        self.bitwise(other, |a, b| a & b)
    }

    pub fn or(&self, other: Self) -> (Self, ConditionCodes) {
        self.bitwise(other, |a, b| a | b)
    }

    pub fn xor(&self, other: Self) -> (Self, ConditionCodes) {
        self.bitwise(other, |a, b| a ^ b)
    }

    pub fn bit_test(&self, other: Self) -> ConditionCodes {
        let (_, ccr) = self.bitwise(other, |a, b| a & b);
        ccr
    }

    pub fn not(&self) -> (Self, ConditionCodes) {
        let size = self.size();
        let result = size.from(!self.inner());
        let n = result.is_negative();
        let z = result.is_zero();
        (result, ConditionCodes { n: Some(n), z: Some(z), v: Some(false), c: Some(true) })
    }

    pub fn clear(&self) -> (Self, ConditionCodes) {
        let result = self.size().zero();
        (result, ConditionCodes { n: Some(false), z: Some(true), v: Some(false), c: Some(false) })
    }

    /// MOV's condition codes: N/Z from the moved value, V cleared, C
    /// unaffected.
    pub fn test(&self) -> ConditionCodes {
        ConditionCodes { n: Some(self.is_negative()), z: Some(self.is_zero()), v: Some(false), c: None }
    }

    /// TST's condition codes: same N/Z/V as `test`, but unlike MOV, TST also
    /// clears C.
    pub fn test_clearing_carry(&self) -> ConditionCodes {
        ConditionCodes { n: Some(self.is_negative()), z: Some(self.is_zero()), v: Some(false), c: Some(false) }
    }

    pub fn increment(&self) -> (Self, ConditionCodes) {
        let size = self.size();
        let (result, mut ccr) = self.add_const(1);
        let overflow = match size {
            Size::Byte => self.inner() == 0x7f,
            Size::Word => self.inner() == 0x7fff,
        };
        ccr.v = Some(overflow);
        (result, ccr)
    }

    pub fn decrement(&self) -> (Self, ConditionCodes) {
        let size = self.size();
        let (result, mut ccr) = self.add_const(-1i32 as u16);
        let overflow = match size {
            Size::Byte => self.inner() == 0x80,
            Size::Word => self.inner() == 0x8000,
        };
        ccr.v = Some(overflow);
        (result, ccr)
    }

    fn add_const(&self, delta: u16) -> (Self, ConditionCodes) {
        let size = self.size();
        let result = size.from(self.inner().wrapping_add(delta));
        let n = result.is_negative();
        let z = result.is_zero();
        (result, ConditionCodes { n: Some(n), z: Some(z), v: None, c: None })
    }

    /// Arithmetic shift right by one: C <- bit0, sign bit replicated.
    pub fn asr(&self) -> (Self, ConditionCodes) {
        let size = self.size();
        let (msb_mask, value) = match *self {
            OpResult::Byte(b) => (0x80u16, b as u16),
            OpResult::Word(w) => (0x8000u16, w),
        };
        let msb = value & msb_mask;
        let c = value & 1 != 0;
        let shifted = (value >> 1) | msb;
        let result = size.from(shifted);
        let n = result.is_negative();
        let z = result.is_zero();
        let v = n != c;
        (result, ConditionCodes::all(n, z, v, c))
    }

    /// Arithmetic shift left by one (identical bit pattern to logical shift
    /// left; only the overflow computation differs from ASR).
    pub fn asl(&self) -> (Self, ConditionCodes) {
        let size = self.size();
        let value = self.inner();
        let msb_mask = match size {
            Size::Byte => 0x80u16,
            Size::Word => 0x8000u16,
        };
        let c = value & msb_mask != 0;
        let result = size.from(value.wrapping_shl(1));
        let n = result.is_negative();
        let z = result.is_zero();
        let v = n != c;
        (result, ConditionCodes::all(n, z, v, c))
    }

    pub fn ror(&self, carry_in: bool) -> (Self, ConditionCodes) {
        let size = self.size();
        let value = self.inner();
        let c = value & 1 != 0;
        let width = match size {
            Size::Byte => 8,
            Size::Word => 16,
        };
        let rotated = (value >> 1) | ((carry_in as u16) << (width - 1));
        let result = size.from(rotated);
        let n = result.is_negative();
        let z = result.is_zero();
        let v = n != c;
        (result, ConditionCodes::all(n, z, v, c))
    }

    pub fn rol(&self, carry_in: bool) -> (Self, ConditionCodes) {
        let size = self.size();
        let value = self.inner();
        let msb_mask = match size {
            Size::Byte => 0x80u16,
            Size::Word => 0x8000u16,
        };
        let c = value & msb_mask != 0;
        let rotated = size.from((value.wrapping_shl(1)) | (carry_in as u16));
        let n = rotated.is_negative();
        let z = rotated.is_zero();
        let v = n != c;
        (rotated, ConditionCodes::all(n, z, v, c))
    }

    pub fn swap_bytes(&self) -> (Self, ConditionCodes) {
        let w = self.inner();
        let swapped = (w >> 8) | (w << 8);
        let result = OpResult::Word(swapped);
        let n = result.is_negative();
        let z = result.is_zero();
        (result, ConditionCodes { n: Some(n), z: Some(z), v: Some(false), c: Some(false) })
    }

    pub fn sign_extend_byte_to_word(&self) -> (Self, ConditionCodes) {
        let word = self.sign_extend() as u16;
        let result = OpResult::Word(word);
        let n = result.is_negative();
        let z = result.is_zero();
        (result, ConditionCodes { n: Some(n), z: Some(z), v: Some(false), c: None })
    }
}

impl fmt::Display for OpResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            OpResult::Byte(b) => write!(f, "{:03o}", b),
            OpResult::Word(w) => write!(f, "{:06o}", w),
        }
    }
}

/// The eight PDP-11 addressing modes (mode field of an operand, 3 bits),
/// paired with the register they apply to. Immediate and relative forms
/// fall out of applying mode 2/3 or 6/7 to R7 (the PC) rather than being
/// separate variants, exactly as the hardware treats them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressingMode {
    Register,
    Deferred,
    AutoIncrement,
    AutoIncrementDeferred,
    AutoDecrement,
    AutoDecrementDeferred,
    Index,
    IndexDeferred,
}

impl AddressingMode {
    pub fn from_bits(mode: usize) -> Self {
        match mode {
            0 => AddressingMode::Register,
            1 => AddressingMode::Deferred,
            2 => AddressingMode::AutoIncrement,
            3 => AddressingMode::AutoIncrementDeferred,
            4 => AddressingMode::AutoDecrement,
            5 => AddressingMode::AutoDecrementDeferred,
            6 => AddressingMode::Index,
            7 => AddressingMode::IndexDeferred,
            _ => unreachable!("addressing mode is a 3-bit field"),
        }
    }
}

/// Branch condition codes (the 16 Bcc variants collapse to this plus the
/// four-bit condition field decoded by the parser).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Condition {
    Always,
    Never,
    Eq,
    Ne,
    Ge,
    Lt,
    Gt,
    Le,
    Pl,
    Mi,
    Hi,
    Los,
    Vc,
    Vs,
    Cc,
    Cs,
}

impl Condition {
    pub fn evaluate(&self, n: bool, z: bool, v: bool, c: bool) -> bool {
        match *self {
            Condition::Always => true,
            Condition::Never => false,
            Condition::Eq => z,
            Condition::Ne => !z,
            Condition::Ge => n == v,
            Condition::Lt => n != v,
            Condition::Gt => !z && (n == v),
            Condition::Le => z || (n != v),
            Condition::Pl => !n,
            Condition::Mi => n,
            Condition::Hi => !c && !z,
            Condition::Los => c || z,
            Condition::Vc => !v,
            Condition::Vs => v,
            Condition::Cc => !c,
            Condition::Cs => c,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sets_carry_on_word_overflow() {
        let (result, ccr) = OpResult::Word(1).add(OpResult::Word(0xffff), false);
        assert_eq!(result.inner(), 0);
        assert_eq!(ccr.c, Some(true));
        assert_eq!(ccr.z, Some(true));
    }

    #[test]
    fn sub_from_computes_dst_minus_src() {
        let (result, ccr) = OpResult::Word(3).sub_from(OpResult::Word(10), false);
        assert_eq!(result.inner(), 7);
        assert_eq!(ccr.n, Some(false));
        assert_eq!(ccr.c, Some(false));
    }

    #[test]
    fn sub_from_sets_carry_as_borrow() {
        let (result, ccr) = OpResult::Word(10).sub_from(OpResult::Word(3), false);
        assert_eq!(result.inner(), 0xfff9);
        assert_eq!(ccr.c, Some(true));
        assert_eq!(ccr.n, Some(true));
    }

    #[test]
    fn asr_replicates_sign_bit() {
        let (result, ccr) = OpResult::Byte(0x81).asr();
        assert_eq!(result.inner(), 0xc0);
        assert_eq!(ccr.c, Some(true));
    }

    #[test]
    fn byte_step_on_r6_and_r7_is_always_two() {
        assert_eq!(Size::Byte.step(6), 2);
        assert_eq!(Size::Byte.step(7), 2);
        assert_eq!(Size::Byte.step(0), 1);
        assert_eq!(Size::Word.step(0), 2);
    }

    #[test]
    fn condition_ge_matches_n_xor_v() {
        assert!(Condition::Ge.evaluate(false, false, false, false));
        assert!(Condition::Ge.evaluate(true, false, true, false));
        assert!(!Condition::Lt.evaluate(false, false, false, false));
    }
}
