// Instruction bodies: one arm per `Instruction` variant, each resolving its
// operands through `Cpu::effective_address` and doing its arithmetic with
// the `OpResult` helpers in `fields`. Control flow (fetch, trap dispatch,
// interrupt priority) lives in `processor`; this module is pure "what does
// opcode X do to the machine state".

use crate::fields::{AddressingMode, ConditionCodes, OpResult, Size};
use crate::memory::MemoryHandle;
use crate::mmu::{Access, Mode};
use crate::parser::Instruction;
use crate::processor::{Cpu, TrapCause};

fn size_of(byte: bool) -> Size {
    if byte {
        Size::Byte
    } else {
        Size::Word
    }
}

/// Sign-extend the 6-bit shift count ASH/ASHC take from their source
/// operand's low bits.
fn sign_extend_shift_count(word: u16) -> i32 {
    let v = (word & 0o77) as i32;
    if v & 0o40 != 0 {
        v - 0o100
    } else {
        v
    }
}

fn arithmetic_shift16(value: i16, count: i32) -> (i16, bool) {
    if count == 0 {
        return (value, false);
    }
    if count > 0 {
        let shift = count.min(16) as u32;
        let carry = ((value as i32) >> (16 - shift)) & 1 != 0;
        (((value as i32) << shift) as i16, carry)
    } else {
        let shift = (-count).min(16) as u32;
        let carry = if shift > 0 { ((value as i32) >> (shift - 1)) & 1 != 0 } else { false };
        (((value as i32) >> shift) as i16, carry)
    }
}

fn arithmetic_shift32(value: i32, count: i32) -> (i32, bool) {
    if count == 0 {
        return (value, false);
    }
    if count > 0 {
        let shift = count.min(32) as u32;
        let carry = ((value as i64) >> (32 - shift)) & 1 != 0;
        (((value as i64) << shift) as i32, carry)
    } else {
        let shift = (-count).min(32) as u32;
        let carry = if shift > 0 { ((value as i64) >> (shift - 1)) & 1 != 0 } else { false };
        (((value as i64) >> shift) as i32, carry)
    }
}

/// Execute one decoded instruction against `cpu`. Every fallible step
/// (memory references, control targets) short-circuits with the
/// `TrapCause` that `Cpu::step` will dispatch at the instruction boundary.
pub fn execute(cpu: &mut Cpu, instruction: Instruction) -> Result<(), TrapCause> {
    match instruction {
        Instruction::Mov { byte, src, dst } => {
            let size = size_of(byte);
            let src_handle = cpu.effective_address(src, size, Access::Read)?;
            let src_val = cpu.read_handle(&src_handle, size)?;
            let dst_handle = cpu.effective_address(dst, size, Access::Write)?;
            let stored = if byte {
                match dst_handle {
                    MemoryHandle::Register(_) => OpResult::Word(src_val.sign_extend() as u16),
                    MemoryHandle::Memory(_) => src_val,
                }
            } else {
                src_val
            };
            cpu.write_handle(&dst_handle, stored)?;
            cpu.apply_ccr(stored.test());
            Ok(())
        }
        Instruction::Cmp { byte, src, dst } => {
            let size = size_of(byte);
            let src_handle = cpu.effective_address(src, size, Access::Read)?;
            let src_val = cpu.read_handle(&src_handle, size)?;
            let dst_handle = cpu.effective_address(dst, size, Access::Read)?;
            let dst_val = cpu.read_handle(&dst_handle, size)?;
            let (_, ccr) = dst_val.sub_from(src_val, false);
            cpu.apply_ccr(ccr);
            Ok(())
        }
        Instruction::Bit { byte, src, dst } => {
            let size = size_of(byte);
            let src_handle = cpu.effective_address(src, size, Access::Read)?;
            let src_val = cpu.read_handle(&src_handle, size)?;
            let dst_handle = cpu.effective_address(dst, size, Access::Read)?;
            let dst_val = cpu.read_handle(&dst_handle, size)?;
            cpu.apply_ccr(src_val.bit_test(dst_val));
            Ok(())
        }
        Instruction::Bic { byte, src, dst } => {
            let size = size_of(byte);
            let src_handle = cpu.effective_address(src, size, Access::Read)?;
            let src_val = cpu.read_handle(&src_handle, size)?;
            let dst_handle = cpu.effective_address(dst, size, Access::Write)?;
            let dst_val = cpu.read_handle(&dst_handle, size)?;
            let (inverted, _) = src_val.not();
            let (result, ccr) = dst_val.and(inverted);
            cpu.write_handle(&dst_handle, result)?;
            cpu.apply_ccr(ccr);
            Ok(())
        }
        Instruction::Bis { byte, src, dst } => {
            let size = size_of(byte);
            let src_handle = cpu.effective_address(src, size, Access::Read)?;
            let src_val = cpu.read_handle(&src_handle, size)?;
            let dst_handle = cpu.effective_address(dst, size, Access::Write)?;
            let dst_val = cpu.read_handle(&dst_handle, size)?;
            let (result, ccr) = dst_val.or(src_val);
            cpu.write_handle(&dst_handle, result)?;
            cpu.apply_ccr(ccr);
            Ok(())
        }
        Instruction::Add { src, dst } => {
            let src_handle = cpu.effective_address(src, Size::Word, Access::Read)?;
            let src_val = cpu.read_handle(&src_handle, Size::Word)?;
            let dst_handle = cpu.effective_address(dst, Size::Word, Access::Write)?;
            let dst_val = cpu.read_handle(&dst_handle, Size::Word)?;
            let (result, ccr) = src_val.add(dst_val, false);
            cpu.write_handle(&dst_handle, result)?;
            cpu.apply_ccr(ccr);
            Ok(())
        }
        Instruction::Sub { src, dst } => {
            let src_handle = cpu.effective_address(src, Size::Word, Access::Read)?;
            let src_val = cpu.read_handle(&src_handle, Size::Word)?;
            let dst_handle = cpu.effective_address(dst, Size::Word, Access::Write)?;
            let dst_val = cpu.read_handle(&dst_handle, Size::Word)?;
            let (result, ccr) = src_val.sub_from(dst_val, false);
            cpu.write_handle(&dst_handle, result)?;
            cpu.apply_ccr(ccr);
            Ok(())
        }
        Instruction::Clr { byte, dst } => unary(cpu, byte, dst, |v| v.clear()),
        Instruction::Com { byte, dst } => unary(cpu, byte, dst, |v| v.not()),
        Instruction::Inc { byte, dst } => unary(cpu, byte, dst, |v| v.increment()),
        Instruction::Dec { byte, dst } => unary(cpu, byte, dst, |v| v.decrement()),
        Instruction::Neg { byte, dst } => unary(cpu, byte, dst, |v| v.negate()),
        Instruction::Tst { byte, dst } => {
            let size = size_of(byte);
            let handle = cpu.effective_address(dst, size, Access::Read)?;
            let val = cpu.read_handle(&handle, size)?;
            cpu.apply_ccr(val.test_clearing_carry());
            Ok(())
        }
        Instruction::Ror { byte, dst } => {
            let (_, _, _, c) = cpu.flags();
            unary(cpu, byte, dst, |v| v.ror(c))
        }
        Instruction::Rol { byte, dst } => {
            let (_, _, _, c) = cpu.flags();
            unary(cpu, byte, dst, |v| v.rol(c))
        }
        Instruction::Asr { byte, dst } => unary(cpu, byte, dst, |v| v.asr()),
        Instruction::Asl { byte, dst } => unary(cpu, byte, dst, |v| v.asl()),
        Instruction::Adc { byte, dst } => {
            let (_, _, _, c) = cpu.flags();
            unary(cpu, byte, dst, |v| v.size().zero().add(v, c))
        }
        Instruction::Sbc { byte, dst } => {
            let (_, _, _, c) = cpu.flags();
            unary(cpu, byte, dst, |v| v.size().zero().sub_from(v, c))
        }
        Instruction::Swab { dst } => unary(cpu, false, dst, |v| v.swap_bytes()),
        Instruction::Sxt { dst } => {
            let (n, _, _, _) = cpu.flags();
            let seed = OpResult::Byte(if n { 0xff } else { 0 });
            let handle = cpu.effective_address(dst, Size::Word, Access::Write)?;
            let (result, ccr) = seed.sign_extend_byte_to_word();
            cpu.write_handle(&handle, result)?;
            cpu.apply_ccr(ccr);
            Ok(())
        }
        Instruction::Mfps { dst } => {
            let value = OpResult::Byte((cpu.psw & 0xff) as u8);
            let handle = cpu.effective_address(dst, Size::Byte, Access::Write)?;
            cpu.write_handle(&handle, value)?;
            cpu.apply_ccr(value.test());
            Ok(())
        }
        Instruction::Mtps { src } => {
            let handle = cpu.effective_address(src, Size::Byte, Access::Read)?;
            let value = cpu.read_handle(&handle, Size::Byte)?;
            cpu.psw = (cpu.psw & 0xff00) | value.inner();
            Ok(())
        }
        Instruction::Branch { condition, offset } => {
            let (n, z, v, c) = cpu.flags();
            if condition.evaluate(n, z, v, c) {
                let delta = (offset as i16) as i32 * 2;
                let pc = cpu.pc.clone();
                let new_pc = (*pc.borrow() as i32).wrapping_add(delta) as u16;
                *pc.borrow_mut() = new_pc;
            }
            Ok(())
        }
        Instruction::Sob { register, offset } => {
            let reg = cpu.register(register);
            let new_value = reg.borrow().wrapping_sub(1);
            *reg.borrow_mut() = new_value;
            if new_value != 0 {
                let pc = cpu.pc.clone();
                let delta = (offset as u16) * 2;
                let new_pc = pc.borrow().wrapping_sub(delta);
                *pc.borrow_mut() = new_pc;
            }
            Ok(())
        }
        Instruction::Jmp { dst } => {
            if dst.mode == AddressingMode::Register {
                return Err(TrapCause::ReservedInstruction);
            }
            let target = cpu.control_target(dst)?;
            *cpu.pc.borrow_mut() = target;
            Ok(())
        }
        Instruction::Jsr { link, dst } => {
            if dst.mode == AddressingMode::Register {
                return Err(TrapCause::ReservedInstruction);
            }
            let target = cpu.control_target(dst)?;
            let link_reg = cpu.register(link);
            let old_link = *link_reg.borrow();
            cpu.push_word(old_link)?;
            let current_pc = *cpu.pc.borrow();
            *cpu.register(link).borrow_mut() = current_pc;
            *cpu.pc.borrow_mut() = target;
            Ok(())
        }
        Instruction::Rts { register } => {
            let reg = cpu.register(register);
            let new_pc = *reg.borrow();
            let popped = cpu.pop_word()?;
            *reg.borrow_mut() = popped;
            *cpu.pc.borrow_mut() = new_pc;
            Ok(())
        }
        Instruction::Mark { nn } => {
            let pc_val = *cpu.pc.borrow();
            let new_sp = pc_val.wrapping_add(2 * nn as u16);
            *cpu.register(6).borrow_mut() = new_sp;
            let old_r5 = cpu.register_value(5);
            *cpu.pc.borrow_mut() = old_r5;
            let popped = cpu.pop_word()?;
            cpu.set_register_value(5, popped);
            Ok(())
        }
        Instruction::Mul { register, src } => {
            let src_handle = cpu.effective_address(src, Size::Word, Access::Read)?;
            let src_val = cpu.read_handle(&src_handle, Size::Word)?;
            let reg_val = cpu.register_value(register) as i16 as i32;
            let product = reg_val * src_val.sign_extend();
            cpu.set_register_value(register, ((product >> 16) & 0xffff) as u16);
            cpu.set_register_value(register | 1, (product & 0xffff) as u16);
            let n = product < 0;
            let z = product == 0;
            let c = !(-32768..=32767).contains(&product);
            cpu.apply_ccr(ConditionCodes::all(n, z, false, c));
            Ok(())
        }
        Instruction::Div { register, src } => {
            let src_handle = cpu.effective_address(src, Size::Word, Access::Read)?;
            let divisor = cpu.read_handle(&src_handle, Size::Word)?.sign_extend();
            let high = cpu.register_value(register) as u32;
            let low = cpu.register_value(register | 1) as u32;
            let dividend = ((high << 16) | low) as i32;
            if divisor == 0 {
                cpu.apply_ccr(ConditionCodes { n: None, z: None, v: Some(true), c: Some(true) });
                return Ok(());
            }
            let quotient = dividend / divisor;
            let remainder = dividend % divisor;
            if quotient > i16::MAX as i32 || quotient < i16::MIN as i32 {
                cpu.apply_ccr(ConditionCodes { n: None, z: None, v: Some(true), c: Some(false) });
                return Ok(());
            }
            cpu.set_register_value(register, quotient as u16);
            cpu.set_register_value(register | 1, remainder as u16);
            cpu.apply_ccr(ConditionCodes::all(quotient < 0, quotient == 0, false, false));
            Ok(())
        }
        Instruction::Ash { register, src } => {
            let src_handle = cpu.effective_address(src, Size::Word, Access::Read)?;
            let count_word = cpu.read_handle(&src_handle, Size::Word)?;
            let count = sign_extend_shift_count(count_word.inner());
            let original = cpu.register_value(register) as i16;
            let (shifted, carry) = arithmetic_shift16(original, count);
            cpu.set_register_value(register, shifted as u16);
            let v = (original < 0) != (shifted < 0) && count != 0;
            cpu.apply_ccr(ConditionCodes::all(shifted < 0, shifted == 0, v, carry));
            Ok(())
        }
        Instruction::Ashc { register, src } => {
            let src_handle = cpu.effective_address(src, Size::Word, Access::Read)?;
            let count_word = cpu.read_handle(&src_handle, Size::Word)?;
            let count = sign_extend_shift_count(count_word.inner());
            let high = cpu.register_value(register) as u32;
            let low = cpu.register_value(register | 1) as u32;
            let combined = ((high << 16) | low) as i32;
            let (shifted, carry) = arithmetic_shift32(combined, count);
            cpu.set_register_value(register, ((shifted >> 16) & 0xffff) as u16);
            cpu.set_register_value(register | 1, (shifted & 0xffff) as u16);
            let v = (combined < 0) != (shifted < 0) && count != 0;
            cpu.apply_ccr(ConditionCodes::all(shifted < 0, shifted == 0, v, carry));
            Ok(())
        }
        Instruction::Xor { register, dst } => {
            let handle = cpu.effective_address(dst, Size::Word, Access::Write)?;
            let dst_val = cpu.read_handle(&handle, Size::Word)?;
            let reg_val = OpResult::Word(cpu.register_value(register));
            let (result, ccr) = dst_val.xor(reg_val);
            cpu.write_handle(&handle, result)?;
            cpu.apply_ccr(ccr);
            Ok(())
        }
        Instruction::SetClearCc { set, n, z, v, c } => {
            let mut ccr = ConditionCodes::new();
            if n {
                ccr.n = Some(set);
            }
            if z {
                ccr.z = Some(set);
            }
            if v {
                ccr.v = Some(set);
            }
            if c {
                ccr.c = Some(set);
            }
            cpu.apply_ccr(ccr);
            Ok(())
        }
        Instruction::Emt { .. } => Err(TrapCause::Emt),
        Instruction::Trap { .. } => Err(TrapCause::Trap),
        Instruction::Bpt => Err(TrapCause::Bpt),
        Instruction::Iot => Err(TrapCause::Iot),
        Instruction::Rti => cpu.return_from_trap(false),
        Instruction::Rtt => cpu.return_from_trap(true),
        Instruction::Halt => {
            if cpu.mode() == Mode::Kernel {
                cpu.halt();
                Ok(())
            } else {
                Err(TrapCause::BusError)
            }
        }
        Instruction::Wait => {
            cpu.begin_wait();
            Ok(())
        }
        Instruction::Reset => Ok(()),
        Instruction::Reserved { .. } => Err(TrapCause::ReservedInstruction),
    }
}

/// Every single-operand instruction (CLR..ASL) shares the same shape: read
/// the destination, transform it, write the result back, apply the
/// resulting condition codes.
fn unary(cpu: &mut Cpu, byte: bool, dst: crate::parser::Operand, op: impl Fn(OpResult) -> (OpResult, ConditionCodes)) -> Result<(), TrapCause> {
    let size = size_of(byte);
    let handle = cpu.effective_address(dst, size, Access::Write)?;
    let value = cpu.read_handle(&handle, size)?;
    let (result, ccr) = op(value);
    cpu.write_handle(&handle, result)?;
    cpu.apply_ccr(ccr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Unibus;
    use crate::mmu::Kt11Mmu;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn new_cpu() -> Cpu {
        let bus = Rc::new(RefCell::new(Unibus::new()));
        let mmu = Rc::new(RefCell::new(Kt11Mmu::new()));
        let mut cpu = Cpu::new(bus, mmu);
        cpu.reset(0o1000);
        cpu
    }

    fn load(cpu: &Cpu, address: u32, word: u16) {
        cpu.bus.borrow_mut().write(address, OpResult::Word(word)).unwrap();
    }

    #[test]
    fn mov_immediate_to_register_sets_zero_flag() {
        let mut cpu = new_cpu();
        load(&cpu, 0o1000, 0o012700); // MOV #0, R0
        load(&cpu, 0o1002, 0);
        execute(&mut cpu, crate::parser::parse_instruction(cpu.fetch_word().unwrap())).unwrap();
        assert_eq!(cpu.register_value(0), 0);
        assert_eq!(cpu.flags().1, true); // Z
    }

    #[test]
    fn add_sets_carry_and_stores_result() {
        let mut cpu = new_cpu();
        cpu.set_register_value(0, 1);
        cpu.set_register_value(1, 0xffff);
        let instr = Instruction::Add {
            src: crate::parser::Operand { mode: AddressingMode::Register, register: 0 },
            dst: crate::parser::Operand { mode: AddressingMode::Register, register: 1 },
        };
        execute(&mut cpu, instr).unwrap();
        assert_eq!(cpu.register_value(1), 0);
        assert_eq!(cpu.flags().3, true); // C
    }

    #[test]
    fn clr_register_clears_value_and_flags() {
        let mut cpu = new_cpu();
        cpu.set_register_value(2, 0xdead);
        let instr = Instruction::Clr { byte: false, dst: crate::parser::Operand { mode: AddressingMode::Register, register: 2 } };
        execute(&mut cpu, instr).unwrap();
        assert_eq!(cpu.register_value(2), 0);
        assert_eq!(cpu.flags(), (false, true, false, false));
    }

    #[test]
    fn branch_eq_taken_when_zero_flag_set() {
        let mut cpu = new_cpu();
        cpu.psw |= 0o4; // Z
        let start_pc = cpu.register_value(7);
        let instr = Instruction::Branch { condition: crate::fields::Condition::Eq, offset: 2 };
        execute(&mut cpu, instr).unwrap();
        assert_eq!(cpu.register_value(7), start_pc.wrapping_add(4));
    }

    #[test]
    fn sob_loops_until_register_reaches_zero() {
        let mut cpu = new_cpu();
        cpu.set_register_value(0, 1);
        let start_pc = cpu.register_value(7);
        let instr = Instruction::Sob { register: 0, offset: 2 };
        execute(&mut cpu, instr).unwrap();
        assert_eq!(cpu.register_value(0), 0);
        assert_eq!(cpu.register_value(7), start_pc); // not taken, register hit zero
    }

    #[test]
    fn jsr_pushes_link_and_transfers_control() {
        let mut cpu = new_cpu();
        cpu.set_register_value(6, 0o2000);
        cpu.set_register_value(5, 0o1234);
        cpu.set_register_value(1, 0o5000);
        let instr = Instruction::Jsr { link: 5, dst: crate::parser::Operand { mode: AddressingMode::Deferred, register: 1 } };
        let pc_before = cpu.register_value(7);
        execute(&mut cpu, instr).unwrap();
        assert_eq!(cpu.register_value(5), pc_before);
        assert_eq!(cpu.register_value(6), 0o2000 - 2);
    }

    #[test]
    fn div_by_zero_sets_carry_and_overflow() {
        let mut cpu = new_cpu();
        cpu.set_register_value(0, 0);
        cpu.set_register_value(1, 10);
        cpu.set_register_value(2, 0);
        let instr = Instruction::Div { register: 0, src: crate::parser::Operand { mode: AddressingMode::Register, register: 2 } };
        execute(&mut cpu, instr).unwrap();
        assert_eq!(cpu.flags().3, true);
        assert_eq!(cpu.flags().2, true);
    }

    #[test]
    fn halt_in_user_mode_traps_instead_of_halting() {
        let mut cpu = new_cpu();
        cpu.psw |= 0b11 << 14; // user mode
        let result = execute(&mut cpu, Instruction::Halt);
        assert_eq!(result, Err(TrapCause::BusError));
        assert!(!cpu.is_halted());
    }
}
