// Save/restore of running machine state to a single file via bincode. Scope
// is the CPU (both register banks, PSW, PC), RAM, the MMU's page registers,
// the pending-interrupt queue, and every attached device's register file --
// what a debugger or a "resume where I left off" CLI flag needs. Two things
// are deliberately excluded: the RK05 image itself (that's the file it was
// loaded from, not part of the snapshot, the same way a real machine's
// attached cartridge isn't part of a core dump) and devices' purely internal
// bus-invisible bookkeeping (an in-flight DMA transfer, a latched
// interrupt-pending flag not yet drained) -- those aren't registers, and
// whatever they were doing resumes correctly from bus-visible state alone
// within one instruction of loading.

use crate::devices::{Device, CLOCK_BASE, CONSOLE_BASE, RK05_BASE};
use crate::error::{MachineError, MachineResult};
use crate::fields::{OpResult, Size};
use crate::interrupts::PendingInterrupt;
use crate::memory::RAM_SIZE;
use crate::mmu::Mode;
use crate::processor::Cpu;
use serde::{Deserialize, Serialize};
use std::path::Path;

const PAGES_PER_MODE: usize = 8;
const RK05_REGISTER_COUNT: usize = 6;
const CONSOLE_REGISTER_COUNT: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveState {
    ram: Vec<u8>,
    regs: [[u16; 6]; 2],
    sp: [u16; 2],
    pc: u16,
    psw: u16,
    switch_register: u16,
    mmu_par: [[u16; PAGES_PER_MODE]; 2],
    mmu_pdr: [[u16; PAGES_PER_MODE]; 2],
    mmu_sr0: u16,
    interrupts: Vec<PendingInterrupt>,
    rk05_registers: [u16; RK05_REGISTER_COUNT],
    console_registers: [u16; CONSOLE_REGISTER_COUNT],
    clock_register: u16,
}

fn capture(cpu: &Cpu) -> SaveState {
    let bank = |mode: Mode| -> [u16; 6] { std::array::from_fn(|r| cpu.bank_value(mode, r)) };
    let mmu_regs = |base: u32| -> [u16; PAGES_PER_MODE] {
        std::array::from_fn(|i| Device::read(&mut *cpu.mmu.borrow_mut(), base + 2 * i as u32, Size::Word).inner())
    };
    let rk05_registers: [u16; RK05_REGISTER_COUNT] =
        std::array::from_fn(|i| cpu.bus.borrow_mut().read_register(RK05_BASE + 2 * i as u32).map(|r| r.inner()).unwrap_or(0));
    let console_registers: [u16; CONSOLE_REGISTER_COUNT] =
        std::array::from_fn(|i| cpu.bus.borrow_mut().read_register(CONSOLE_BASE + 2 * i as u32).map(|r| r.inner()).unwrap_or(0));
    let clock_register = cpu.bus.borrow_mut().read_register(CLOCK_BASE).map(|r| r.inner()).unwrap_or(0);
    SaveState {
        ram: cpu.bus.borrow().ram().as_bytes().to_vec(),
        regs: [bank(Mode::Kernel), bank(Mode::User)],
        sp: [cpu.bank_value(Mode::Kernel, 6), cpu.bank_value(Mode::User, 6)],
        pc: cpu.bank_value(Mode::Kernel, 7),
        psw: cpu.psw,
        switch_register: cpu.switch_register,
        mmu_par: [mmu_regs(crate::mmu::KERNEL_PAR_BASE), mmu_regs(crate::mmu::USER_PAR_BASE)],
        mmu_pdr: [mmu_regs(crate::mmu::KERNEL_PDR_BASE), mmu_regs(crate::mmu::USER_PDR_BASE)],
        mmu_sr0: cpu.mmu.borrow().sr0(),
        interrupts: cpu.interrupts().snapshot(),
        rk05_registers,
        console_registers,
        clock_register,
    }
}

fn apply(cpu: &mut Cpu, state: SaveState) {
    cpu.bus.borrow_mut().ram_mut().load(&state.ram);
    for (mode_idx, mode) in [Mode::Kernel, Mode::User].into_iter().enumerate() {
        for r in 0..6 {
            cpu.set_bank_value(mode, r, state.regs[mode_idx][r]);
        }
        cpu.set_bank_value(mode, 6, state.sp[mode_idx]);
    }
    cpu.set_bank_value(Mode::Kernel, 7, state.pc);
    cpu.psw = state.psw;
    cpu.switch_register = state.switch_register;
    let restore_regs = |base: u32, values: &[u16; PAGES_PER_MODE]| {
        for (i, value) in values.iter().enumerate() {
            Device::write(&mut *cpu.mmu.borrow_mut(), base + 2 * i as u32, OpResult::Word(*value));
        }
    };
    restore_regs(crate::mmu::KERNEL_PAR_BASE, &state.mmu_par[0]);
    restore_regs(crate::mmu::USER_PAR_BASE, &state.mmu_par[1]);
    restore_regs(crate::mmu::KERNEL_PDR_BASE, &state.mmu_pdr[0]);
    restore_regs(crate::mmu::USER_PDR_BASE, &state.mmu_pdr[1]);
    Device::write(&mut *cpu.mmu.borrow_mut(), crate::mmu::SR0_ADDRESS, OpResult::Word(state.mmu_sr0));

    for (i, value) in state.rk05_registers.iter().enumerate() {
        cpu.bus.borrow_mut().write_register(RK05_BASE + 2 * i as u32, OpResult::Word(*value));
    }
    for (i, value) in state.console_registers.iter().enumerate() {
        cpu.bus.borrow_mut().write_register(CONSOLE_BASE + 2 * i as u32, OpResult::Word(*value));
    }
    cpu.bus.borrow_mut().write_register(CLOCK_BASE, OpResult::Word(state.clock_register));
    cpu.interrupts_mut().restore(state.interrupts);
}

pub fn save_snapshot(cpu: &Cpu, path: impl AsRef<Path>) -> MachineResult<()> {
    let state = capture(cpu);
    let bytes = bincode::serialize(&state)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_snapshot(cpu: &mut Cpu, path: impl AsRef<Path>) -> MachineResult<()> {
    let bytes = std::fs::read(path)?;
    let state: SaveState = bincode::deserialize(&bytes)?;
    if state.ram.len() != RAM_SIZE {
        return Err(MachineError::SnapshotRamSizeMismatch { expected: RAM_SIZE, actual: state.ram.len() });
    }
    apply(cpu, state);
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

    #[test]
    fn round_trips_registers_and_ram_through_a_file() {
        let mut cpu = new_cpu();
        cpu.set_register_value(0, 0o1234);
        cpu.bus.borrow_mut().ram_mut().write_word_raw(10, 0xbeef);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");
        save_snapshot(&cpu, &path).unwrap();

        let mut fresh = new_cpu();
        load_snapshot(&mut fresh, &path).unwrap();
        assert_eq!(fresh.register_value(0), 0o1234);
        assert_eq!(fresh.bus.borrow().ram().as_bytes()[10], 0xef);
    }

    #[test]
    fn rejects_a_snapshot_with_the_wrong_ram_size() {
        let mut cpu = new_cpu();
        let bad = SaveState {
            ram: vec![0; 10],
            regs: [[0; 6]; 2],
            sp: [0; 2],
            pc: 0,
            psw: 0,
            switch_register: 0,
            mmu_par: [[0; PAGES_PER_MODE]; 2],
            mmu_pdr: [[0; PAGES_PER_MODE]; 2],
            mmu_sr0: 0,
            interrupts: Vec::new(),
            rk05_registers: [0; RK05_REGISTER_COUNT],
            console_registers: [0; CONSOLE_REGISTER_COUNT],
            clock_register: 0,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        std::fs::write(&path, bincode::serialize(&bad).unwrap()).unwrap();
        let result = load_snapshot(&mut cpu, &path);
        assert!(matches!(result, Err(MachineError::SnapshotRamSizeMismatch { .. })));
    }
}
