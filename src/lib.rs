// Top-level wiring: attach the MMU and every Unibus device at their fixed
// register ranges, load a boot image, and expose a run loop that drives the
// CPU plus the two things that happen outside of bus dispatch -- console
// input polling and the line clock's tick.

use std::cell::RefCell;
use std::rc::Rc;

pub mod conversions;
pub mod devices;
pub mod error;
pub mod fields;
pub mod instructions;
pub mod interrupts;
pub mod memory;
pub mod mmu;
pub mod parser;
pub mod processor;
pub mod snapshot;
pub mod unix_v6;

use devices::{Console, Device, LineClock, Rk05, Terminal, CLOCK_BASE, CONSOLE_BASE, RK05_BASE};
use error::{MachineError, MachineResult};
use memory::Unibus;
use mmu::{Kt11Mmu, KERNEL_PAR_BASE, KERNEL_PDR_BASE, SR0_ADDRESS, USER_PAR_BASE, USER_PDR_BASE};
use processor::{Cpu, StepOutcome};
use std::time::Duration;

/// Page register files are 8 entries * 2 bytes wide, kernel and user alike.
const PAGE_REGISTER_FILE_BYTES: u32 = 16;

/// How long to sleep each time `step()` finds the CPU in WAIT with nothing
/// pending, rather than spinning the host CPU at 100% polling for an
/// interrupt that hasn't arrived yet.
const WAIT_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Approximately how many instructions the host executes between KW-11
/// ticks. There is no real-time source in a headless core, so the clock is
/// paced by instruction count rather than wall time; this is a rough stand-in
/// for "roughly 60 Hz on a machine fast enough to boot Unix V6 in seconds".
const INSTRUCTIONS_PER_CLOCK_TICK: u32 = 20_000;

pub struct Configuration {
    pub rk05_image: Vec<u8>,
    pub terminal: Box<dyn Terminal>,
}

/// A fully wired PDP-11/40: CPU, MMU and the three Unibus devices a Unix V6
/// boot needs, plus the host-side bookkeeping (console polling, clock
/// pacing) that lives outside the bus's memory-mapped register model.
pub struct Machine {
    pub cpu: Cpu,
    console: Rc<RefCell<Console>>,
    clock: Rc<RefCell<LineClock>>,
    rk05: Rc<RefCell<Rk05>>,
    ticks_until_clock: u32,
}

impl Machine {
    pub fn new(config: Configuration) -> MachineResult<Self> {
        let bus = Rc::new(RefCell::new(Unibus::new()));
        let mmu = Rc::new(RefCell::new(Kt11Mmu::new()));
        let console = Rc::new(RefCell::new(Console::new(config.terminal)));
        let clock = Rc::new(RefCell::new(LineClock::new()));
        let rk05 = Rc::new(RefCell::new(Rk05::new(config.rk05_image)));

        {
            let mut unibus = bus.borrow_mut();
            unibus.attach((KERNEL_PAR_BASE, KERNEL_PAR_BASE + PAGE_REGISTER_FILE_BYTES - 1), Rc::clone(&mmu) as Rc<RefCell<dyn Device>>);
            unibus.attach((KERNEL_PDR_BASE, KERNEL_PDR_BASE + PAGE_REGISTER_FILE_BYTES - 1), Rc::clone(&mmu) as Rc<RefCell<dyn Device>>);
            unibus.attach((USER_PAR_BASE, USER_PAR_BASE + PAGE_REGISTER_FILE_BYTES - 1), Rc::clone(&mmu) as Rc<RefCell<dyn Device>>);
            unibus.attach((USER_PDR_BASE, USER_PDR_BASE + PAGE_REGISTER_FILE_BYTES - 1), Rc::clone(&mmu) as Rc<RefCell<dyn Device>>);
            unibus.attach((SR0_ADDRESS, SR0_ADDRESS + 1), Rc::clone(&mmu) as Rc<RefCell<dyn Device>>);
            unibus.attach((RK05_BASE, RK05_BASE + 0o13), Rc::clone(&rk05) as Rc<RefCell<dyn Device>>);
            unibus.attach((CONSOLE_BASE, CONSOLE_BASE + 7), Rc::clone(&console) as Rc<RefCell<dyn Device>>);
            unibus.attach((CLOCK_BASE, CLOCK_BASE + 1), Rc::clone(&clock) as Rc<RefCell<dyn Device>>);
        }

        let entry = unix_v6::load_bootstrap(&mut bus.borrow_mut(), rk05.borrow().image());
        let mut cpu = Cpu::new(bus, mmu);
        cpu.reset(entry);

        Ok(Machine { cpu, console, clock, rk05, ticks_until_clock: INSTRUCTIONS_PER_CLOCK_TICK })
    }

    /// Deliver a keystroke to the console receiver directly, independent of
    /// whatever `Terminal` the machine was built with. Part of the
    /// CPU<->host control surface: a host driving the machine headlessly
    /// (no real tty attached) uses this to script input after boot.
    pub fn post_key(&mut self, byte: u8) {
        self.console.borrow_mut().post_key(byte);
    }

    /// Re-load `sector_count` sectors of the attached RK05 image into low
    /// memory at the boot address, the way a host operator re-priming the
    /// bootstrap would. Errors if the image doesn't have that many sectors.
    pub fn load_boot(&mut self, sector_count: usize) -> MachineResult<()> {
        let available_sectors = self.rk05.borrow().image().len() / unix_v6::SECTOR_BYTES;
        if sector_count == 0 || sector_count > available_sectors {
            return Err(MachineError::SectorOutOfRange { requested: sector_count, available: available_sectors });
        }
        let image = self.rk05.borrow().image().to_vec();
        unix_v6::load_sectors(&mut self.cpu.bus.borrow_mut(), &image, sector_count);
        Ok(())
    }

    /// Advance the machine by one instruction (or one interrupt/idle tick),
    /// also handling the two host-driven peripherals the Unibus dispatch
    /// doesn't reach: console input arrival and line clock pacing.
    pub fn step(&mut self) -> StepOutcome {
        self.console.borrow_mut().poll_input();
        self.ticks_until_clock = self.ticks_until_clock.saturating_sub(1);
        if self.ticks_until_clock == 0 {
            self.clock.borrow_mut().tick();
            self.ticks_until_clock = INSTRUCTIONS_PER_CLOCK_TICK;
        }
        let outcome = self.cpu.step();
        if outcome == StepOutcome::Waiting {
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
        outcome
    }

    pub fn run_until_halted(&mut self) {
        loop {
            if self.step() == StepOutcome::Halted {
                break;
            }
        }
    }
}
