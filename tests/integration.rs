// Black-box tests driving the whole machine through its public API: load an
// image, run it, and check observable state (registers, console output,
// halted-ness) rather than reaching into any one module's internals.

use pdp11six::devices::{BufferTerminal, CONSOLE_BASE};
use pdp11six::processor::StepOutcome;
use pdp11six::snapshot::{load_snapshot, save_snapshot};
use pdp11six::{Configuration, Machine};

const XBUF: u32 = CONSOLE_BASE + 6;

fn sector_with_words(words: &[u16]) -> Vec<u8> {
    let mut image = vec![0u8; 512];
    for (i, word) in words.iter().enumerate() {
        image[i * 2] = (*word & 0xff) as u8;
        image[i * 2 + 1] = (*word >> 8) as u8;
    }
    image
}

fn machine_with_program(words: &[u16]) -> Machine {
    let config = Configuration { rk05_image: sector_with_words(words), terminal: Box::new(BufferTerminal::default()) };
    Machine::new(config).unwrap()
}

#[test]
fn a_zeroed_boot_sector_halts_immediately() {
    let mut machine = machine_with_program(&[]);
    machine.run_until_halted();
    assert!(machine.cpu.is_halted());
}

#[test]
fn loading_an_immediate_into_a_register_is_observable_after_halt() {
    // MOV #101,R0 ; HALT
    let mut machine = machine_with_program(&[0o012700, 0o000101, 0]);
    machine.run_until_halted();
    assert_eq!(machine.cpu.register_value(0), 0o101);
}

#[test]
fn a_program_can_write_a_byte_out_the_console_transmitter() {
    // MOV #101,R0 ; MOV R0,@#177566 ; HALT
    let mut machine = machine_with_program(&[0o012700, 0o000101, 0o010037, 0o177566, 0]);
    machine.run_until_halted();
    assert!(machine.cpu.is_halted());

    let physical = pdp11six::memory::unibus_to_physical(XBUF);
    let byte = machine.cpu.bus.borrow_mut().read(physical, pdp11six::fields::Size::Word).unwrap().inner() & 0xff;
    assert_eq!(byte, 0o101);
}

#[test]
fn stepping_one_instruction_at_a_time_matches_running_to_completion() {
    let mut machine = machine_with_program(&[0o012700, 0o000101, 0]);
    let mut outcome = StepOutcome::Stepped;
    let mut guard = 0;
    while outcome != StepOutcome::Halted && guard < 1_000 {
        outcome = machine.step();
        guard += 1;
    }
    assert_eq!(outcome, StepOutcome::Halted);
    assert_eq!(machine.cpu.register_value(0), 0o101);
}

#[test]
fn a_snapshot_taken_mid_run_restores_register_state_into_a_fresh_machine() {
    let mut source = machine_with_program(&[0o012700, 0o012345, 0]);
    source.run_until_halted();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mid-run.snap");
    save_snapshot(&source.cpu, &path).unwrap();

    let mut target = machine_with_program(&[]);
    load_snapshot(&mut target.cpu, &path).unwrap();
    assert_eq!(target.cpu.register_value(0), 0o12345);
}
