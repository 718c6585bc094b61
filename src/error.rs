// Host-facing failures. Anything the guest CPU can see is a trap or an
// interrupt (see `processor::TrapCause`), never one of these -- this type is
// only for things a human operator of the emulator needs to be told about:
// a bad disk image, a corrupt snapshot, a program that doesn't exist.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("disk image too short: need at least {needed} bytes, got {actual}")]
    DiskImageTooShort { needed: usize, actual: usize },

    #[error("requested {requested} sectors but the RK05 image only has {available}")]
    SectorOutOfRange { requested: usize, available: usize },

    #[error("snapshot is malformed: {0}")]
    MalformedSnapshot(#[from] bincode::Error),

    #[error("snapshot RAM image has the wrong size: expected {expected}, got {actual}")]
    SnapshotRamSizeMismatch { expected: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type MachineResult<T> = Result<T, MachineError>;
