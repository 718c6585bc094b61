// The priority-ordered pending-interrupt queue keyed by device vector and
// BR level. Devices enqueue a `PendingInterrupt` (via `Device::poll_interrupt`,
// collected by the Unibus) and the CPU samples the queue once per
// instruction boundary, taking the highest-BR, lowest-vector entry that
// beats the current PSW priority.

use serde::{Deserialize, Serialize};

/// Which device raised an interrupt, used only to de-duplicate: at most one
/// pending interrupt per device at a time (spec.md section 3).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceId {
    Rk05,
    ConsoleReceiver,
    ConsoleTransmitter,
    LineClock,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInterrupt {
    pub vector: u16,
    pub level: u8,
    pub device: DeviceId,
}

/// Priority-ordered pending-interrupt queue. Not a heap: V6-era Unibus
/// traffic has at most a handful of devices live at once, so a small Vec
/// with a linear highest-priority scan is both simpler and plenty fast.
#[derive(Default)]
pub struct InterruptController {
    pending: Vec<PendingInterrupt>,
}

impl InterruptController {
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    /// Enqueue an interrupt, replacing any still-pending one from the same
    /// device (at most one pending interrupt per device at a time).
    pub fn post(&mut self, irq: PendingInterrupt) {
        self.pending.retain(|p| p.device != irq.device);
        self.pending.push(irq);
    }

    pub fn clear(&mut self, device: DeviceId) {
        self.pending.retain(|p| p.device != device);
    }

    /// The interrupt to take this instruction boundary, if any pending one
    /// out-ranks `psw_priority`: highest BR level wins, ties broken by
    /// lowest vector address. Removes it from the queue.
    pub fn take_highest(&mut self, psw_priority: u8) -> Option<PendingInterrupt> {
        let best = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.level > psw_priority)
            .max_by_key(|(_, p)| (p.level, std::cmp::Reverse(p.vector)))
            .map(|(i, _)| i);
        best.map(|i| self.pending.remove(i))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PendingInterrupt> {
        self.pending.clone()
    }

    pub fn restore(&mut self, pending: Vec<PendingInterrupt>) {
        self.pending = pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_br_wins_regardless_of_arrival_order() {
        let mut ctrl = InterruptController::new();
        ctrl.post(PendingInterrupt { vector: 0o220, level: 5, device: DeviceId::Rk05 });
        ctrl.post(PendingInterrupt { vector: 0o100, level: 6, device: DeviceId::LineClock });
        let taken = ctrl.take_highest(4).unwrap();
        assert_eq!(taken.vector, 0o100);
        assert_eq!(taken.level, 6);
    }

    #[test]
    fn ties_break_on_lowest_vector() {
        let mut ctrl = InterruptController::new();
        ctrl.post(PendingInterrupt { vector: 0o100, level: 6, device: DeviceId::LineClock });
        ctrl.post(PendingInterrupt { vector: 0o060, level: 6, device: DeviceId::ConsoleReceiver });
        let taken = ctrl.take_highest(4).unwrap();
        assert_eq!(taken.vector, 0o060);
    }

    #[test]
    fn nothing_above_priority_yields_none() {
        let mut ctrl = InterruptController::new();
        ctrl.post(PendingInterrupt { vector: 0o060, level: 4, device: DeviceId::ConsoleReceiver });
        assert!(ctrl.take_highest(4).is_none());
    }

    #[test]
    fn posting_twice_from_same_device_does_not_duplicate() {
        let mut ctrl = InterruptController::new();
        ctrl.post(PendingInterrupt { vector: 0o060, level: 4, device: DeviceId::ConsoleReceiver });
        ctrl.post(PendingInterrupt { vector: 0o060, level: 4, device: DeviceId::ConsoleReceiver });
        assert_eq!(ctrl.snapshot().len(), 1);
    }
}
