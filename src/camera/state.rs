use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AcquisitionState {
    Ready = 0,
    Exposure = 1,
    Readout = 2,
    Calibrating = 3,
    /// Left only through a module reset.
    Fault = 4,
}

impl AcquisitionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => AcquisitionState::Ready,
            1 => AcquisitionState::Exposure,
            2 => AcquisitionState::Readout,
            3 => AcquisitionState::Calibrating,
            _ => AcquisitionState::Fault,
        }
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionState::Ready => "Ready",
            AcquisitionState::Exposure => "Exposure",
            AcquisitionState::Readout => "Readout",
            AcquisitionState::Calibrating => "Calibrating",
            AcquisitionState::Fault => "Fault",
        };
        f.write_str(name)
    }
}

/// State shared between the caller threads and the acquisition worker.
///
/// Every `start` takes a new generation. A stop marks all generations up to
/// the current one as stopped, so a stop issued before the worker picks up
/// the start command still applies to it, and a later start is unaffected.
#[derive(Debug, Default)]
pub struct SharedStatus {
    state: AtomicU8,
    generation: AtomicU64,
    stopped_generation: AtomicU64,
    acquired: AtomicUsize,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AcquisitionState {
        AcquisitionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: AcquisitionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Moves to Ready unless faulted. Returns the state left behind.
    pub fn force_ready_unless_fault(&self) -> AcquisitionState {
        let previous = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != AcquisitionState::Fault as u8).then_some(AcquisitionState::Ready as u8)
            })
            .unwrap_or_else(|current| current);
        AcquisitionState::from_u8(previous)
    }

    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    pub fn request_stop(&self) {
        self.stopped_generation
            .fetch_max(self.generation(), Ordering::SeqCst);
    }

    pub fn stop_requested(&self, generation: u64) -> bool {
        self.stopped_generation.load(Ordering::SeqCst) >= generation
    }

    pub fn frame_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    pub fn reset_acquired(&self) {
        self.acquired.store(0, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_applies_to_pending_start_only() {
        let status = SharedStatus::new();
        let first = status.next_generation();
        status.request_stop();
        assert!(status.stop_requested(first));

        let second = status.next_generation();
        assert!(!status.stop_requested(second));
        assert!(!status.is_current(first));
        assert!(status.is_current(second));
    }

    #[test]
    fn test_force_ready_keeps_fault() {
        let status = SharedStatus::new();
        status.set_state(AcquisitionState::Readout);
        assert_eq!(status.force_ready_unless_fault(), AcquisitionState::Readout);
        assert_eq!(status.state(), AcquisitionState::Ready);

        status.set_state(AcquisitionState::Fault);
        assert_eq!(status.force_ready_unless_fault(), AcquisitionState::Fault);
        assert_eq!(status.state(), AcquisitionState::Fault);
    }

    #[test]
    fn test_initial_state_is_ready() {
        let status = SharedStatus::new();
        assert_eq!(status.state(), AcquisitionState::Ready);
        assert_eq!(status.acquired(), 0);
    }
}
