//! Device lifecycle state machine.
//!
//! ```text
//! ┌─────────────┐  register   ┌────────────┐  remove   ┌─────────┐
//! │ Initialized │ ──────────> │ Registered │ ────────> │ Removed │
//! └─────────────┘             └────────────┘           └─────────┘
//! ```
//!
//! Transitions use CAS so that concurrent probe/remove paths cannot both
//! win the same transition.

use core::sync::atomic::{AtomicU8, Ordering};

/// Device lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    /// Transport and IRQ parameters set, not yet visible.
    Initialized = 0,
    /// In the registry, subdevices discovered, char node present.
    Registered = 1,
    /// Taken out of the registry. Open handles may still hold it.
    Removed = 2,
}

impl DeviceState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Initialized,
            1 => Self::Registered,
            _ => Self::Removed,
        }
    }
}

/// Atomic lifecycle tracker of one device.
pub struct DeviceLifecycle {
    state: AtomicU8,
}

impl DeviceLifecycle {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(DeviceState::Initialized as u8),
        }
    }

    #[inline]
    pub fn state(&self) -> DeviceState {
        DeviceState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// `Initialized -> Registered`. Returns `false` if the device was not
    /// in `Initialized`.
    pub fn begin_registered(&self) -> bool {
        self.transition(DeviceState::Initialized, DeviceState::Registered)
    }

    /// `Registered -> Removed`. Returns `false` if the device was not
    /// registered.
    pub fn mark_removed(&self) -> bool {
        self.transition(DeviceState::Registered, DeviceState::Removed)
    }

    fn transition(&self, from: DeviceState, to: DeviceState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for DeviceLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for DeviceLifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceLifecycle")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let lc = DeviceLifecycle::new();
        assert_eq!(lc.state(), DeviceState::Initialized);

        // Cannot remove before registration
        assert!(!lc.mark_removed());

        assert!(lc.begin_registered());
        assert_eq!(lc.state(), DeviceState::Registered);
        assert!(!lc.begin_registered());

        assert!(lc.mark_removed());
        assert_eq!(lc.state(), DeviceState::Removed);
        assert!(!lc.mark_removed());
        assert!(!lc.begin_registered());
    }
}
