//! Interrupt level control for the single CPU.
//!
//! Kernel code serializes against interrupt handlers by disabling
//! interrupts around critical sections. The level here is a software flag;
//! the architecture layer mirrors it into the hardware flag register on
//! bare metal. [`Guard`] restores the previous level on drop so nested
//! sections compose.
//!
//! The external-handler flag marks the window in which the timer hook runs.
//! Code that must not run there (blocking, yielding) asserts against it;
//! preemption requested from that window is deferred to the handler
//! epilogue via [`yield_on_return`].

use core::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(false);
static IN_EXTERNAL: AtomicBool = AtomicBool::new(false);
static YIELD_ON_RETURN: AtomicBool = AtomicBool::new(false);

/// Interrupt level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Interrupts enabled.
    On,
    /// Interrupts disabled.
    Off,
}

/// Current interrupt level.
pub fn level() -> Level {
    if ENABLED.load(Ordering::Acquire) {
        Level::On
    } else {
        Level::Off
    }
}

/// Whether interrupts are currently enabled.
pub fn are_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

/// Disable interrupts, returning the previous level.
pub fn disable() -> Level {
    let prev = level();
    ENABLED.store(false, Ordering::Release);
    prev
}

/// Enable interrupts, returning the previous level.
///
/// Must not be called from an external interrupt handler.
pub fn enable() -> Level {
    assert!(
        !in_external_handler(),
        "cannot enable interrupts inside an interrupt handler"
    );
    let prev = level();
    ENABLED.store(true, Ordering::Release);
    prev
}

/// Restore a previously saved level.
pub fn set_level(l: Level) {
    match l {
        Level::On => {
            enable();
        }
        Level::Off => {
            disable();
        }
    }
}

/// RAII section with interrupts disabled; restores the prior level on drop.
pub struct Guard {
    prev: Level,
}

/// Disable interrupts for the lifetime of the returned guard.
pub fn disable_guard() -> Guard {
    Guard { prev: disable() }
}

impl Drop for Guard {
    fn drop(&mut self) {
        // Restore without the external-handler assertion: the guard may
        // legally unwind inside the handler with prev == Off.
        match self.prev {
            Level::On => ENABLED.store(true, Ordering::Release),
            Level::Off => ENABLED.store(false, Ordering::Release),
        }
    }
}

/// Whether we are currently inside an external interrupt handler.
pub fn in_external_handler() -> bool {
    IN_EXTERNAL.load(Ordering::Acquire)
}

pub(crate) fn enter_external() {
    assert!(!IN_EXTERNAL.swap(true, Ordering::AcqRel), "nested external handler");
}

pub(crate) fn exit_external() {
    IN_EXTERNAL.store(false, Ordering::Release);
}

/// Request a yield once the current interrupt handler returns.
pub(crate) fn yield_on_return() {
    assert!(in_external_handler());
    YIELD_ON_RETURN.store(true, Ordering::Release);
}

/// Consume the deferred-yield request (called by the handler epilogue).
pub(crate) fn take_yield_request() -> bool {
    YIELD_ON_RETURN.swap(false, Ordering::AcqRel)
}

#[cfg(test)]
pub(crate) fn reset() {
    ENABLED.store(false, Ordering::Release);
    IN_EXTERNAL.store(false, Ordering::Release);
    YIELD_ON_RETURN.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Interrupt level is process-global; these tests serialize on the boot
    // lock like every other kernel-state test.

    #[test]
    fn guard_restores_previous_level() {
        let _k = crate::test_support::boot_default();
        assert!(are_enabled());
        {
            let _g = disable_guard();
            assert!(!are_enabled());
            {
                let _g2 = disable_guard();
                assert!(!are_enabled());
            }
            assert!(!are_enabled());
        }
        assert!(are_enabled());
    }

    #[test]
    fn disable_reports_prior_level() {
        let _k = crate::test_support::boot_default();
        assert_eq!(disable(), Level::On);
        assert_eq!(disable(), Level::Off);
        set_level(Level::On);
        assert!(are_enabled());
    }
}
