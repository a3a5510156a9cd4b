//! Kernel command-line options.
//!
//! The boot path hands the raw command line to [`parse_command_line`]
//! before the thread subsystem starts. `-o mlfqs` switches the scheduler
//! from strict priority with donation to the multi-level feedback queue
//! governor.

use core::sync::atomic::{AtomicBool, Ordering};

static MLFQS: AtomicBool = AtomicBool::new(false);

/// Parse kernel options from the boot command line.
pub fn parse_command_line(cmdline: &str) {
    let mut tokens = cmdline.split_whitespace();
    while let Some(tok) = tokens.next() {
        if tok != "-o" {
            continue;
        }
        match tokens.next() {
            Some("mlfqs") => {
                MLFQS.store(true, Ordering::Release);
                log::info!(target: "boot", "multi-level feedback queue scheduler enabled");
            }
            Some(other) => {
                log::warn!(target: "boot", "unknown option '-o {}'", other);
            }
            None => {
                log::warn!(target: "boot", "'-o' with no option");
            }
        }
    }
}

/// Whether the MLFQ scheduler is active.
///
/// With MLFQ on, priorities are computed from observed CPU usage, priority
/// donation is disabled, and `set_priority` is a no-op.
pub fn mlfqs_enabled() -> bool {
    MLFQS.load(Ordering::Acquire)
}

#[cfg(test)]
pub(crate) fn set_mlfqs(on: bool) {
    MLFQS.store(on, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mlfqs_flag() {
        let _k = crate::test_support::boot_default();
        assert!(!mlfqs_enabled());
        parse_command_line("-q -o mlfqs run alarm-multiple");
        assert!(mlfqs_enabled());
        set_mlfqs(false);
    }

    #[test]
    fn ignores_unknown_options() {
        let _k = crate::test_support::boot_default();
        parse_command_line("-o nosuch -q");
        assert!(!mlfqs_enabled());
    }
}
