//! Real-time thread scheduling (spec §5: "driver thread ... runs at an
//! elevated scheduling priority when the platform permits it").
//!
//! Grounded in the teacher's `realtime_audio::set_realtime_priority`, which
//! raises the calling thread to `SCHED_FIFO` via `libc` on Linux; this
//! module keeps that mechanism and generalizes it to any thread the engine
//! or proxy server wants to raise (driver thread, proxy worker thread),
//! rather than the teacher's single hardcoded call site.

use log::{info, warn};

/// Attempt to raise the calling thread to real-time (`SCHED_FIFO`) priority.
/// A failure is logged as a `PriorityWarning` (spec §7) and otherwise
/// ignored — the engine runs correctly, just without RT scheduling
/// guarantees, which is expected on platforms/containers without the
/// `CAP_SYS_NICE` capability.
#[cfg(target_os = "linux")]
pub fn set_realtime_priority(priority: i32) -> bool {
    unsafe {
        let params = libc::sched_param {
            sched_priority: priority,
        };
        let result = libc::sched_setscheduler(0, libc::SCHED_FIFO, &params);
        if result == 0 {
            info!("raised thread to SCHED_FIFO priority {priority}");
            true
        } else {
            warn!(
                "failed to set SCHED_FIFO priority {priority}: {}",
                std::io::Error::last_os_error()
            );
            false
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_realtime_priority(priority: i32) -> bool {
    warn!("real-time scheduling not supported on this platform, requested priority {priority} ignored");
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_realtime_priority_does_not_panic() {
        // May legitimately fail (no CAP_SYS_NICE in CI); we only assert it
        // returns rather than panicking or hanging.
        let _ = set_realtime_priority(1);
    }
}
