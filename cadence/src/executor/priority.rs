/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! High-priority window.
//!
//! When the root file's `#priority` lies in `(0, MAX_WINDOW_SECS]`, the
//! process and the calling thread get an elevated scheduling priority
//! (`setpriority(2)` nice value) and a one-shot revert thread restores
//! normal priority when the window elapses.  The window is advisory: it
//! never blocks dispatch and failures are only logged.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

/// Largest accepted window, in seconds (`i32::MAX` milliseconds).
pub const MAX_WINDOW_SECS: i64 = 2_147_483;

/// Nice value restored when the window ends.
pub const NORMAL_NICE: i32 = 0;

/// `Some` only for windows in `(0, MAX_WINDOW_SECS]` seconds.
pub fn window_duration(secs: i64) -> Option<Duration> {
    (secs > 0 && secs <= MAX_WINDOW_SECS).then(|| Duration::from_secs(secs.unsigned_abs()))
}

/// Guard for an active window.  Dropping it ends the window early and
/// waits for the revert to be applied.
pub struct PriorityWindow {
    cancel: Option<Sender<()>>,
    revert: Option<JoinHandle<()>>,
}

impl PriorityWindow {
    /// Elevates to `nice` for `secs` seconds.  Returns `None` when the window
    /// is disabled (`-1`, `0`, or out of range).
    pub fn elevate(secs: i64, nice: i32) -> Option<Self> {
        let Some(window) = window_duration(secs) else {
            debug!(secs, "high-priority window disabled");
            return None;
        };

        let targets = Targets::current();
        targets.apply(nice);
        info!(secs, nice, "high-priority window started");

        let (cancel, cancelled) = bounded::<()>(1);
        let spawned = thread::Builder::new()
            .name("priority-window".into())
            .spawn(move || {
                match cancelled.recv_timeout(window) {
                    Err(RecvTimeoutError::Timeout) => info!("high-priority window elapsed"),
                    _ => debug!("high-priority window ended early"),
                }
                targets.apply(NORMAL_NICE);
            });

        match spawned {
            Ok(handle) => Some(Self {
                cancel: Some(cancel),
                revert: Some(handle),
            }),
            Err(e) => {
                warn!(error = %e, "cannot schedule priority revert; reverting now");
                targets.apply(NORMAL_NICE);
                None
            }
        }
    }
}

impl Drop for PriorityWindow {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the revert thread.
        self.cancel.take();
        if let Some(handle) = self.revert.take() {
            if handle.join().is_err() {
                warn!("priority revert thread panicked");
            }
        }
    }
}

// ── Platform ──────────────────────────────────────────────────────────────────

/// Process and thread ids captured on the thread that opened the window.
#[derive(Debug, Clone, Copy)]
struct Targets {
    #[cfg(unix)]
    process: libc::id_t,
    #[cfg(target_os = "linux")]
    thread: libc::id_t,
}

#[cfg(unix)]
impl Targets {
    fn current() -> Self {
        // SAFETY: getpid and gettid take no arguments and cannot fail.
        Self {
            process: unsafe { libc::getpid() } as libc::id_t,
            #[cfg(target_os = "linux")]
            thread: unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t,
        }
    }

    fn apply(&self, nice: i32) {
        set_nice(self.process, nice, "process");
        self.apply_thread(nice);
    }

    #[cfg(target_os = "linux")]
    fn apply_thread(&self, nice: i32) {
        // Linux nice values are per thread; the main thread shares the pid.
        if self.thread != self.process {
            set_nice(self.thread, nice, "thread");
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn apply_thread(&self, _nice: i32) {}
}

#[cfg(unix)]
fn set_nice(who: libc::id_t, nice: i32, scope: &'static str) {
    // SAFETY: plain syscall on an id of this process.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, who, nice) };
    if rc == 0 {
        debug!(scope, who, nice, "scheduling priority set");
    } else {
        warn!(
            scope,
            who,
            nice,
            error = %std::io::Error::last_os_error(),
            "cannot change scheduling priority"
        );
    }
}

#[cfg(not(unix))]
impl Targets {
    fn current() -> Self {
        Self {}
    }

    fn apply(&self, nice: i32) {
        warn!(nice, "scheduling priority is not supported on this platform");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_bounds() {
        assert_eq!(window_duration(-1), None);
        assert_eq!(window_duration(0), None);
        assert_eq!(window_duration(1), Some(Duration::from_secs(1)));
        assert_eq!(
            window_duration(MAX_WINDOW_SECS),
            Some(Duration::from_secs(2_147_483))
        );
        assert_eq!(window_duration(MAX_WINDOW_SECS + 1), None);
    }

    #[test]
    fn disabled_window_has_no_guard() {
        assert!(PriorityWindow::elevate(-1, NORMAL_NICE).is_none());
        assert!(PriorityWindow::elevate(MAX_WINDOW_SECS + 1, NORMAL_NICE).is_none());
    }

    #[test]
    fn dropping_the_guard_ends_the_window_promptly() {
        // NORMAL_NICE needs no privilege, so this runs anywhere.
        let window = PriorityWindow::elevate(60, NORMAL_NICE).expect("window enabled");
        let started = std::time::Instant::now();
        drop(window);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(target_os = "linux")]
    fn own_nice() -> i32 {
        // SAFETY: reads the calling thread's nice value.
        unsafe { libc::getpriority(libc::PRIO_PROCESS, 0) }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn window_reverts_to_normal_once_elapsed() {
        // Raising nice needs no privilege; lowering it back needs CAP_SYS_NICE.
        let window = PriorityWindow::elevate(1, 5).expect("window enabled");
        assert_eq!(own_nice(), 5);

        std::thread::sleep(Duration::from_millis(1200));
        // SAFETY: geteuid cannot fail.
        if unsafe { libc::geteuid() } == 0 {
            assert_eq!(own_nice(), NORMAL_NICE);
        }
        drop(window);
    }
}
