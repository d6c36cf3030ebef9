/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Real-time executor.
//!
//! Timelines run strictly one after another.  Each follows
//!
//! ```text
//! Pending ──► Running { started, cursor } ──► Done
//!                 │  ▲
//!                 └──┘ command due: Execute, cursor += 1
//! ```
//!
//! Once every command has been dispatched the timeline holds until its
//! `duration` has elapsed.  Waiting is hybrid: the OS sleeps until
//! `spin_threshold` before the deadline, then the thread spins.
//!
//! An `Execute` failure is logged and counted, never raised; the sequence
//! keeps going.

pub mod priority;

use std::time::{Duration, Instant};

use spin_sleep::{SpinSleeper, SpinStrategy};
use tracing::{debug, info, warn};

use crate::registry::{DeviceRegistry, ExecutionPlan, PlannedTimeline};

pub use priority::PriorityWindow;

/// Default switch-over from sleeping to spinning.
pub const DEFAULT_SPIN_THRESHOLD: Duration = Duration::from_micros(2000);

/// Summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub timelines: usize,
    pub commands: usize,
    /// `Execute` failures that were logged and skipped.
    pub suppressed_failures: usize,
    /// Worst gap between a command's due time and its dispatch.
    pub max_lateness: Duration,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy)]
enum TimelineState {
    Pending,
    Running { started: Instant, cursor: usize },
    Done,
}

pub struct RealTimeExecutor {
    sleeper: SpinSleeper,
}

impl Default for RealTimeExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_SPIN_THRESHOLD)
    }
}

impl RealTimeExecutor {
    pub fn new(spin_threshold: Duration) -> Self {
        let accuracy_ns = u32::try_from(spin_threshold.as_nanos()).unwrap_or(u32::MAX);
        Self {
            sleeper: SpinSleeper::new(accuracy_ns).with_spin_strategy(SpinStrategy::SpinLoopHint),
        }
    }

    /// Dispatches every timeline of `plan` in order.  Devices must already
    /// be open.
    pub fn run(&self, plan: &ExecutionPlan, registry: &mut DeviceRegistry) -> ExecutionReport {
        let started = Instant::now();
        let mut report = ExecutionReport::default();

        for (index, timeline) in plan.timelines.iter().enumerate() {
            debug!(
                timeline = index,
                procedure = %timeline.procedure,
                commands = timeline.commands.len(),
                duration_ms = timeline.duration,
                "timeline started"
            );
            self.run_timeline(timeline, registry, &mut report);
            report.timelines += 1;
        }

        report.elapsed = started.elapsed();
        info!(
            timelines = report.timelines,
            commands = report.commands,
            suppressed_failures = report.suppressed_failures,
            max_lateness_us = report.max_lateness.as_micros() as u64,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "execution finished"
        );
        report
    }

    fn run_timeline(
        &self,
        timeline: &PlannedTimeline,
        registry: &mut DeviceRegistry,
        report: &mut ExecutionReport,
    ) {
        let mut state = TimelineState::Pending;
        loop {
            state = match state {
                TimelineState::Pending => TimelineState::Running {
                    started: Instant::now(),
                    cursor: 0,
                },
                TimelineState::Running { started, cursor } => match timeline.commands.get(cursor) {
                    Some(command) => {
                        let due = started + Duration::from_millis(command.start);
                        self.wait_until(due);
                        let lateness = Instant::now().saturating_duration_since(due);
                        report.max_lateness = report.max_lateness.max(lateness);

                        if let Err(e) = registry.execute(command.device, &command.params) {
                            warn!(
                                device = registry.name(command.device),
                                start_ms = command.start,
                                error = %e,
                                "command failed; continuing"
                            );
                            report.suppressed_failures += 1;
                        }
                        report.commands += 1;
                        TimelineState::Running {
                            started,
                            cursor: cursor + 1,
                        }
                    }
                    None => {
                        self.wait_until(started + Duration::from_millis(timeline.duration));
                        TimelineState::Done
                    }
                },
                TimelineState::Done => return,
            };
        }
    }

    fn wait_until(&self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            self.sleeper.sleep(deadline - now);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
