/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! End-to-end pipeline used by the binary.
//!
//! load → entry check → compile → plan (instances created) → pre-flight
//! `Test` → open → priority window → dispatch → close.
//!
//! Everything before "open" is structural: a failure there returns before
//! any device I/O happens.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::compiler::compile_program;
use crate::config::RuntimeConfig;
use crate::device::{serial_transports, stdout_sink, DeviceEnv};
use crate::executor::{ExecutionReport, PriorityWindow, RealTimeExecutor};
use crate::grammar::line_grammar;
use crate::loader::Linker;
use crate::registry::{DeviceRegistry, ExecutionPlan};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after the pre-flight test; nothing is opened or dispatched.
    pub dry_run: bool,
}

/// Runs the program rooted at `path` against real devices.  Returns `None`
/// for a dry run.
pub fn run(
    path: &Path,
    config: &RuntimeConfig,
    options: RunOptions,
) -> Result<Option<ExecutionReport>> {
    let env = DeviceEnv {
        print_sink: stdout_sink(),
        timestamp_format: config.timestamp_format.clone(),
        transports: serial_transports(),
    };
    run_with(path, config, options, DeviceRegistry::new(env))
}

/// [`run`] with a caller-supplied registry (and so caller-supplied sinks
/// and transports).
pub fn run_with(
    path: &Path,
    config: &RuntimeConfig,
    options: RunOptions,
    mut registry: DeviceRegistry,
) -> Result<Option<ExecutionReport>> {
    let program = Linker::new(line_grammar())
        .with_line_buffer(config.line_buffer)
        .load(path)
        .with_context(|| format!("Failed to load program: {}", path.display()))?;
    let entry = program.entry_point()?;

    let compiled = compile_program(&program).context("Compilation failed")?;
    let plan = ExecutionPlan::build(&program, &compiled, &entry, &mut registry)
        .context("Cannot build execution plan")?;
    plan.preflight(&registry)
        .context("Pre-flight device test failed")?;

    if options.dry_run {
        info!(
            timelines = plan.timelines.len(),
            commands = plan.command_count(),
            devices = registry.len(),
            "dry run complete; no device was opened"
        );
        return Ok(None);
    }

    if let Err(e) = registry.open_all() {
        registry.close_all();
        return Err(e).context("Cannot open devices");
    }

    let window = PriorityWindow::elevate(program.priority_window, config.elevated_nice);
    let report = RealTimeExecutor::new(config.spin_threshold).run(&plan, &mut registry);
    drop(window);

    registry.close_all();
    Ok(Some(report))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::{mock_env, MockTransport, SharedBuffer};
    use crate::loader::LoadError;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, src: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, src).unwrap();
        path
    }

    const BLINK: &str = r#"#device Print
#device Lamp = /dev/ttyS9, 115200
#priority -1
proc Main {
    Print("start")
    timeline {
        Lamp("on") for 10
        Lamp("off")
    }
    Print("done", 1 + 1)
}
"#;

    #[test]
    fn program_runs_end_to_end() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "blink.cue", BLINK);
        let mock = MockTransport::default();
        let sink = SharedBuffer::default();

        let report = run_with(
            &root,
            &RuntimeConfig::default(),
            RunOptions::default(),
            DeviceRegistry::new(mock_env(&mock, &sink)),
        )
        .unwrap()
        .unwrap();

        assert_eq!(report.timelines, 3);
        assert_eq!(report.commands, 4);
        assert_eq!(report.suppressed_failures, 0);
        assert_eq!(*mock.log.lock(), vec!["open", "write on", "write off", "close"]);
        assert_eq!(sink.contents(), "T start\nT done 2\n");
    }

    #[test]
    fn dry_run_opens_nothing() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "blink.cue", BLINK);
        let mock = MockTransport::default();

        let report = run_with(
            &root,
            &RuntimeConfig::default(),
            RunOptions { dry_run: true },
            DeviceRegistry::new(mock_env(&mock, &SharedBuffer::default())),
        )
        .unwrap();

        assert!(report.is_none());
        assert!(mock.log.lock().is_empty());
    }

    #[test]
    fn structural_errors_abort_before_any_device_io() {
        let dir = TempDir::new().unwrap();
        let mock = MockTransport::default();
        let cases = [
            "#device Lamp = /dev/ttyS9, 9600\nproc Main {\ntimeline {\nLamp(\"a\") at 0 for 50\nLamp(\"b\") at 10 for 5\n}\n}\n",
            "#device Lamp = /dev/ttyS9, 9600\nproc Main {\nLamp(1)\n}\n",
            "#device Lamp = /dev/ttyS9, 9600\nproc Other {\n}\n",
            "#device Lamp = /dev/ttyS9, 9600 with colour = red\nproc Main {\nLamp(\"x\")\n}\n",
        ];
        for (i, src) in cases.into_iter().enumerate() {
            let root = write(&dir, &format!("bad{i}.cue"), src);
            let result = run_with(
                &root,
                &RuntimeConfig::default(),
                RunOptions::default(),
                DeviceRegistry::new(mock_env(&mock, &SharedBuffer::default())),
            );
            assert!(result.is_err(), "case {i} should fail");
        }
        assert!(mock.log.lock().is_empty(), "no device may be opened");
    }

    #[test]
    fn oversized_wait_fails_preflight_before_open() {
        let dir = TempDir::new().unwrap();
        let mock = MockTransport::default();
        let src = format!(
            "#device Wait\n#device Lamp = /dev/ttyS9, 9600\nproc Main {{\nLamp(\"on\")\nWait(1{})\n}}\n",
            "0".repeat(300)
        );
        let root = write(&dir, "long_wait.cue", &src);
        let err = run_with(
            &root,
            &RuntimeConfig::default(),
            RunOptions::default(),
            DeviceRegistry::new(mock_env(&mock, &SharedBuffer::default())),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("Pre-flight"));
        assert!(mock.log.lock().is_empty());
    }

    #[test]
    fn load_errors_keep_their_type_in_the_chain() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "a.cue", "#load \"a.cue\"\n");
        let err = run(&root, &RuntimeConfig::default(), RunOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LoadError>(),
            Some(LoadError::LoadCycle { .. })
        ));
    }
}
