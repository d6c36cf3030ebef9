/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Flattening the procedure graph into the sequential run.
//!
//! Starting at the entry procedure, every [`Invokable`] is expanded depth
//! first in body order.  Timelines are copied with each device resolved to
//! its final identity through the active [`SubstitutionChain`]; calls push
//! their device bind, recurse, and pop.  The result is the strictly
//! sequential list of timelines the executor dispatches.

use thiserror::Error;
use tracing::{debug, info};

use crate::compiler::{find_overlap, CompiledProgram, Invokable, Value};
use crate::device::DeviceError;
use crate::program::{DeviceId, LoadedProgram, ProcRef};

use super::{DeviceRegistry, SubstitutionChain};

// ── Plan ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCommand {
    /// Final (post-substitution) device identity.
    pub device: DeviceId,
    pub params: Vec<Value>,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTimeline {
    /// Procedure whose body produced this timeline.
    pub procedure: ProcRef,
    pub commands: Vec<PlannedCommand>,
    pub duration: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPlan {
    pub timelines: Vec<PlannedTimeline>,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("procedure '{procedure}' is invoked but was never compiled")]
    UnknownProcedure { procedure: String },

    #[error("recursive procedure invocation: {cycle}")]
    RecursiveInvocation { cycle: String },

    #[error(
        "procedure '{procedure}': after device substitution, '{device}' command \
         [{start}, {end}] ms overlaps its previous command ending at {previous_end} ms"
    )]
    Overlap {
        procedure: String,
        device: String,
        start: u64,
        end: u64,
        previous_end: u64,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl ExecutionPlan {
    /// Expands `entry` into the sequential timeline list, creating (not
    /// opening) every device instance it touches.
    pub fn build(
        program: &LoadedProgram,
        compiled: &CompiledProgram,
        entry: &ProcRef,
        registry: &mut DeviceRegistry,
    ) -> Result<Self, PlanError> {
        let mut builder = Builder {
            program,
            compiled,
            registry: &mut *registry,
            stack: Vec::new(),
            timelines: Vec::new(),
        };
        let mut chain = SubstitutionChain::new();
        builder.expand(entry, &mut chain)?;

        let plan = ExecutionPlan {
            timelines: builder.timelines,
        };
        info!(
            timelines = plan.timelines.len(),
            commands = plan.command_count(),
            devices = registry.len(),
            total_ms = plan.total_duration(),
            "execution plan built"
        );
        Ok(plan)
    }

    pub fn command_count(&self) -> usize {
        self.timelines.iter().map(|t| t.commands.len()).sum()
    }

    /// Sum of timeline durations (ignoring time spent inside `Execute`).
    pub fn total_duration(&self) -> u64 {
        self.timelines.iter().map(|t| t.duration).sum()
    }

    /// Runs `Test` over every planned command.  The first failure aborts.
    pub fn preflight(&self, registry: &DeviceRegistry) -> Result<(), DeviceError> {
        for command in self.timelines.iter().flat_map(|t| &t.commands) {
            registry.test(command.device, &command.params)?;
        }
        debug!(commands = self.command_count(), "pre-flight test passed");
        Ok(())
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

struct Builder<'c, 'r> {
    program: &'c LoadedProgram,
    compiled: &'c CompiledProgram,
    registry: &'r mut DeviceRegistry,
    /// Procedures currently being expanded, outermost first.
    stack: Vec<ProcRef>,
    timelines: Vec<PlannedTimeline>,
}

impl<'c> Builder<'c, '_> {
    fn expand(
        &mut self,
        proc_ref: &ProcRef,
        chain: &mut SubstitutionChain<'c>,
    ) -> Result<(), PlanError> {
        if self.stack.contains(proc_ref) {
            let mut cycle: Vec<String> = self
                .stack
                .iter()
                .skip_while(|p| *p != proc_ref)
                .map(|p| p.name.clone())
                .collect();
            cycle.push(proc_ref.name.clone());
            return Err(PlanError::RecursiveInvocation {
                cycle: cycle.join(" -> "),
            });
        }
        let compiled = self.compiled;
        let body = compiled
            .get(proc_ref)
            .ok_or_else(|| PlanError::UnknownProcedure {
                procedure: proc_ref.to_string(),
            })?;

        self.stack.push(proc_ref.clone());
        for invokable in body {
            match invokable {
                Invokable::Timeline(timeline) => {
                    let mut commands = Vec::with_capacity(timeline.commands.len());
                    for command in &timeline.commands {
                        commands.push(PlannedCommand {
                            device: self.registry.resolve(self.program, command.device, chain)?,
                            params: command.params.clone(),
                            start: command.start,
                            end: command.end,
                        });
                    }
                    self.push_timeline(proc_ref, commands, timeline.duration, chain.depth())?;
                }
                Invokable::Call(call) => {
                    debug!(
                        caller = %proc_ref,
                        target = %call.target,
                        bindings = call.substitution.len(),
                        "expanding call"
                    );
                    chain.push(&call.substitution);
                    let result = self.expand(&call.target, chain);
                    chain.pop();
                    result?;
                }
            }
        }
        self.stack.pop();
        Ok(())
    }

    fn push_timeline(
        &mut self,
        proc_ref: &ProcRef,
        mut commands: Vec<PlannedCommand>,
        duration: u64,
        depth: usize,
    ) -> Result<(), PlanError> {
        if depth > 0 {
            // Substitution may have renamed devices; restore dispatch order.
            let program = self.program;
            commands.sort_by_cached_key(|c| (c.start, program.device_name(c.device), c.device));
        }
        if let Some(overlap) = find_overlap(commands.iter().map(|c| (c.device, c.start, c.end))) {
            return Err(PlanError::Overlap {
                procedure: proc_ref.to_string(),
                device: self.program.device_name(overlap.device),
                start: overlap.start,
                end: overlap.end,
                previous_end: overlap.previous_end,
            });
        }
        self.timelines.push(PlannedTimeline {
            procedure: proc_ref.clone(),
            commands,
            duration,
        });
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_program;
    use crate::device::tests::{mock_env, MockTransport, SharedBuffer};
    use crate::grammar::line_grammar;
    use crate::loader::Linker;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        program: LoadedProgram,
        compiled: CompiledProgram,
        registry: DeviceRegistry,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let dir = TempDir::new().unwrap();
        for (name, src) in files {
            fs::write(dir.path().join(name), src).unwrap();
        }
        let program = Linker::new(line_grammar())
            .load(&dir.path().join(files[0].0))
            .unwrap();
        let compiled = compile_program(&program).unwrap();
        let registry =
            DeviceRegistry::new(mock_env(&MockTransport::default(), &SharedBuffer::default()));
        Fixture {
            _dir: dir,
            program,
            compiled,
            registry,
        }
    }

    fn build(f: &mut Fixture) -> Result<ExecutionPlan, PlanError> {
        let entry = f.program.entry_point().unwrap();
        ExecutionPlan::build(&f.program, &f.compiled, &entry, &mut f.registry)
    }

    #[test]
    fn body_order_is_depth_first() {
        let mut f = fixture(&[(
            "a.cue",
            "#device Print\nproc Main {\nPrint(\"1\")\nInner\nPrint(\"3\")\n}\nproc Inner {\nPrint(\"2\")\n}\n",
        )]);
        let plan = build(&mut f).unwrap();
        let texts: Vec<String> = plan
            .timelines
            .iter()
            .map(|t| t.commands[0].params[0].to_string())
            .collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
        assert_eq!(plan.timelines[1].procedure, ProcRef::new(0, "Inner"));
        assert_eq!(f.registry.len(), 1);
    }

    #[test]
    fn substitution_composes_across_nested_aliases() {
        let mut f = fixture(&[
            (
                "a.cue",
                "#device Strobe = /dev/null, 9600\n#load \"b.cue\" Led as Strobe\nproc Main {\nFlash\n}\n",
            ),
            (
                "b.cue",
                "#device Led = /dev/null, 9600\n#load \"c.cue\" Lamp as Led\nproc Flash {\nBlink\n}\n",
            ),
            ("c.cue", "#device Lamp = /dev/null, 9600\nproc Blink {\nLamp(\"on\")\n}\n"),
        ]);
        let plan = build(&mut f).unwrap();

        let strobe = f.program.files[0].device_by_name("Strobe").unwrap().id;
        assert_eq!(plan.timelines.len(), 1);
        assert_eq!(plan.timelines[0].commands[0].device, strobe);
        assert_eq!(f.registry.len(), 1, "only the final device is instantiated");
    }

    #[test]
    fn alias_call_plans_like_the_origin_modulo_devices() {
        let mut f = fixture(&[
            (
                "a.cue",
                "#device Led = /dev/null, 9600\n#load \"b.cue\" (Foo as Bar, Lamp as Led)\nproc Main {\nBar\n}\n",
            ),
            (
                "b.cue",
                "#device Lamp = /dev/null, 9600\nproc Foo {\ntimeline {\nLamp(\"on\") for 100\nLamp(\"off\") at 150 for 10\n}\n}\n",
            ),
        ]);
        let plan = build(&mut f).unwrap();
        let led = f.program.files[0].device_by_name("Led").unwrap().id;

        let Invokable::Timeline(origin) = &f.compiled.get(&ProcRef::new(1, "Foo")).unwrap()[0] else {
            panic!("Foo should compile to a timeline");
        };
        let planned = &plan.timelines[0];
        assert_eq!(planned.duration, origin.duration);
        assert_eq!(planned.commands.len(), origin.commands.len());
        for (p, o) in planned.commands.iter().zip(&origin.commands) {
            assert_eq!((p.start, p.end, &p.params), (o.start, o.end, &o.params));
            assert_eq!(p.device, led);
        }
    }

    #[test]
    fn recursion_is_rejected() {
        let mut f = fixture(&[(
            "a.cue",
            "#device Print\nproc Main {\nPing\n}\nproc Ping {\nPong\n}\nproc Pong {\nPing\n}\n",
        )]);
        let err = build(&mut f).unwrap_err();
        let PlanError::RecursiveInvocation { cycle } = err else {
            panic!("expected RecursiveInvocation, got {err}");
        };
        assert_eq!(cycle, "Ping -> Pong -> Ping");
    }

    #[test]
    fn devices_merged_by_substitution_are_rechecked_for_overlap() {
        let mut f = fixture(&[
            (
                "a.cue",
                "#device Both = /dev/null, 9600\n#load \"b.cue\" Left as Both, Right as Both\nproc Main {\nPair\n}\n",
            ),
            (
                "b.cue",
                "#device Left = /dev/null, 9600\n#device Right = /dev/null, 9600\nproc Pair {\ntimeline {\nLeft(\"l\") for 100\nRight(\"r\") at 0 for 100\n}\n}\n",
            ),
        ]);
        let err = build(&mut f).unwrap_err();
        assert!(matches!(err, PlanError::Overlap { ref device, .. } if device == "Both"));
    }

    #[test]
    fn preflight_reports_bad_arguments() {
        let mut f = fixture(&[("a.cue", "#device Wait\nproc Main {\nWait(\"soon\")\n}\n")]);
        let plan = build(&mut f).unwrap();
        let err = plan.preflight(&f.registry).unwrap_err();
        assert!(matches!(err, DeviceError::ArgumentType { .. }));
    }

    #[test]
    fn unknown_system_device_fails_while_planning() {
        let mut f = fixture(&[("a.cue", "#device Beep\nproc Main {\nBeep(\"x\")\n}\n")]);
        let err = build(&mut f).unwrap_err();
        assert!(matches!(err, PlanError::Device(DeviceError::UnknownDeviceType { .. })));
    }
}
