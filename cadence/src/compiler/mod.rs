/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Procedure / timeline compiler.
//!
//! Turns each locally defined procedure body into an ordered list of
//! [`Invokable`]s:
//!
//! | body element                 | compiles to                                  |
//! |------------------------------|----------------------------------------------|
//! | timed block                  | [`Timeline`] (cursor algorithm below)        |
//! | direct device invocation     | single-command, zero-duration [`Timeline`]   |
//! | local procedure invocation   | [`ProcedureInvocation`], empty substitution  |
//! | alias invocation             | [`ProcedureInvocation`] to the origin, carrying the alias's device bind |
//!
//! # Timeline cursor
//! A cursor starts at 0 ms.  An entry without a time spec is a point event
//! at the cursor.  `at` moves the cursor; `to` sets an absolute end, `for`
//! an end relative to the (possibly moved) cursor; the cursor then jumps to
//! the end.  Commands are dispatched in `(start, device name)` order, not
//! declaration order.
//!
//! Any error aborts the whole compilation; no device instance exists yet.

pub mod eval;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use crate::program::{
    BodyElement, DeviceBind, DeviceId, EndSpec, Expr, Invocation, LoadedProgram, ProcRef,
    TimedCommand,
};
pub use eval::{EvalError, Value};

// ── Compiled forms ────────────────────────────────────────────────────────────

/// One scheduled device command, times in milliseconds from timeline start.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub device: DeviceId,
    pub params: Vec<Value>,
    pub start: u64,
    pub end: u64,
}

/// Time-sorted, per-device conflict-free command schedule.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Timeline {
    pub commands: Vec<Command>,
    /// Latest command end; 0 for an empty timeline.
    pub duration: u64,
}

impl Timeline {
    /// Devices this timeline drives, derived from `commands`.
    pub fn devices(&self) -> BTreeSet<DeviceId> {
        self.commands.iter().map(|c| c.device).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureInvocation {
    /// Locally defined procedure to run (aliases are already resolved).
    pub target: ProcRef,
    /// Device substitution to push while `target` runs.
    pub substitution: DeviceBind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Invokable {
    Timeline(Timeline),
    Call(ProcedureInvocation),
}

/// Every locally defined procedure of a program, compiled.
#[derive(Debug, Clone, Default)]
pub struct CompiledProgram {
    pub procedures: BTreeMap<ProcRef, Vec<Invokable>>,
}

impl CompiledProgram {
    pub fn get(&self, proc_ref: &ProcRef) -> Option<&[Invokable]> {
        self.procedures.get(proc_ref).map(Vec::as_slice)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(
        "{}: procedure '{procedure}': device '{device}' command [{start}, {end}] ms overlaps \
         its previous command ending at {previous_end} ms",
        .path.display()
    )]
    Overlap {
        path: PathBuf,
        procedure: String,
        device: String,
        start: u64,
        end: u64,
        previous_end: u64,
    },

    #[error(
        "{}: procedure '{procedure}': device '{device}' command starts at {start} ms but ends at {end} ms",
        .path.display()
    )]
    InvalidRange {
        path: PathBuf,
        procedure: String,
        device: String,
        start: u64,
        end: u64,
    },

    #[error("{}: procedure '{procedure}': argument for device '{device}': {source}", .path.display())]
    Eval {
        path: PathBuf,
        procedure: String,
        device: String,
        #[source]
        source: EvalError,
    },

    #[error("{}: procedure '{procedure}' invokes unknown procedure '{name}'", .path.display())]
    UnknownProcedure {
        path: PathBuf,
        procedure: String,
        name: String,
    },
}

// ── Overlap check ─────────────────────────────────────────────────────────────

/// First pair of commands on one device where the later (in dispatch order)
/// starts before the earlier one ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapAt {
    pub device: DeviceId,
    pub start: u64,
    pub end: u64,
    pub previous_end: u64,
}

/// Scans `(device, start, end)` spans in dispatch order.
pub fn find_overlap(spans: impl IntoIterator<Item = (DeviceId, u64, u64)>) -> Option<OverlapAt> {
    let mut last_end: HashMap<DeviceId, u64> = HashMap::new();
    for (device, start, end) in spans {
        if let Some(&previous_end) = last_end.get(&device) {
            if start < previous_end {
                return Some(OverlapAt {
                    device,
                    start,
                    end,
                    previous_end,
                });
            }
        }
        last_end.insert(device, end);
    }
    None
}

// ── Compiler ──────────────────────────────────────────────────────────────────

/// Compiles every locally defined procedure of every file.
pub fn compile_program(program: &LoadedProgram) -> Result<CompiledProgram, CompileError> {
    let mut compiled = CompiledProgram::default();
    for file in &program.files {
        for procedure in file.procedures.values() {
            if !procedure.defined || procedure.is_alias() {
                continue;
            }
            let proc_ref = ProcRef::new(file.file, procedure.name.clone());
            let invokables = prepare_proc(program, &proc_ref)?;
            compiled.procedures.insert(proc_ref, invokables);
        }
    }
    info!(
        procedures = compiled.procedures.len(),
        timelines = compiled
            .procedures
            .values()
            .flatten()
            .filter(|i| matches!(i, Invokable::Timeline(_)))
            .count(),
        "program compiled"
    );
    Ok(compiled)
}

/// Compiles one locally defined procedure body.
pub fn prepare_proc(
    program: &LoadedProgram,
    proc_ref: &ProcRef,
) -> Result<Vec<Invokable>, CompileError> {
    let ctx = Context {
        program,
        proc_ref,
    };
    let Some(procedure) = program.procedure(proc_ref) else {
        return Err(ctx.unknown(&proc_ref.name));
    };

    let mut out = Vec::with_capacity(procedure.body.len());
    for element in &procedure.body {
        let invokable = match element {
            BodyElement::Timed(block) => Invokable::Timeline(ctx.timeline(&block.entries)?),
            BodyElement::Invoke(Invocation::Device { device, args }) => {
                let params = ctx.evaluate(*device, args)?;
                Invokable::Timeline(Timeline {
                    commands: vec![Command {
                        device: *device,
                        params,
                        start: 0,
                        end: 0,
                    }],
                    duration: 0,
                })
            }
            BodyElement::Invoke(Invocation::Procedure { name }) => {
                let Some(callee) = program
                    .file(proc_ref.file)
                    .and_then(|f| f.procedures.get(name))
                else {
                    return Err(ctx.unknown(name));
                };
                match &callee.origin {
                    Some(origin) => Invokable::Call(ProcedureInvocation {
                        target: origin.clone(),
                        substitution: callee.device_bind.clone(),
                    }),
                    None => Invokable::Call(ProcedureInvocation {
                        target: ProcRef::new(proc_ref.file, name.clone()),
                        substitution: Vec::new(),
                    }),
                }
            }
        };
        out.push(invokable);
    }

    debug!(procedure = %proc_ref, invokables = out.len(), "procedure compiled");
    Ok(out)
}

/// Compiles one timed block of `proc_ref`'s body.
pub fn prepare_timeline(
    program: &LoadedProgram,
    proc_ref: &ProcRef,
    entries: &[TimedCommand],
) -> Result<Timeline, CompileError> {
    Context {
        program,
        proc_ref,
    }
    .timeline(entries)
}

struct Context<'a> {
    program: &'a LoadedProgram,
    proc_ref: &'a ProcRef,
}

impl Context<'_> {
    fn path(&self) -> PathBuf {
        self.program.path(self.proc_ref.file).to_path_buf()
    }

    fn unknown(&self, name: &str) -> CompileError {
        CompileError::UnknownProcedure {
            path: self.path(),
            procedure: self.proc_ref.name.clone(),
            name: name.to_string(),
        }
    }

    fn evaluate(&self, device: DeviceId, args: &[Expr]) -> Result<Vec<Value>, CompileError> {
        args.iter()
            .map(|arg| {
                eval::eval(arg).map_err(|source| CompileError::Eval {
                    path: self.path(),
                    procedure: self.proc_ref.name.clone(),
                    device: self.program.device_name(device),
                    source,
                })
            })
            .collect()
    }

    fn timeline(&self, entries: &[TimedCommand]) -> Result<Timeline, CompileError> {
        let mut cursor = 0u64;
        let mut commands = Vec::with_capacity(entries.len());

        for entry in entries {
            let (start, end) = match entry.time {
                None => (cursor, cursor),
                Some(spec) => {
                    if let Some(at) = spec.start {
                        cursor = at;
                    }
                    let start = cursor;
                    let end = match spec.end {
                        EndSpec::To(to) => to,
                        EndSpec::For(length) => cursor.saturating_add(length),
                    };
                    cursor = end;
                    (start, end)
                }
            };
            commands.push(Command {
                device: entry.device,
                params: self.evaluate(entry.device, &entry.args)?,
                start,
                end,
            });
        }

        // Stable: equal keys keep declaration order.
        commands.sort_by_cached_key(|c| (c.start, self.program.device_name(c.device), c.device));

        if let Some(bad) = commands.iter().find(|c| c.start > c.end) {
            return Err(CompileError::InvalidRange {
                path: self.path(),
                procedure: self.proc_ref.name.clone(),
                device: self.program.device_name(bad.device),
                start: bad.start,
                end: bad.end,
            });
        }
        if let Some(overlap) = find_overlap(commands.iter().map(|c| (c.device, c.start, c.end))) {
            return Err(CompileError::Overlap {
                path: self.path(),
                procedure: self.proc_ref.name.clone(),
                device: self.program.device_name(overlap.device),
                start: overlap.start,
                end: overlap.end,
                previous_end: overlap.previous_end,
            });
        }

        let duration = commands.iter().map(|c| c.end).max().unwrap_or(0);
        Ok(Timeline { commands, duration })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
