/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Device instance registry.
//!
//! Instances are created while the execution plan is built (single writer)
//! and only used afterwards, so no locking is involved.  They are memoized
//! per *final* device identity, i.e. after every active substitution has
//! been applied.
//!
//! # Substitution chain
//! Each call through an alias pushes that alias's device bind.  Resolution
//! walks the frames innermost first, so with `Y` (binds `d2 -> d3`) calling
//! `X` (binds `d1 -> d2`), a `d1` reference inside `X` becomes `d3`.

pub mod plan;

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::compiler::Value;
use crate::device::{DeviceEnv, DeviceError, DeviceInstance};
use crate::program::{DeviceId, LoadedProgram};

pub use plan::{ExecutionPlan, PlanError, PlannedCommand, PlannedTimeline};

// ── SubstitutionChain ─────────────────────────────────────────────────────────

/// Stack of active device binds, outermost first.
#[derive(Debug, Default, Clone)]
pub struct SubstitutionChain<'a> {
    frames: Vec<&'a [(DeviceId, DeviceId)]>,
}

impl<'a> SubstitutionChain<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: &'a [(DeviceId, DeviceId)]) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Applies every frame, innermost first.
    pub fn resolve(&self, device: DeviceId) -> DeviceId {
        self.frames.iter().rev().fold(device, |current, frame| {
            frame
                .iter()
                .find(|(old, _)| *old == current)
                .map(|&(_, new)| new)
                .unwrap_or(current)
        })
    }
}

// ── DeviceRegistry ────────────────────────────────────────────────────────────

struct Entry {
    name: String,
    instance: DeviceInstance,
}

pub struct DeviceRegistry {
    env: DeviceEnv,
    instances: BTreeMap<DeviceId, Entry>,
}

impl DeviceRegistry {
    pub fn new(env: DeviceEnv) -> Self {
        Self {
            env,
            instances: BTreeMap::new(),
        }
    }

    /// Resolves `device` through `chain` and returns the final identity,
    /// constructing its instance on first use.
    pub fn resolve(
        &mut self,
        program: &LoadedProgram,
        device: DeviceId,
        chain: &SubstitutionChain<'_>,
    ) -> Result<DeviceId, DeviceError> {
        let target = chain.resolve(device);
        if self.instances.contains_key(&target) {
            return Ok(target);
        }

        let declared = program
            .device(target)
            .ok_or_else(|| DeviceError::Undeclared {
                device: program.device_name(target),
            })?;
        let instance = DeviceInstance::create(declared, &self.env)?;
        debug!(
            device = %declared.name,
            file = target.file,
            kind = instance.kind(),
            substituted = target != device,
            "device instance created"
        );
        self.instances.insert(
            target,
            Entry {
                name: declared.name.clone(),
                instance,
            },
        );
        Ok(target)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn name(&self, id: DeviceId) -> &str {
        self.instances
            .get(&id)
            .map(|e| e.name.as_str())
            .unwrap_or("<unresolved>")
    }

    /// Pre-flight argument check for one command.
    pub fn test(&self, id: DeviceId, args: &[Value]) -> Result<(), DeviceError> {
        let entry = self.entry(id)?;
        entry.instance.test(&entry.name, args)
    }

    pub fn execute(&mut self, id: DeviceId, args: &[Value]) -> Result<(), DeviceError> {
        let entry = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| unresolved(id))?;
        entry.instance.execute(&entry.name, args)
    }

    /// Opens every transport.  Stops at the first failure; already opened
    /// instances are released by [`close_all`](Self::close_all).
    pub fn open_all(&mut self) -> Result<(), DeviceError> {
        for entry in self.instances.values_mut() {
            entry.instance.open()?;
        }
        info!(instances = self.instances.len(), "devices opened");
        Ok(())
    }

    /// Closes every open instance once.  Returns the number of failures,
    /// each of which is logged.
    pub fn close_all(&mut self) -> usize {
        let mut failures = 0;
        for entry in self.instances.values_mut() {
            if let Err(e) = entry.instance.close() {
                warn!(device = %entry.name, error = %e, "device close failed");
                failures += 1;
            }
        }
        debug!(instances = self.instances.len(), failures, "devices closed");
        failures
    }

    fn entry(&self, id: DeviceId) -> Result<&Entry, DeviceError> {
        self.instances.get(&id).ok_or_else(|| unresolved(id))
    }
}

fn unresolved(id: DeviceId) -> DeviceError {
    DeviceError::Undeclared {
        device: format!("#{}:{}", id.file, id.index),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::{mock_env, MockTransport, SharedBuffer};
    use crate::program::{FileScope, SerialSpec, SERIAL_DEVICE_TYPE, SYSTEM_DEVICE_TYPE};

    fn id(file: usize, index: usize) -> DeviceId {
        DeviceId { file, index }
    }

    fn three_file_program() -> LoadedProgram {
        let serial = || {
            Some(SerialSpec {
                port_name: "/dev/null".into(),
                baud_rate: 9600,
                ..SerialSpec::default()
            })
        };
        let mut files = Vec::new();
        for (file, name) in ["Strobe", "Led", "Lamp"].into_iter().enumerate() {
            let mut scope = FileScope::new(file, format!("{file}.cue"));
            scope.add_device(name, SERIAL_DEVICE_TYPE, vec![], serial());
            files.push(scope);
        }
        files[0].add_device("Print", SYSTEM_DEVICE_TYPE, vec![], None);
        LoadedProgram {
            files,
            priority_window: -1,
        }
    }

    // ── chain ─────────────────────────────────────────────────────────────────

    #[test]
    fn chain_applies_innermost_frame_first() {
        let outer = [(id(1, 0), id(0, 0))];
        let inner = [(id(2, 0), id(1, 0))];
        let mut chain = SubstitutionChain::new();
        chain.push(&outer);
        chain.push(&inner);

        assert_eq!(chain.resolve(id(2, 0)), id(0, 0));
        // Only reachable through the outer frame.
        assert_eq!(chain.resolve(id(1, 0)), id(0, 0));
        // Unbound devices pass through.
        assert_eq!(chain.resolve(id(0, 1)), id(0, 1));

        chain.pop();
        assert_eq!(chain.resolve(id(2, 0)), id(2, 0));
        assert_eq!(chain.depth(), 1);
    }

    // ── registry ──────────────────────────────────────────────────────────────

    #[test]
    fn instances_are_memoized_per_final_identity() {
        let program = three_file_program();
        let mut registry = DeviceRegistry::new(mock_env(&MockTransport::default(), &SharedBuffer::default()));

        let to_root = [(id(2, 0), id(0, 0))];
        let mut chain = SubstitutionChain::new();
        chain.push(&to_root);

        let a = registry.resolve(&program, id(2, 0), &chain).unwrap();
        let b = registry.resolve(&program, id(0, 0), &SubstitutionChain::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.name(a), "Strobe");
    }

    #[test]
    fn open_execute_close_reach_the_transport() {
        let program = three_file_program();
        let mock = MockTransport::default();
        let sink = SharedBuffer::default();
        let mut registry = DeviceRegistry::new(mock_env(&mock, &sink));

        let lamp = registry.resolve(&program, id(2, 0), &SubstitutionChain::new()).unwrap();
        let print = registry.resolve(&program, id(0, 1), &SubstitutionChain::new()).unwrap();

        registry.test(lamp, &[Value::Str("on".into())]).unwrap();
        assert!(registry.test(print, &[]).is_err());

        registry.open_all().unwrap();
        registry.execute(lamp, &[Value::Str("on".into())]).unwrap();
        registry.execute(print, &[Value::Str("done".into())]).unwrap();
        assert_eq!(registry.close_all(), 0);

        assert_eq!(*mock.log.lock(), vec!["open", "write on", "close"]);
        assert_eq!(sink.contents(), "T done\n");
    }

    #[test]
    fn unresolved_device_cannot_execute() {
        let mut registry = DeviceRegistry::new(DeviceEnv::default());
        assert!(registry.execute(id(0, 0), &[]).is_err());
        assert!(registry.is_empty());
    }
}
