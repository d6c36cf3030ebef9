/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Symbol model shared by the loader, the grammar and the compiler.
//!
//! Two lifetimes are modelled:
//!
//! ```text
//! #device / #load / grammar lines ──►  FileScope  ──(file finished)──►  LoadedProgram
//!                                       ↑ mutable, one per file load      ↑ frozen, indexed by FileId
//! ```
//!
//! # Ownership model
//! A [`FileScope`] is owned by exactly one in-progress file load.  The
//! directive side and the grammar thread share it behind a mutex, but only
//! one of them touches it at a time (the grammar is paused while a directive
//! is handled).  Once the file finishes it is moved into the program-wide
//! table and never mutated again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ── Identities ────────────────────────────────────────────────────────────────

/// Index of a loaded file in [`LoadedProgram::files`].  The root file is `0`.
pub type FileId = usize;

/// `deviceType` tag for the built-in system devices (`Print`, `Wait`).
pub const SYSTEM_DEVICE_TYPE: &str = "#";

/// `deviceType` tag for serial transport devices.
pub const SERIAL_DEVICE_TYPE: &str = "serial";

/// Stable handle of a declared device: the declaring file plus the
/// declaration index inside that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    pub file: FileId,
    pub index: usize,
}

/// Fully-qualified procedure reference `(fileId, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcRef {
    pub file: FileId,
    pub name: String,
}

impl ProcRef {
    pub fn new(file: FileId, name: impl Into<String>) -> Self {
        Self {
            file,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ProcRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.file)
    }
}

/// A device substitution `(oldDevice, newDevice)` list, applied when an
/// aliased procedure is invoked.
pub type DeviceBind = Vec<(DeviceId, DeviceId)>;

// ── Devices ───────────────────────────────────────────────────────────────────

/// Positional serial parameters from `#device name = port, baud, ...`.
///
/// Kept as written; values are validated when the runtime instance is
/// constructed, not at declaration time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SerialSpec {
    pub port_name: String,
    pub baud_rate: u32,
    pub parity: Option<String>,
    pub data_bits: Option<u8>,
    pub stop_bits: Option<String>,
}

/// A device declared by a `#device` directive.  Immutable after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// [`SYSTEM_DEVICE_TYPE`], [`SERIAL_DEVICE_TYPE`], or a type tag supplied
    /// by an alternative front end.
    pub device_type: String,
    /// Ordered key/value property bag applied to the runtime instance.
    pub configuration: Vec<(String, String)>,
    /// Transport fields, present only for serial devices.
    pub serial: Option<SerialSpec>,
}

// ── Expressions ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Float(f64),
    String(String),
    /// A bare identifier in argument position.  Parsed, never evaluable.
    Variable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Literal),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn float(v: f64) -> Self {
        Expr::Const(Literal::Float(v))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expr::Const(Literal::String(s.into()))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

// ── Procedure bodies ──────────────────────────────────────────────────────────

/// End of a timed entry: absolute (`to`) or relative to its start (`for`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndSpec {
    To(u64),
    For(u64),
}

/// `[at <start>] (to <end> | for <duration>)`, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpec {
    pub start: Option<u64>,
    pub end: EndSpec,
}

/// One `(device, arguments, optional timeSpec)` entry of a timed block.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedCommand {
    pub device: DeviceId,
    pub args: Vec<Expr>,
    pub time: Option<TimeSpec>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimedBlock {
    pub entries: Vec<TimedCommand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// Direct device command, compiled as a zero-duration timeline.
    Device { device: DeviceId, args: Vec<Expr> },
    /// Procedure of the same file; whether it is local or an alias is
    /// decided by looking the name up at compile time.
    Procedure { name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BodyElement {
    Timed(TimedBlock),
    Invoke(Invocation),
}

/// A procedure table entry.
///
/// Three shapes occur:
/// * locally defined: `defined`, no `origin`, body present;
/// * forward reference: `!defined`, waiting for a body later in the file;
/// * alias created by `#load`: `defined`, `origin` set, empty body.
#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub name: String,
    pub defined: bool,
    pub origin: Option<ProcRef>,
    pub device_bind: DeviceBind,
    pub body: Vec<BodyElement>,
}

impl Procedure {
    pub fn forward(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defined: false,
            origin: None,
            device_bind: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn alias(name: impl Into<String>, origin: ProcRef, device_bind: DeviceBind) -> Self {
        Self {
            name: name.into(),
            defined: true,
            origin: Some(origin),
            device_bind,
            body: Vec::new(),
        }
    }

    pub fn is_alias(&self) -> bool {
        self.origin.is_some()
    }
}

// ── FileScope ─────────────────────────────────────────────────────────────────

/// Per-file symbol context: the devices and procedures visible while one
/// file is being loaded.
#[derive(Debug, Clone)]
pub struct FileScope {
    pub file: FileId,
    pub path: PathBuf,
    pub devices: Vec<Device>,
    /// `BTreeMap` so iteration (alias registration, undefined checks) is
    /// deterministic.
    pub procedures: BTreeMap<String, Procedure>,
}

impl FileScope {
    pub fn new(file: FileId, path: impl Into<PathBuf>) -> Self {
        Self {
            file,
            path: path.into(),
            devices: Vec::new(),
            procedures: BTreeMap::new(),
        }
    }

    pub fn device_by_name(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Declares a device.  Returns `None` if `name` is already taken in this
    /// file.
    pub fn add_device(
        &mut self,
        name: &str,
        device_type: &str,
        configuration: Vec<(String, String)>,
        serial: Option<SerialSpec>,
    ) -> Option<DeviceId> {
        if self.device_by_name(name).is_some() {
            return None;
        }
        let id = DeviceId {
            file: self.file,
            index: self.devices.len(),
        };
        self.devices.push(Device {
            id,
            name: name.to_string(),
            device_type: device_type.to_string(),
            configuration,
            serial,
        });
        Some(id)
    }

    /// Returns the entry for `name`, creating an undefined forward reference
    /// on first mention.
    pub fn procedure_entry(&mut self, name: &str) -> &mut Procedure {
        self.procedures
            .entry(name.to_string())
            .or_insert_with(|| Procedure::forward(name))
    }

    /// Supplies the body of `name`.  Returns `false` if the procedure already
    /// has a body (or is an alias).
    pub fn define_procedure(&mut self, name: &str, body: Vec<BodyElement>) -> bool {
        let entry = self.procedure_entry(name);
        if entry.defined {
            return false;
        }
        entry.defined = true;
        entry.body = body;
        true
    }

    pub fn is_procedure_defined(&self, name: &str) -> bool {
        self.procedures.get(name).is_some_and(|p| p.defined)
    }
}

// ── LoadedProgram ─────────────────────────────────────────────────────────────

/// Output of the loader: every file's frozen symbol table, indexed by
/// [`FileId`], plus the `#priority` value of the root file.
#[derive(Debug, Clone)]
pub struct LoadedProgram {
    pub files: Vec<FileScope>,
    /// High-priority window in seconds; `-1` when unset.
    pub priority_window: i64,
}

impl LoadedProgram {
    pub fn root(&self) -> Option<&FileScope> {
        self.files.first()
    }

    pub fn file(&self, id: FileId) -> Option<&FileScope> {
        self.files.get(id)
    }

    pub fn path(&self, id: FileId) -> &Path {
        self.files
            .get(id)
            .map(|f| f.path.as_path())
            .unwrap_or_else(|| Path::new("<unknown>"))
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.files.get(id.file)?.devices.get(id.index)
    }

    /// Device name for messages; falls back to the raw id.
    pub fn device_name(&self, id: DeviceId) -> String {
        self.device(id)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| format!("#{}:{}", id.file, id.index))
    }

    pub fn procedure(&self, r: &ProcRef) -> Option<&Procedure> {
        self.files.get(r.file)?.procedures.get(&r.name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids_follow_declaration_order() {
        let mut scope = FileScope::new(3, "a.cue");
        let a = scope.add_device("A", SYSTEM_DEVICE_TYPE, vec![], None).unwrap();
        let b = scope.add_device("B", SYSTEM_DEVICE_TYPE, vec![], None).unwrap();
        assert_eq!(a, DeviceId { file: 3, index: 0 });
        assert_eq!(b, DeviceId { file: 3, index: 1 });
        assert_eq!(scope.device_by_name("B").unwrap().id, b);
    }

    #[test]
    fn duplicate_device_name_is_refused() {
        let mut scope = FileScope::new(0, "a.cue");
        assert!(scope.add_device("Lamp", SERIAL_DEVICE_TYPE, vec![], None).is_some());
        assert!(scope.add_device("Lamp", SYSTEM_DEVICE_TYPE, vec![], None).is_none());
        assert_eq!(scope.devices.len(), 1);
    }

    #[test]
    fn forward_reference_is_filled_by_definition() {
        let mut scope = FileScope::new(0, "a.cue");
        scope.procedure_entry("Later");
        assert!(!scope.is_procedure_defined("Later"));

        assert!(scope.define_procedure("Later", vec![]));
        assert!(scope.is_procedure_defined("Later"));
        assert!(!scope.define_procedure("Later", vec![]), "second body must be refused");
    }

    #[test]
    fn alias_cannot_receive_a_body() {
        let mut scope = FileScope::new(0, "a.cue");
        scope
            .procedures
            .insert("Bar".into(), Procedure::alias("Bar", ProcRef::new(1, "Foo"), vec![]));
        assert!(!scope.define_procedure("Bar", vec![]));
        assert!(scope.procedures["Bar"].is_alias());
    }

    #[test]
    fn program_lookups_resolve_across_files() {
        let mut root = FileScope::new(0, "root.cue");
        root.add_device("Print", SYSTEM_DEVICE_TYPE, vec![], None);
        let mut lib = FileScope::new(1, "lib.cue");
        let lamp = lib.add_device("Lamp", SERIAL_DEVICE_TYPE, vec![], None).unwrap();
        lib.define_procedure("Foo", vec![]);

        let program = LoadedProgram {
            files: vec![root, lib],
            priority_window: -1,
        };
        assert_eq!(program.device_name(lamp), "Lamp");
        assert!(program.procedure(&ProcRef::new(1, "Foo")).is_some());
        assert!(program.procedure(&ProcRef::new(0, "Foo")).is_none());
        assert_eq!(program.device_name(DeviceId { file: 9, index: 0 }), "#9:0");
    }
}
