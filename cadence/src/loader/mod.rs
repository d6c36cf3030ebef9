/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! File loader / linker.
//!
//! [`Linker::load`] resolves the root file and, recursively, every `#load`
//! target, producing a [`LoadedProgram`] whose `files[0]` is the root.
//!
//! Per file:
//! 1. a fresh [`FileScope`] and grammar thread are created;
//! 2. ordinary lines stream to the grammar ([`pipe`]);
//! 3. each directive pauses the grammar, is applied to the scope
//!    (possibly recursing into another file with its own scope), then the
//!    grammar resumes;
//! 4. once the grammar finishes, every procedure must be defined and the
//!    scope is frozen into the program-wide table.
//!
//! The load graph (ancestor chain of files being loaded) is used only to
//! reject `#load` cycles; a file that finished loading earlier is reused.

pub mod pipe;

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::directive::{self, DeviceDecl, Directive, DirectiveError, LoadDecl};
use crate::grammar::{GrammarFactory, SyntaxError};
use crate::program::{
    FileId, FileScope, LoadedProgram, ProcRef, Procedure, SERIAL_DEVICE_TYPE, SYSTEM_DEVICE_TYPE,
};
use pipe::{ParserPipe, PipeClosed};

/// Default capacity of the line channel to the grammar thread.
pub const DEFAULT_LINE_BUFFER: usize = 64;

/// Name of the procedure the root file must define.
pub const ENTRY_POINT: &str = "Main";

// ── Errors ────────────────────────────────────────────────────────────────────

/// Chain of files forming a `#load` cycle, shown as `a -> b -> a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadChain(pub Vec<PathBuf>);

impl fmt::Display for LoadChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, path) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{}", path.display())?;
        }
        Ok(())
    }
}

/// Structural errors raised while loading.  Any of them aborts the run
/// before a device instance exists.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {source}", .path.display())]
    Directive {
        path: PathBuf,
        line: usize,
        #[source]
        source: DirectiveError,
    },

    #[error("{}: {source}", .path.display())]
    Syntax {
        path: PathBuf,
        #[source]
        source: SyntaxError,
    },

    #[error("{}: grammar thread stopped unexpectedly", .path.display())]
    ParserStopped { path: PathBuf },

    #[error("load cycle detected: {chain}")]
    LoadCycle { chain: LoadChain },

    #[error("{}:{line}: device '{device}' is already declared in this file", .path.display())]
    DuplicateDevice {
        path: PathBuf,
        line: usize,
        device: String,
    },

    #[error("{}:{line}: '{name}' is substituted more than once in one #load", .path.display())]
    DuplicateSubstitution {
        path: PathBuf,
        line: usize,
        name: String,
    },

    #[error("{}:{line}: procedure '{procedure}' is already defined", .path.display())]
    DuplicateDefinition {
        path: PathBuf,
        line: usize,
        procedure: String,
    },

    #[error("{}:{line}: substitution target '{device}' is not a device of this file", .path.display())]
    UnknownDevice {
        path: PathBuf,
        line: usize,
        device: String,
    },

    #[error("{}: procedure '{procedure}' is referenced but never defined", .path.display())]
    UndefinedProcedure { path: PathBuf, procedure: String },

    #[error("{}:{line}: high priority duration {value} is invalid (must be >= -1)", .path.display())]
    PriorityRange {
        path: PathBuf,
        line: usize,
        value: i64,
    },

    #[error("{}: entry procedure 'Main' not found", .path.display())]
    MissingEntryPoint { path: PathBuf },

    #[error("{}: entry procedure 'Main' must be defined in this file, not loaded", .path.display())]
    EntryPointIsAlias { path: PathBuf },
}

// ── Linker ────────────────────────────────────────────────────────────────────

/// Loads a multi-file program.  One `Linker` performs one load.
pub struct Linker {
    grammar: GrammarFactory,
    line_buffer: usize,
    /// Canonical path per file id, in load order.
    paths: Vec<PathBuf>,
    /// Frozen symbol tables; `None` while the file is still loading.
    files: Vec<Option<FileScope>>,
    /// Ancestor chain of the file currently being loaded.
    load_graph: Vec<FileId>,
    priority_window: i64,
}

impl Linker {
    pub fn new(grammar: GrammarFactory) -> Self {
        Self {
            grammar,
            line_buffer: DEFAULT_LINE_BUFFER,
            paths: Vec::new(),
            files: Vec::new(),
            load_graph: Vec::new(),
            priority_window: -1,
        }
    }

    /// Capacity of the line channel to each grammar thread.
    pub fn with_line_buffer(mut self, line_buffer: usize) -> Self {
        self.line_buffer = line_buffer.max(1);
        self
    }

    /// Loads `root` and everything it (transitively) loads.
    pub fn load(mut self, root: &Path) -> Result<LoadedProgram, LoadError> {
        info!(root = %root.display(), "loading program");
        self.load_file(root)?;

        let count = self.files.len();
        let files: Vec<FileScope> = self.files.into_iter().flatten().collect();
        if files.len() != count {
            // Every started load either finished or returned an error above.
            return Err(LoadError::ParserStopped {
                path: root.to_path_buf(),
            });
        }

        info!(
            files = files.len(),
            procedures = files.iter().map(|f| f.procedures.len()).sum::<usize>(),
            devices = files.iter().map(|f| f.devices.len()).sum::<usize>(),
            priority_window = self.priority_window,
            "program loaded"
        );
        Ok(LoadedProgram {
            files,
            priority_window: self.priority_window,
        })
    }

    fn load_file(&mut self, path: &Path) -> Result<FileId, LoadError> {
        let canonical = std::fs::canonicalize(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let file_id = self.paths.len();
        self.paths.push(canonical.clone());
        self.files.push(None);
        self.load_graph.push(file_id);
        debug!(file = file_id, path = %canonical.display(), depth = self.load_graph.len(), "loading file");

        let result = self.load_file_body(file_id, &canonical);
        self.load_graph.pop();

        let scope = result?;
        debug!(
            file = file_id,
            devices = scope.devices.len(),
            procedures = scope.procedures.len(),
            "file loaded"
        );
        self.files[file_id] = Some(scope);
        Ok(file_id)
    }

    fn load_file_body(&mut self, file_id: FileId, path: &Path) -> Result<FileScope, LoadError> {
        let io_error = |source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_error)?);

        let scope = Arc::new(Mutex::new(FileScope::new(file_id, path)));
        let pipe = ParserPipe::spawn(
            file_id,
            (self.grammar)(),
            Arc::clone(&scope),
            self.line_buffer,
        )
        .map_err(io_error)?;
        let stopped = || LoadError::ParserStopped {
            path: path.to_path_buf(),
        };

        for (index, line) in reader.lines().enumerate() {
            let number = index + 1;
            let line = line.map_err(io_error)?;
            let text = line.trim();

            if !directive::is_directive(text) {
                pipe.feed(number, text.to_string())
                    .map_err(|PipeClosed| stopped())?;
                continue;
            }

            let pause = pipe.pause().map_err(|PipeClosed| stopped())?;
            if !pause.is_healthy() {
                // The grammar already failed; its error is collected below.
                break;
            }

            let parsed = directive::parse_directive(text).map_err(|source| {
                LoadError::Directive {
                    path: path.to_path_buf(),
                    line: number,
                    source,
                }
            })?;
            match parsed {
                Directive::Device(decl) => Self::declare_device(&scope, &decl, path, number)?,
                Directive::Load(decl) => self.link(&scope, &decl, path, number)?,
                Directive::Priority(value) => self.set_priority(value, path, number)?,
            }
            drop(pause);
        }

        pipe.finish().map_err(|failure| match failure {
            Some(source) => LoadError::Syntax {
                path: path.to_path_buf(),
                source,
            },
            None => stopped(),
        })?;

        let scope = Arc::try_unwrap(scope)
            .map(Mutex::into_inner)
            .unwrap_or_else(|shared| shared.lock().clone());

        if let Some(undefined) = scope.procedures.values().find(|p| !p.defined) {
            return Err(LoadError::UndefinedProcedure {
                path: path.to_path_buf(),
                procedure: undefined.name.clone(),
            });
        }
        Ok(scope)
    }

    // ── #device ───────────────────────────────────────────────────────────────

    fn declare_device(
        scope: &Mutex<FileScope>,
        decl: &DeviceDecl,
        path: &Path,
        line: usize,
    ) -> Result<(), LoadError> {
        let device_type = if decl.serial.is_some() {
            SERIAL_DEVICE_TYPE
        } else {
            SYSTEM_DEVICE_TYPE
        };
        let id = scope
            .lock()
            .add_device(&decl.name, device_type, decl.configuration(), decl.serial.clone())
            .ok_or_else(|| LoadError::DuplicateDevice {
                path: path.to_path_buf(),
                line,
                device: decl.name.clone(),
            })?;
        debug!(device = %decl.name, device_type, ?id, "device declared");
        Ok(())
    }

    // ── #load ─────────────────────────────────────────────────────────────────

    fn link(
        &mut self,
        scope: &Mutex<FileScope>,
        decl: &LoadDecl,
        path: &Path,
        line: usize,
    ) -> Result<(), LoadError> {
        let requested = Path::new(&decl.path);
        let target = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            path.parent()
                .unwrap_or_else(|| Path::new("."))
                .join(requested)
        };
        let canonical = std::fs::canonicalize(&target).map_err(|source| LoadError::Io {
            path: target.clone(),
            source,
        })?;

        let loaded_id = match self.paths.iter().position(|p| *p == canonical) {
            Some(id) if self.load_graph.contains(&id) => {
                let mut chain: Vec<PathBuf> = self
                    .load_graph
                    .iter()
                    .map(|&f| self.paths[f].clone())
                    .collect();
                chain.push(canonical);
                return Err(LoadError::LoadCycle {
                    chain: LoadChain(chain),
                });
            }
            Some(id) => {
                debug!(file = id, path = %canonical.display(), "reusing loaded file");
                id
            }
            None => self.load_file(&canonical)?,
        };

        let Some(target_scope) = self.files.get(loaded_id).and_then(Option::as_ref) else {
            return Err(LoadError::ParserStopped { path: canonical });
        };

        let mut scope = scope.lock();

        // Device substitution: `old` names a device of the loaded file,
        // `new` a device of this one.  Pairs naming procedures are skipped.
        let mut seen = HashSet::new();
        let mut device_bind = Vec::new();
        for (old, new) in &decl.substitutions {
            if !seen.insert(old.as_str()) {
                return Err(LoadError::DuplicateSubstitution {
                    path: path.to_path_buf(),
                    line,
                    name: old.clone(),
                });
            }
            let Some(old_device) = target_scope.device_by_name(old) else {
                continue;
            };
            let new_device =
                scope
                    .device_by_name(new)
                    .ok_or_else(|| LoadError::UnknownDevice {
                        path: path.to_path_buf(),
                        line,
                        device: new.clone(),
                    })?;
            device_bind.push((old_device.id, new_device.id));
        }

        // Alias every procedure defined (not itself aliased) in the loaded file.
        for external in target_scope.procedures.values().filter(|p| !p.is_alias()) {
            let ident = decl
                .substitutions
                .iter()
                .find(|(old, _)| *old == external.name)
                .map(|(_, new)| new.clone())
                .unwrap_or_else(|| external.name.clone());

            if scope.procedures.contains_key(&ident) {
                return Err(LoadError::DuplicateDefinition {
                    path: path.to_path_buf(),
                    line,
                    procedure: ident,
                });
            }
            debug!(
                alias = %ident,
                origin = %external.name,
                file = loaded_id,
                bindings = device_bind.len(),
                "procedure aliased"
            );
            scope.procedures.insert(
                ident.clone(),
                Procedure::alias(
                    ident,
                    ProcRef::new(loaded_id, external.name.clone()),
                    device_bind.clone(),
                ),
            );
        }
        Ok(())
    }

    // ── #priority ─────────────────────────────────────────────────────────────

    fn set_priority(&mut self, value: i64, path: &Path, line: usize) -> Result<(), LoadError> {
        if self.load_graph.len() != 1 {
            debug!(value, path = %path.display(), "#priority outside the root file ignored");
            return Ok(());
        }
        if value < -1 {
            return Err(LoadError::PriorityRange {
                path: path.to_path_buf(),
                line,
                value,
            });
        }
        self.priority_window = value;
        Ok(())
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

impl LoadedProgram {
    /// The root file's `Main`, which must be defined locally.
    pub fn entry_point(&self) -> Result<ProcRef, LoadError> {
        let path = self.path(0).to_path_buf();
        let main = self
            .root()
            .and_then(|root| root.procedures.get(ENTRY_POINT))
            .ok_or_else(|| LoadError::MissingEntryPoint { path: path.clone() })?;
        if main.is_alias() {
            return Err(LoadError::EntryPointIsAlias { path });
        }
        Ok(ProcRef::new(0, ENTRY_POINT))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
