/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Loader ⇄ grammar-thread handshake.
//!
//! Ordinary lines stream to the grammar thread over a bounded channel, so
//! the reader feels backpressure instead of buffering a whole file.  Before
//! a directive is handled the loader *pauses* the grammar:
//!
//! ```text
//! loader                               grammar thread
//!   │── Line ─────────────────────────►  parse
//!   │── Line ─────────────────────────►  parse
//!   │── Pause{accepted, resume} ──────►  (all earlier lines parsed)
//!   │◄──────────── accepted(healthy) ──  blocks on resume
//!   │   handle directive / nested load
//!   │── resume (on ParserPause drop) ─►  continues with next Line
//! ```
//!
//! The pause is a rendezvous: the loader never touches the shared
//! [`FileScope`] until the grammar has acknowledged, and the grammar holds
//! no lock while it waits.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::grammar::{GrammarParser, SyntaxError};
use crate::program::{FileId, FileScope};

// ── Messages ──────────────────────────────────────────────────────────────────

enum PipeMessage {
    Line { number: usize, text: String },
    Pause(PauseRequest),
}

struct PauseRequest {
    /// `true` while no syntax error has been seen so far.
    accepted: Sender<bool>,
    resume: Receiver<()>,
}

/// Why the grammar thread could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeClosed;

// ── ParserPipe ────────────────────────────────────────────────────────────────

/// Loader-side handle of one grammar thread.
pub struct ParserPipe {
    lines: Sender<PipeMessage>,
    worker: JoinHandle<Result<(), SyntaxError>>,
}

impl ParserPipe {
    /// Starts a grammar thread for `file`, parsing into `scope`.
    pub fn spawn(
        file: FileId,
        grammar: Box<dyn GrammarParser>,
        scope: Arc<Mutex<FileScope>>,
        capacity: usize,
    ) -> std::io::Result<Self> {
        let (lines, rx) = bounded(capacity.max(1));
        let worker = thread::Builder::new()
            .name(format!("grammar-{file}"))
            .spawn(move || run_grammar(grammar, scope, rx))?;
        Ok(Self { lines, worker })
    }

    /// Queues one non-directive line, blocking while the channel is full.
    pub fn feed(&self, number: usize, text: String) -> Result<(), PipeClosed> {
        self.lines
            .send(PipeMessage::Line { number, text })
            .map_err(|_| PipeClosed)
    }

    /// Waits until every queued line has been parsed and the grammar thread
    /// is parked.  The grammar resumes when the returned guard is dropped.
    pub fn pause(&self) -> Result<ParserPause, PipeClosed> {
        let (accepted_tx, accepted_rx) = bounded(0);
        let (resume_tx, resume_rx) = bounded(0);
        self.lines
            .send(PipeMessage::Pause(PauseRequest {
                accepted: accepted_tx,
                resume: resume_rx,
            }))
            .map_err(|_| PipeClosed)?;
        let healthy = accepted_rx.recv().map_err(|_| PipeClosed)?;
        trace!(healthy, "grammar paused");
        Ok(ParserPause {
            resume: Some(resume_tx),
            healthy,
        })
    }

    /// Closes the line stream and waits for the grammar's verdict.
    ///
    /// `Err(None)` means the grammar thread died without reporting.
    pub fn finish(self) -> Result<(), Option<SyntaxError>> {
        let Self { lines, worker } = self;
        drop(lines);
        match worker.join() {
            Ok(result) => result.map_err(Some),
            Err(_) => Err(None),
        }
    }
}

/// Guard for a paused grammar thread.
pub struct ParserPause {
    resume: Option<Sender<()>>,
    healthy: bool,
}

impl ParserPause {
    /// `false` if the grammar already failed on an earlier line; the caller
    /// should stop feeding and collect the error from [`ParserPipe::finish`].
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }
}

impl Drop for ParserPause {
    fn drop(&mut self) {
        if let Some(resume) = self.resume.take() {
            // Err only if the grammar thread is gone, in which case there is
            // nothing left to resume.
            let _ = resume.send(());
        }
    }
}

// ── Grammar thread ────────────────────────────────────────────────────────────

fn run_grammar(
    mut grammar: Box<dyn GrammarParser>,
    scope: Arc<Mutex<FileScope>>,
    rx: Receiver<PipeMessage>,
) -> Result<(), SyntaxError> {
    let mut failure: Option<SyntaxError> = None;

    for message in rx.iter() {
        match message {
            PipeMessage::Line { number, text } => {
                if failure.is_some() {
                    // Keep draining so the loader never blocks on a full channel.
                    continue;
                }
                let mut scope = scope.lock();
                if let Err(e) = grammar.parse_line(number, &text, &mut scope) {
                    debug!(error = %e, "grammar rejected line");
                    failure = Some(e);
                }
            }
            PipeMessage::Pause(request) => {
                if request.accepted.send(failure.is_none()).is_ok() {
                    let _ = request.resume.recv();
                }
            }
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }
    let mut scope = scope.lock();
    grammar.finish(&mut scope)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
