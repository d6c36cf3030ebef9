/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Grammar front end for non-directive lines.
//!
//! The loader only talks to the [`GrammarParser`] trait: lines arrive one
//! at a time, in file order, on the grammar thread, and every symbol the
//! grammar produces goes into the [`FileScope`] of the file being loaded.
//! [`LineGrammar`] is the bundled implementation:
//!
//! ```text
//! proc Main {
//!     Print("start")                 // direct device command
//!     Blink                          // procedure invocation
//!     timeline {
//!         Lamp("on") for 100
//!         Lamp("off") at 200 to 300
//!         Print("t=" + 300)
//!     }
//! }
//! proc Blink;                        // forward declaration
//! ```

pub mod lexer;

use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::program::{
    BinaryOp, BodyElement, DeviceId, EndSpec, Expr, FileScope, Invocation, Literal, TimeSpec,
    TimedBlock, TimedCommand,
};
use lexer::{tokenize, Token};

// ── Seam ──────────────────────────────────────────────────────────────────────

/// A stateful, line-at-a-time parser for the device/procedure language.
///
/// Implementations must keep all accumulated symbols in the supplied scope
/// (never in globals) so nested file loads stay isolated.
pub trait GrammarParser: Send {
    fn parse_line(&mut self, line: usize, text: &str, scope: &mut FileScope)
        -> Result<(), SyntaxError>;

    /// Called once after the last line of the file.
    fn finish(&mut self, scope: &mut FileScope) -> Result<(), SyntaxError>;
}

/// Creates one fresh parser per file load.
pub type GrammarFactory = Arc<dyn Fn() -> Box<dyn GrammarParser> + Send + Sync>;

/// Factory for the bundled [`LineGrammar`].
pub fn line_grammar() -> GrammarFactory {
    Arc::new(|| Box::new(LineGrammar::new()) as Box<dyn GrammarParser>)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("line {line}: procedure '{procedure}' is already defined")]
    DuplicateDefinition { line: usize, procedure: String },

    #[error("{what} opened on line {line} is never closed")]
    Unclosed { line: usize, what: &'static str },
}

fn malformed(line: usize, message: impl Into<String>) -> SyntaxError {
    SyntaxError::Malformed {
        line,
        message: message.into(),
    }
}

// ── LineGrammar ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct OpenProc {
    name: String,
    line: usize,
    body: Vec<BodyElement>,
    timeline: Option<(usize, Vec<TimedCommand>)>,
}

/// The bundled brace-delimited grammar.  Blocks never span files, so the
/// only state is the procedure (and timeline) currently open.
#[derive(Debug, Default)]
pub struct LineGrammar {
    open: Option<OpenProc>,
}

impl LineGrammar {
    pub fn new() -> Self {
        Self::default()
    }

    fn close_block(&mut self, line: usize, scope: &mut FileScope) -> Result<(), SyntaxError> {
        let Some(mut open) = self.open.take() else {
            return Err(malformed(line, "'}' without an open block"));
        };

        if let Some((_, entries)) = open.timeline.take() {
            open.body.push(BodyElement::Timed(TimedBlock { entries }));
            self.open = Some(open);
            return Ok(());
        }

        let OpenProc { name, body, .. } = open;
        trace!(procedure = %name, elements = body.len(), "procedure body closed");
        if !scope.define_procedure(&name, body) {
            return Err(SyntaxError::DuplicateDefinition {
                line,
                procedure: name,
            });
        }
        Ok(())
    }

    fn open_procedure(
        &mut self,
        line: usize,
        name: &str,
        scope: &mut FileScope,
    ) -> Result<(), SyntaxError> {
        if self.open.is_some() {
            return Err(malformed(line, "procedures cannot be nested"));
        }
        if scope.device_by_name(name).is_some() {
            return Err(malformed(line, format!("'{name}' is a device, not a procedure")));
        }
        if scope.is_procedure_defined(name) {
            return Err(SyntaxError::DuplicateDefinition {
                line,
                procedure: name.to_string(),
            });
        }
        self.open = Some(OpenProc {
            name: name.to_string(),
            line,
            body: Vec::new(),
            timeline: None,
        });
        Ok(())
    }

    fn statement(
        &mut self,
        line: usize,
        tokens: &[Token],
        scope: &mut FileScope,
    ) -> Result<(), SyntaxError> {
        let Some(open) = self.open.as_mut() else {
            return Err(malformed(line, "statement outside of a procedure body"));
        };

        let mut cursor = Cursor::new(line, tokens);
        let name = cursor.ident()?;
        let args = if cursor.eat(&Token::LParen) {
            cursor.arguments()?
        } else {
            Vec::new()
        };
        let time = cursor.time_spec()?;
        cursor.end()?;

        let device: Option<DeviceId> = scope.device_by_name(&name).map(|d| d.id);
        match (device, open.timeline.as_mut()) {
            (Some(device), Some((_, entries))) => {
                entries.push(TimedCommand { device, args, time });
            }
            (Some(device), None) => {
                if time.is_some() {
                    return Err(malformed(line, "timed entries belong inside a 'timeline' block"));
                }
                open.body.push(BodyElement::Invoke(Invocation::Device { device, args }));
            }
            (None, Some(_)) => {
                return Err(malformed(
                    line,
                    format!("timeline entries must target a device; '{name}' is not one"),
                ));
            }
            (None, None) => {
                if !args.is_empty() || time.is_some() {
                    return Err(malformed(
                        line,
                        format!("'{name}' is not a device; procedures take no arguments or times"),
                    ));
                }
                scope.procedure_entry(&name);
                open.body.push(BodyElement::Invoke(Invocation::Procedure { name }));
            }
        }
        Ok(())
    }
}

impl GrammarParser for LineGrammar {
    fn parse_line(
        &mut self,
        line: usize,
        text: &str,
        scope: &mut FileScope,
    ) -> Result<(), SyntaxError> {
        let tokens = tokenize(text).map_err(|message| malformed(line, message))?;

        match tokens.as_slice() {
            [] => Ok(()),
            [Token::RBrace] => self.close_block(line, scope),
            [Token::Ident(kw), Token::Ident(name), Token::LBrace] if kw == "proc" => {
                self.open_procedure(line, name, scope)
            }
            [Token::Ident(kw), Token::Ident(name), Token::Semicolon] if kw == "proc" => {
                if self.open.is_some() {
                    return Err(malformed(line, "forward declarations belong at top level"));
                }
                scope.procedure_entry(name);
                Ok(())
            }
            [Token::Ident(kw), Token::LBrace] if kw == "timeline" => match self.open.as_mut() {
                Some(open) if open.timeline.is_none() => {
                    open.timeline = Some((line, Vec::new()));
                    Ok(())
                }
                Some(_) => Err(malformed(line, "timeline blocks cannot be nested")),
                None => Err(malformed(line, "timeline block outside of a procedure body")),
            },
            [Token::Ident(kw), ..] if kw == "proc" || kw == "timeline" => {
                Err(malformed(line, format!("malformed '{kw}' header")))
            }
            tokens => self.statement(line, tokens, scope),
        }
    }

    fn finish(&mut self, _scope: &mut FileScope) -> Result<(), SyntaxError> {
        match &self.open {
            Some(OpenProc {
                timeline: Some((line, _)),
                ..
            }) => Err(SyntaxError::Unclosed {
                line: *line,
                what: "timeline block",
            }),
            Some(open) => Err(SyntaxError::Unclosed {
                line: open.line,
                what: "procedure body",
            }),
            None => Ok(()),
        }
    }
}

// ── Token cursor ──────────────────────────────────────────────────────────────

struct Cursor<'t> {
    line: usize,
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Cursor<'t> {
    fn new(line: usize, tokens: &'t [Token]) -> Self {
        Self {
            line,
            tokens,
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(s)) if s == kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        let found = self
            .peek()
            .map(Token::describe)
            .unwrap_or_else(|| "end of line".into());
        malformed(self.line, format!("expected {expected}, found {found}"))
    }

    fn ident(&mut self) -> Result<String, SyntaxError> {
        match self.peek() {
            Some(Token::Ident(s)) => {
                self.pos += 1;
                Ok(s.clone())
            }
            _ => Err(self.unexpected("a name")),
        }
    }

    fn end(&self) -> Result<(), SyntaxError> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(self.unexpected("end of line")),
        }
    }

    /// Comma-separated expressions up to and including `)`.
    fn arguments(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            return Err(self.unexpected("',' or ')'"));
        }
    }

    fn time_spec(&mut self) -> Result<Option<TimeSpec>, SyntaxError> {
        let start = if self.eat_keyword("at") {
            Some(self.millis()?)
        } else {
            None
        };
        let end = if self.eat_keyword("for") {
            Some(EndSpec::For(self.millis()?))
        } else if self.eat_keyword("to") {
            Some(EndSpec::To(self.millis()?))
        } else {
            None
        };
        match (start, end) {
            (_, Some(end)) => Ok(Some(TimeSpec { start, end })),
            (Some(_), None) => Err(self.unexpected("'for' or 'to' after the start time")),
            (None, None) => Ok(None),
        }
    }

    fn millis(&mut self) -> Result<u64, SyntaxError> {
        match self.peek() {
            Some(Token::Number { text, .. }) if text.bytes().all(|b| b.is_ascii_digit()) => {
                let value = text
                    .parse::<u64>()
                    .map_err(|_| malformed(self.line, format!("time {text} is out of range")))?;
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.unexpected("a non-negative integer time in milliseconds")),
        }
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    // term := atom (('*' | '/') atom)*
    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.atom()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.atom()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        match self.next() {
            Some(Token::Number { value, .. }) => Ok(Expr::float(*value)),
            Some(Token::Str(s)) => Ok(Expr::string(s.clone())),
            Some(Token::Ident(name)) => Ok(Expr::Const(Literal::Variable(name.clone()))),
            Some(Token::Minus) => match self.next() {
                Some(Token::Number { value, .. }) => Ok(Expr::float(-*value)),
                _ => {
                    self.pos -= 1;
                    Err(self.unexpected("a number after unary '-'"))
                }
            },
            Some(Token::LParen) => {
                let inner = self.expr()?;
                if self.eat(&Token::RParen) {
                    Ok(inner)
                } else {
                    Err(self.unexpected("')'"))
                }
            }
            _ => {
                self.pos -= 1;
                Err(self.unexpected("an expression"))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Procedure, SERIAL_DEVICE_TYPE, SYSTEM_DEVICE_TYPE};

    fn scope_with_devices() -> FileScope {
        let mut scope = FileScope::new(0, "test.cue");
        scope.add_device("Print", SYSTEM_DEVICE_TYPE, vec![], None);
        scope.add_device("Lamp", SERIAL_DEVICE_TYPE, vec![], None);
        scope
    }

    fn parse_all(scope: &mut FileScope, src: &str) -> Result<(), SyntaxError> {
        let mut grammar = LineGrammar::new();
        for (i, line) in src.lines().enumerate() {
            grammar.parse_line(i + 1, line.trim(), scope)?;
        }
        grammar.finish(scope)
    }

    fn body<'s>(scope: &'s FileScope, name: &str) -> &'s [BodyElement] {
        let proc: &Procedure = &scope.procedures[name];
        assert!(proc.defined, "{name} should be defined");
        &proc.body
    }

    // ── procedures ────────────────────────────────────────────────────────────

    #[test]
    fn procedure_with_direct_invocations() {
        let mut scope = scope_with_devices();
        parse_all(
            &mut scope,
            r#"
            proc Main {
                Print("hello", 1 + 2)
                Helper
            }
            proc Helper {
            }
            "#,
        )
        .unwrap();

        let main = body(&scope, "Main");
        assert_eq!(main.len(), 2);
        assert_eq!(
            main[0],
            BodyElement::Invoke(Invocation::Device {
                device: scope.device_by_name("Print").unwrap().id,
                args: vec![
                    Expr::string("hello"),
                    Expr::binary(BinaryOp::Add, Expr::float(1.0), Expr::float(2.0)),
                ],
            })
        );
        assert_eq!(
            main[1],
            BodyElement::Invoke(Invocation::Procedure {
                name: "Helper".into()
            })
        );
        assert!(scope.procedures["Helper"].defined);
    }

    #[test]
    fn mention_before_definition_creates_forward_reference() {
        let mut scope = scope_with_devices();
        parse_all(&mut scope, "proc Main {\nLater\n}").unwrap();
        assert!(!scope.procedures["Later"].defined);
    }

    #[test]
    fn second_body_is_duplicate_definition() {
        let mut scope = scope_with_devices();
        let err = parse_all(&mut scope, "proc A {\n}\nproc A {\n}").unwrap_err();
        assert_eq!(
            err,
            SyntaxError::DuplicateDefinition {
                line: 3,
                procedure: "A".into()
            }
        );
    }

    #[test]
    fn unclosed_procedure_is_reported_at_finish() {
        let mut scope = scope_with_devices();
        let err = parse_all(&mut scope, "proc Main {\nPrint(\"x\")").unwrap_err();
        assert_eq!(
            err,
            SyntaxError::Unclosed {
                line: 1,
                what: "procedure body"
            }
        );
    }

    // ── timelines ─────────────────────────────────────────────────────────────

    #[test]
    fn timeline_entries_carry_time_specs() {
        let mut scope = scope_with_devices();
        parse_all(
            &mut scope,
            r#"
            proc Main {
                timeline {
                    Lamp("on") for 100
                    Lamp("off") at 200 to 300
                    Print("mark")
                }
            }
            "#,
        )
        .unwrap();

        let lamp = scope.device_by_name("Lamp").unwrap().id;
        let print = scope.device_by_name("Print").unwrap().id;
        let BodyElement::Timed(block) = &body(&scope, "Main")[0] else {
            panic!("expected a timed block");
        };
        assert_eq!(
            block.entries,
            vec![
                TimedCommand {
                    device: lamp,
                    args: vec![Expr::string("on")],
                    time: Some(TimeSpec {
                        start: None,
                        end: EndSpec::For(100)
                    }),
                },
                TimedCommand {
                    device: lamp,
                    args: vec![Expr::string("off")],
                    time: Some(TimeSpec {
                        start: Some(200),
                        end: EndSpec::To(300)
                    }),
                },
                TimedCommand {
                    device: print,
                    args: vec![Expr::string("mark")],
                    time: None,
                },
            ]
        );
    }

    #[test]
    fn timeline_rejects_procedures_and_fractional_times() {
        let mut scope = scope_with_devices();
        assert!(parse_all(&mut scope, "proc Main {\ntimeline {\nHelper\n}\n}").is_err());

        let mut scope = scope_with_devices();
        assert!(parse_all(&mut scope, "proc Main {\ntimeline {\nLamp(\"x\") for 1.5\n}\n}").is_err());

        let mut scope = scope_with_devices();
        assert!(parse_all(&mut scope, "proc Main {\ntimeline {\nLamp(\"x\") at 5\n}\n}").is_err());
    }

    #[test]
    fn timed_entry_outside_timeline_is_rejected() {
        let mut scope = scope_with_devices();
        let err = parse_all(&mut scope, "proc Main {\nLamp(\"on\") for 10\n}").unwrap_err();
        assert!(matches!(err, SyntaxError::Malformed { line: 2, .. }));
    }

    // ── expressions ───────────────────────────────────────────────────────────

    #[test]
    fn expression_precedence_and_variables() {
        let mut scope = scope_with_devices();
        parse_all(&mut scope, "proc Main {\nPrint(\"a\" + 2 * x, -1)\n}").unwrap();
        let BodyElement::Invoke(Invocation::Device { args, .. }) = &body(&scope, "Main")[0] else {
            panic!("expected a device invocation");
        };
        assert_eq!(
            args[0],
            Expr::binary(
                BinaryOp::Add,
                Expr::string("a"),
                Expr::binary(
                    BinaryOp::Mul,
                    Expr::float(2.0),
                    Expr::Const(Literal::Variable("x".into()))
                ),
            )
        );
        assert_eq!(args[1], Expr::float(-1.0));
    }
}
