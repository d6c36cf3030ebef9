/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Preprocessor directive handler.
//!
//! Lines whose first non-blank character is `#` never reach the grammar;
//! they are classified here into a [`Directive`] value.  The function is
//! pure: acting on a directive (declaring devices, loading files) is the
//! loader's job.
//!
//! ```text
//! #device <name> [= <port>, <baud>[, <parity>[, <dataBits>[, <stopBits>]]]] [with key = value, ...]
//! #load "<path>" [<old> as <new>, ...]
//! #priority <seconds>
//! ```

use thiserror::Error;

use crate::program::SerialSpec;

// ── Directive values ──────────────────────────────────────────────────────────

/// `#device` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDecl {
    pub name: String,
    /// Present when the `= port, baud, ...` part was given.
    pub serial: Option<SerialSpec>,
    /// `with key = value` pairs, in source order.
    pub properties: Vec<(String, String)>,
}

impl DeviceDecl {
    /// Flattens the positional serial fields and the `with` pairs into the
    /// ordered configuration bag stored on the device.
    pub fn configuration(&self) -> Vec<(String, String)> {
        let mut config = Vec::new();
        if let Some(spec) = &self.serial {
            config.push(("baud_rate".to_string(), spec.baud_rate.to_string()));
            if let Some(parity) = &spec.parity {
                config.push(("parity".to_string(), parity.clone()));
            }
            if let Some(bits) = spec.data_bits {
                config.push(("data_bits".to_string(), bits.to_string()));
            }
            if let Some(stop) = &spec.stop_bits {
                config.push(("stop_bits".to_string(), stop.clone()));
            }
        }
        config.extend(self.properties.iter().cloned());
        config
    }
}

/// `#load` directive: target path plus `old as new` substitutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadDecl {
    pub path: String,
    pub substitutions: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Device(DeviceDecl),
    Load(LoadDecl),
    Priority(i64),
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    #[error("unknown directive '#{0}' (valid: #device, #load, #priority)")]
    Unknown(String),

    #[error("malformed #{directive} directive: {message}")]
    Malformed {
        directive: &'static str,
        message: String,
    },
}

fn malformed(directive: &'static str, message: impl Into<String>) -> DirectiveError {
    DirectiveError::Malformed {
        directive,
        message: message.into(),
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Returns `true` for lines handled here rather than by the grammar.
pub fn is_directive(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Classifies one already-trimmed directive line.
pub fn parse_directive(line: &str) -> Result<Directive, DirectiveError> {
    let body = line
        .trim()
        .strip_prefix('#')
        .ok_or_else(|| DirectiveError::Unknown(line.trim().to_string()))?;
    let (keyword, rest) = split_word(body);

    match keyword {
        "device" => parse_device(rest).map(Directive::Device),
        "load" => parse_load(rest).map(Directive::Load),
        "priority" => parse_priority(rest).map(Directive::Priority),
        other => Err(DirectiveError::Unknown(other.to_string())),
    }
}

// ── #device ───────────────────────────────────────────────────────────────────

fn parse_device(rest: &str) -> Result<DeviceDecl, DirectiveError> {
    let (name, rest) = split_word(rest);
    if !is_identifier(name) {
        return Err(malformed("device", format!("'{name}' is not a valid device name")));
    }

    let (positional, with) = split_keyword(rest, "with");

    let serial = match positional.strip_prefix('=') {
        Some(spec) => Some(parse_serial_spec(spec)?),
        None if positional.is_empty() => None,
        None => {
            return Err(malformed(
                "device",
                format!("expected '=' or 'with' after '{name}', found '{positional}'"),
            ))
        }
    };

    let properties = match with {
        Some(list) => parse_properties(list)?,
        None => Vec::new(),
    };

    Ok(DeviceDecl {
        name: name.to_string(),
        serial,
        properties,
    })
}

fn parse_serial_spec(spec: &str) -> Result<SerialSpec, DirectiveError> {
    let fields: Vec<&str> = spec.split(',').map(str::trim).collect();
    if fields.len() < 2 || fields.len() > 5 {
        return Err(malformed(
            "device",
            "expected '= <port>, <baud>[, <parity>[, <dataBits>[, <stopBits>]]]'",
        ));
    }

    let port_name = unquote(fields[0]).to_string();
    if port_name.is_empty() {
        return Err(malformed("device", "port name is empty"));
    }
    let baud_rate = fields[1]
        .parse::<u32>()
        .map_err(|_| malformed("device", format!("baud rate '{}' is not an integer", fields[1])))?;
    let data_bits = match fields.get(3) {
        Some(raw) => Some(raw.parse::<u8>().map_err(|_| {
            malformed("device", format!("data bits '{raw}' is not an integer"))
        })?),
        None => None,
    };

    Ok(SerialSpec {
        port_name,
        baud_rate,
        parity: fields.get(2).map(|s| s.to_string()),
        data_bits,
        stop_bits: fields.get(4).map(|s| s.to_string()),
    })
}

fn parse_properties(list: &str) -> Result<Vec<(String, String)>, DirectiveError> {
    list.split(',')
        .map(str::trim)
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| malformed("device", format!("property '{pair}' has no '='")))?;
            let key = key.trim();
            if !is_identifier(key) {
                return Err(malformed("device", format!("property key '{key}' is not an identifier")));
            }
            Ok((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

// ── #load ─────────────────────────────────────────────────────────────────────

fn parse_load(rest: &str) -> Result<LoadDecl, DirectiveError> {
    let rest = rest
        .strip_prefix('"')
        .ok_or_else(|| malformed("load", "path must be a double-quoted string"))?;
    let close = rest
        .find('"')
        .ok_or_else(|| malformed("load", "unterminated path string"))?;
    let path = &rest[..close];
    if path.is_empty() {
        return Err(malformed("load", "path is empty"));
    }

    let mut list = rest[close + 1..].trim();
    if let Some(inner) = list.strip_prefix('(') {
        list = inner
            .strip_suffix(')')
            .ok_or_else(|| malformed("load", "unbalanced parenthesis in substitution list"))?
            .trim();
    }

    let mut substitutions = Vec::new();
    if !list.is_empty() {
        for pair in list.split(',') {
            let words: Vec<&str> = pair.split_whitespace().collect();
            match words.as_slice() {
                [old, "as", new] if is_identifier(old) && is_identifier(new) => {
                    substitutions.push((old.to_string(), new.to_string()));
                }
                _ => {
                    return Err(malformed(
                        "load",
                        format!("expected '<old> as <new>', found '{}'", pair.trim()),
                    ))
                }
            }
        }
    }

    Ok(LoadDecl {
        path: path.to_string(),
        substitutions,
    })
}

// ── #priority ─────────────────────────────────────────────────────────────────

fn parse_priority(rest: &str) -> Result<i64, DirectiveError> {
    rest.trim()
        .parse::<i64>()
        .map_err(|_| malformed("priority", format!("'{}' is not an integer", rest.trim())))
}

// ── Lexical helpers ───────────────────────────────────────────────────────────

/// Splits off the first whitespace-delimited word.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim()),
        None => (s, ""),
    }
}

/// Splits `s` at the first standalone occurrence of `keyword`.
fn split_keyword<'a>(s: &'a str, keyword: &str) -> (&'a str, Option<&'a str>) {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix(keyword) {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return ("", Some(rest.trim()));
        }
    }
    let needle = format!(" {keyword} ");
    match s.find(&needle) {
        Some(i) => (s[..i].trim(), Some(s[i + needle.len()..].trim())),
        None => (s, None),
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(s)
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ── Tests ─────────────────────────────────────────────────────────────────────
