/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cadence – timed device choreography runtime
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── program/      – symbol model: devices, procedures, file scopes
//! ├── directive/    – `#device` / `#load` / `#priority` parsing
//! ├── grammar/      – GrammarParser seam + bundled line grammar
//! ├── loader/       – multi-file loader / linker, grammar-thread pipe
//! ├── compiler/     – procedure & timeline compiler, expression evaluator
//! ├── device/       – Print / Wait / Transport instances, serial config
//! ├── registry/     – device instance registry, execution plan
//! ├── executor/     – real-time dispatch loop, high-priority window
//! ├── config/       – YAML runtime configuration
//! └── runtime       – end-to-end pipeline used by the binary
//! ```

pub mod compiler;
pub mod config;
pub mod device;
pub mod directive;
pub mod executor;
pub mod grammar;
pub mod loader;
pub mod program;
pub mod registry;
pub mod runtime;
