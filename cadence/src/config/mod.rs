/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Runtime configuration loading.
//!
//! Everything is optional; an absent file, section or field falls back to
//! the defaults below.  The expected YAML structure is:
//! ```yaml
//! loader:
//!   line_buffer: 64
//! executor:
//!   spin_threshold_us: 2000
//!   elevated_nice: -20
//! devices:
//!   timestamp_format: "%H:%M:%S%.3f"
//! ```
//!
//! The high-priority window length is not configured here: it comes from
//! the root file's `#priority` directive.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::device::DEFAULT_TIMESTAMP_FORMAT;
use crate::executor::DEFAULT_SPIN_THRESHOLD;
use crate::loader::DEFAULT_LINE_BUFFER;

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuntimeConfigFile {
    #[serde(default)]
    loader: LoaderSection,
    #[serde(default)]
    executor: ExecutorSection,
    #[serde(default)]
    devices: DevicesSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoaderSection {
    line_buffer: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecutorSection {
    spin_threshold_us: Option<u64>,
    elevated_nice: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DevicesSection {
    timestamp_format: Option<String>,
}

// ── Public data structures ────────────────────────────────────────────────────

/// Default nice value applied during the high-priority window.
pub const DEFAULT_ELEVATED_NICE: i32 = -20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Capacity of the line channel between the loader and each grammar
    /// thread.
    pub line_buffer: usize,
    /// How long before a deadline the executor stops sleeping and spins.
    pub spin_threshold: Duration,
    /// `setpriority(2)` nice value during the high-priority window
    /// (`-20` is highest).
    pub elevated_nice: i32,
    /// chrono format string for the `Print` prefix.
    pub timestamp_format: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            line_buffer: DEFAULT_LINE_BUFFER,
            spin_threshold: DEFAULT_SPIN_THRESHOLD,
            elevated_nice: DEFAULT_ELEVATED_NICE,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Parses `path` on top of the defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is malformed or
    /// contains unknown keys, or a value is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading runtime configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let file: RuntimeConfigFile = if content.trim().is_empty() {
            warn!("Configuration file is empty, using defaults");
            RuntimeConfigFile::default()
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?
        };

        let config = Self::from_file(file)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        debug!(
            line_buffer = config.line_buffer,
            spin_threshold_us = config.spin_threshold.as_micros() as u64,
            elevated_nice = config.elevated_nice,
            timestamp_format = %config.timestamp_format,
            "runtime configuration loaded"
        );
        Ok(config)
    }

    fn from_file(file: RuntimeConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let line_buffer = match file.loader.line_buffer {
            Some(0) => bail!("loader.line_buffer must be at least 1"),
            Some(n) => n,
            None => defaults.line_buffer,
        };

        let elevated_nice = file.executor.elevated_nice.unwrap_or(defaults.elevated_nice);
        if !(-20..=19).contains(&elevated_nice) {
            bail!("executor.elevated_nice must be between -20 and 19, got {elevated_nice}");
        }

        let timestamp_format = file
            .devices
            .timestamp_format
            .unwrap_or(defaults.timestamp_format);
        if StrftimeItems::new(&timestamp_format).any(|item| matches!(item, Item::Error)) {
            bail!("devices.timestamp_format '{timestamp_format}' is not a valid chrono format");
        }

        Ok(Self {
            line_buffer,
            spin_threshold: file
                .executor
                .spin_threshold_us
                .map(Duration::from_micros)
                .unwrap_or(defaults.spin_threshold),
            elevated_nice,
            timestamp_format,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
