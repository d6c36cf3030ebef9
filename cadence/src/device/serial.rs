/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Serial transport configuration and the driver seam.
//!
//! [`SerialConfig::from_properties`] validates a device's configuration bag
//! when its runtime instance is constructed.  The physical driver sits
//! behind [`Transport`]; the bundled [`SerialPort`] writes to the port path
//! as a character device and, on Linux, applies the line settings with
//! termios when the path is a terminal.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::debug;

use super::DeviceError;

// ── Line settings ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl FromStr for Parity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Parity::None),
            "odd" => Ok(Parity::Odd),
            "even" => Ok(Parity::Even),
            "mark" => Ok(Parity::Mark),
            "space" => Ok(Parity::Space),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

impl FromStr for StopBits {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "one" => Ok(StopBits::One),
            "1.5" | "onepointfive" => Ok(StopBits::OnePointFive),
            "2" | "two" => Ok(StopBits::Two),
            _ => Err(()),
        }
    }
}

/// Flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Handshake {
    #[default]
    None,
    XonXoff,
    Rts,
    RtsXonXoff,
}

impl FromStr for Handshake {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Handshake::None),
            "xonxoff" => Ok(Handshake::XonXoff),
            "rts" | "requesttosend" => Ok(Handshake::Rts),
            "rtsxonxoff" | "requesttosendxonxoff" => Ok(Handshake::RtsXonXoff),
            _ => Err(()),
        }
    }
}

// ── SerialConfig ──────────────────────────────────────────────────────────────

/// Validated serial device configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub parity: Parity,
    /// 5 to 8.
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub handshake: Handshake,
    /// A write taking longer than this is reported as timed out.
    pub write_timeout: Option<Duration>,
    /// Appended to every write.
    pub new_line: String,
}

impl SerialConfig {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: 9600,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: StopBits::One,
            handshake: Handshake::None,
            write_timeout: None,
            new_line: String::new(),
        }
    }

    /// Applies `properties` in order on top of the defaults.  Later keys win.
    pub fn from_properties(
        device: &str,
        port_name: &str,
        properties: &[(String, String)],
    ) -> Result<Self, DeviceError> {
        let mut config = Self::new(port_name);
        for (key, value) in properties {
            let invalid = |expected: &'static str| DeviceError::InvalidConfigValue {
                device: device.to_string(),
                key: key.clone(),
                value: value.clone(),
                expected,
            };
            match key.as_str() {
                "baud_rate" => {
                    config.baud_rate = value
                        .parse()
                        .ok()
                        .filter(|&b| b > 0)
                        .ok_or_else(|| invalid("a positive integer"))?;
                }
                "parity" => {
                    config.parity = value
                        .parse()
                        .map_err(|()| invalid("none, odd, even, mark or space"))?;
                }
                "data_bits" => {
                    config.data_bits = value
                        .parse()
                        .ok()
                        .filter(|b| (5..=8).contains(b))
                        .ok_or_else(|| invalid("an integer from 5 to 8"))?;
                }
                "stop_bits" => {
                    config.stop_bits = value.parse().map_err(|()| invalid("1, 1.5 or 2"))?;
                }
                "handshake" => {
                    config.handshake = value
                        .parse()
                        .map_err(|()| invalid("none, xonxoff, rts or rtsxonxoff"))?;
                }
                "write_timeout" => {
                    let ms: u64 = value
                        .parse()
                        .map_err(|_| invalid("a non-negative integer (ms)"))?;
                    config.write_timeout = (ms > 0).then(|| Duration::from_millis(ms));
                }
                "new_line" => config.new_line = unescape(value),
                _ => {
                    return Err(DeviceError::UnknownConfigKey {
                        device: device.to_string(),
                        key: key.clone(),
                    })
                }
            }
        }
        Ok(config)
    }
}

impl fmt::Display for SerialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}{}{}",
            self.port_name,
            self.baud_rate,
            self.data_bits,
            match self.parity {
                Parity::None => 'N',
                Parity::Odd => 'O',
                Parity::Even => 'E',
                Parity::Mark => 'M',
                Parity::Space => 'S',
            },
            match self.stop_bits {
                StopBits::One => "1",
                StopBits::OnePointFive => "1.5",
                StopBits::Two => "2",
            }
        )
    }
}

/// `\n`, `\r`, `\t` and `\\` in a property value.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

// ── Transport seam ────────────────────────────────────────────────────────────

/// A byte sink a transport device writes its commands to.
pub trait Transport: Send {
    fn open(&mut self) -> io::Result<()>;

    fn write(&mut self, text: &str) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;
}

/// Serial port opened as a character device at `port_name`.
pub struct SerialPort {
    config: SerialConfig,
    file: Option<File>,
}

impl SerialPort {
    pub fn new(config: SerialConfig) -> Self {
        Self { config, file: None }
    }
}

impl Transport for SerialPort {
    fn open(&mut self) -> io::Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let file = OpenOptions::new().write(true).open(&self.config.port_name)?;
        configure_line(&file, &self.config)?;
        debug!(port = %self.config, "serial port opened");
        self.file = Some(file);
        Ok(())
    }

    fn write(&mut self, text: &str) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port is not open"))?;

        let started = Instant::now();
        file.write_all(text.as_bytes())?;
        file.write_all(self.config.new_line.as_bytes())?;
        file.flush()?;

        match self.config.write_timeout {
            Some(limit) if started.elapsed() > limit => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write took longer than {} ms", limit.as_millis()),
            )),
            _ => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(target_os = "linux")]
fn configure_line(file: &File, config: &SerialConfig) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    // SAFETY: `fd` belongs to `file`, which outlives every call below.
    if unsafe { libc::isatty(fd) } != 1 {
        return Ok(());
    }

    let speed = match config.baud_rate {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        460800 => libc::B460800,
        921600 => libc::B921600,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("baud rate {other} is not supported by this terminal driver"),
            ))
        }
    };

    // SAFETY: termios is plain old data; tcgetattr fills it before use.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `tio` was initialised by tcgetattr above.
    unsafe {
        libc::cfmakeraw(&mut tio);
        libc::cfsetispeed(&mut tio, speed);
        libc::cfsetospeed(&mut tio, speed);
    }

    tio.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::PARODD | libc::CMSPAR | libc::CSTOPB);
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cflag |= match config.data_bits {
        5 => libc::CS5,
        6 => libc::CS6,
        7 => libc::CS7,
        _ => libc::CS8,
    };
    tio.c_cflag |= match config.parity {
        Parity::None => 0,
        Parity::Even => libc::PARENB,
        Parity::Odd => libc::PARENB | libc::PARODD,
        Parity::Mark => libc::PARENB | libc::CMSPAR | libc::PARODD,
        Parity::Space => libc::PARENB | libc::CMSPAR,
    };
    // termios has no 1.5; the UART uses it automatically for 5 data bits.
    if config.stop_bits != StopBits::One {
        tio.c_cflag |= libc::CSTOPB;
    }

    tio.c_cflag &= !libc::CRTSCTS;
    tio.c_iflag &= !(libc::IXON | libc::IXOFF);
    if matches!(config.handshake, Handshake::Rts | Handshake::RtsXonXoff) {
        tio.c_cflag |= libc::CRTSCTS;
    }
    if matches!(config.handshake, Handshake::XonXoff | Handshake::RtsXonXoff) {
        tio.c_iflag |= libc::IXON | libc::IXOFF;
    }

    // SAFETY: `fd` is open and `tio` fully initialised.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn configure_line(_file: &File, config: &SerialConfig) -> io::Result<()> {
    debug!(port = %config.port_name, "line settings left to the platform driver");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
