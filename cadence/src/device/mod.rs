/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Runtime device instances.
//!
//! A closed set of capabilities, matched exhaustively wherever device
//! behaviour is dispatched:
//!
//! | variant      | declared as                         | `Execute`                          |
//! |--------------|-------------------------------------|------------------------------------|
//! | `Print`      | `#device Print`                     | timestamped line on the print sink |
//! | `Wait`       | `#device Wait`                      | blocks for N ms                    |
//! | `Transport`  | `#device X = port, baud, ...`       | writes one string to the transport |
//!
//! [`DeviceInstance::test`] validates arguments without side effects and is
//! run over every planned command before anything is opened.

pub mod serial;

use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::compiler::Value;
use crate::program::{Device, SERIAL_DEVICE_TYPE, SYSTEM_DEVICE_TYPE};
use serial::{SerialConfig, SerialPort, Transport};

/// Default `Print` timestamp prefix (chrono format string).
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%H:%M:%S%.3f";

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device '{device}' is not declared")]
    Undeclared { device: String },

    #[error("device '{device}': unknown device type '{device_type}'")]
    UnknownDeviceType { device: String, device_type: String },

    #[error("device '{device}': unknown configuration key '{key}'")]
    UnknownConfigKey { device: String, key: String },

    #[error("device '{device}': {key} = '{value}' is invalid (expected {expected})")]
    InvalidConfigValue {
        device: String,
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("device '{device}': expected {expected}, got {found}")]
    ArgumentType {
        device: String,
        expected: &'static str,
        found: String,
    },

    #[error("device '{device}': {source}")]
    Io {
        device: String,
        #[source]
        source: io::Error,
    },
}

// ── Construction environment ──────────────────────────────────────────────────

/// Where `Print` lines go.  Shared by every `Print` instance of a run.
pub type PrintSink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Builds the driver for a serial device.
pub type TransportFactory = Arc<dyn Fn(&SerialConfig) -> Box<dyn Transport> + Send + Sync>;

pub fn stdout_sink() -> PrintSink {
    Arc::new(Mutex::new(Box::new(io::stdout())))
}

pub fn serial_transports() -> TransportFactory {
    Arc::new(|config: &SerialConfig| Box::new(SerialPort::new(config.clone())) as Box<dyn Transport>)
}

/// Shared inputs for constructing instances.
#[derive(Clone)]
pub struct DeviceEnv {
    pub print_sink: PrintSink,
    pub timestamp_format: String,
    pub transports: TransportFactory,
}

impl Default for DeviceEnv {
    fn default() -> Self {
        Self {
            print_sink: stdout_sink(),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            transports: serial_transports(),
        }
    }
}

// ── Instances ─────────────────────────────────────────────────────────────────

pub struct PrintDevice {
    sink: PrintSink,
    timestamp_format: String,
}

pub struct TransportDevice {
    name: String,
    config: SerialConfig,
    transport: Box<dyn Transport>,
    open: bool,
}

pub enum DeviceInstance {
    Print(PrintDevice),
    Wait,
    Transport(TransportDevice),
}

impl DeviceInstance {
    /// Builds the runtime instance for a declared device.  Nothing is
    /// opened here.
    pub fn create(device: &Device, env: &DeviceEnv) -> Result<Self, DeviceError> {
        match device.device_type.as_str() {
            SYSTEM_DEVICE_TYPE => {
                if let Some((key, _)) = device.configuration.first() {
                    return Err(DeviceError::UnknownConfigKey {
                        device: device.name.clone(),
                        key: key.clone(),
                    });
                }
                match device.name.as_str() {
                    "Print" => Ok(DeviceInstance::Print(PrintDevice {
                        sink: Arc::clone(&env.print_sink),
                        timestamp_format: env.timestamp_format.clone(),
                    })),
                    "Wait" => Ok(DeviceInstance::Wait),
                    _ => Err(DeviceError::UnknownDeviceType {
                        device: device.name.clone(),
                        device_type: SYSTEM_DEVICE_TYPE.to_string(),
                    }),
                }
            }
            SERIAL_DEVICE_TYPE => {
                let port_name = device
                    .serial
                    .as_ref()
                    .map(|s| s.port_name.as_str())
                    .unwrap_or_default();
                let config =
                    SerialConfig::from_properties(&device.name, port_name, &device.configuration)?;
                debug!(device = %device.name, port = %config, "transport instance created");
                Ok(DeviceInstance::Transport(TransportDevice {
                    name: device.name.clone(),
                    transport: (env.transports)(&config),
                    config,
                    open: false,
                }))
            }
            other => Err(DeviceError::UnknownDeviceType {
                device: device.name.clone(),
                device_type: other.to_string(),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeviceInstance::Print(_) => "Print",
            DeviceInstance::Wait => "Wait",
            DeviceInstance::Transport(_) => "Transport",
        }
    }

    /// Validates `args` for this device without side effects.
    pub fn test(&self, name: &str, args: &[Value]) -> Result<(), DeviceError> {
        let mismatch = |expected: &'static str| DeviceError::ArgumentType {
            device: name.to_string(),
            expected,
            found: describe(args),
        };
        match self {
            DeviceInstance::Print(_) if args.is_empty() => Err(mismatch("at least one argument")),
            DeviceInstance::Print(_) => Ok(()),
            DeviceInstance::Wait => match args {
                [Value::Float(ms)] if wait_duration(*ms).is_some() => Ok(()),
                _ => Err(mismatch("one non-negative number of milliseconds")),
            },
            DeviceInstance::Transport(_) => match args {
                [Value::Str(_)] => Ok(()),
                _ => Err(mismatch("one string")),
            },
        }
    }

    /// Performs the device's effect.  Arguments are assumed to have passed
    /// [`test`](Self::test).
    pub fn execute(&mut self, name: &str, args: &[Value]) -> Result<(), DeviceError> {
        let io_error = |source| DeviceError::Io {
            device: name.to_string(),
            source,
        };
        match self {
            DeviceInstance::Print(print) => {
                let text = args
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                let stamp = chrono::Local::now().format(&print.timestamp_format);
                let mut sink = print.sink.lock();
                writeln!(sink, "{stamp} {text}").map_err(io_error)?;
                sink.flush().map_err(io_error)
            }
            DeviceInstance::Wait => {
                let ms = args.first().and_then(Value::as_float).unwrap_or(0.0);
                let pause = wait_duration(ms).ok_or_else(|| DeviceError::ArgumentType {
                    device: name.to_string(),
                    expected: "one non-negative number of milliseconds",
                    found: describe(args),
                })?;
                thread::sleep(pause);
                Ok(())
            }
            DeviceInstance::Transport(dev) => {
                if !dev.open {
                    return Err(io_error(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "transport is not open",
                    )));
                }
                let text = args.first().and_then(Value::as_str).unwrap_or_default();
                dev.transport.write(text).map_err(io_error)
            }
        }
    }

    pub fn open(&mut self) -> Result<(), DeviceError> {
        match self {
            DeviceInstance::Transport(dev) if !dev.open => {
                dev.transport.open().map_err(|source| DeviceError::Io {
                    device: dev.name.clone(),
                    source,
                })?;
                dev.open = true;
                debug!(device = %dev.name, port = %dev.config.port_name, "transport opened");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn close(&mut self) -> Result<(), DeviceError> {
        match self {
            DeviceInstance::Transport(dev) if dev.open => {
                dev.open = false;
                dev.transport.close().map_err(|source| DeviceError::Io {
                    device: dev.name.clone(),
                    source,
                })
            }
            _ => Ok(()),
        }
    }
}

/// `Wait` pause for `ms` milliseconds; `None` if negative, NaN or too large
/// for a [`Duration`].
fn wait_duration(ms: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(ms / 1000.0).ok()
}

fn describe(args: &[Value]) -> String {
    if args.is_empty() {
        return "no arguments".into();
    }
    let kinds: Vec<&str> = args.iter().map(Value::kind).collect();
    format!("({})", kinds.join(", "))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::program::{DeviceId, SerialSpec};
    use std::time::Instant;

    /// In-memory transport recording every call.
    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        pub log: Arc<Mutex<Vec<String>>>,
        pub fail_writes: bool,
    }

    impl Transport for MockTransport {
        fn open(&mut self) -> io::Result<()> {
            self.log.lock().push("open".into());
            Ok(())
        }

        fn write(&mut self, text: &str) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            self.log.lock().push(format!("write {text}"));
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            self.log.lock().push("close".into());
            Ok(())
        }
    }

    /// Sink capturing `Print` output.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    pub(crate) fn mock_env(mock: &MockTransport, sink: &SharedBuffer) -> DeviceEnv {
        let mock = mock.clone();
        DeviceEnv {
            print_sink: Arc::new(Mutex::new(Box::new(sink.clone()))),
            timestamp_format: "T".into(),
            transports: Arc::new(move |_: &SerialConfig| Box::new(mock.clone()) as Box<dyn Transport>),
        }
    }

    fn system(name: &str) -> Device {
        Device {
            id: DeviceId { file: 0, index: 0 },
            name: name.into(),
            device_type: SYSTEM_DEVICE_TYPE.into(),
            configuration: vec![],
            serial: None,
        }
    }

    fn serial(name: &str, configuration: Vec<(String, String)>) -> Device {
        Device {
            id: DeviceId { file: 0, index: 1 },
            name: name.into(),
            device_type: SERIAL_DEVICE_TYPE.into(),
            configuration,
            serial: Some(SerialSpec {
                port_name: "/dev/ttyS0".into(),
                baud_rate: 9600,
                ..SerialSpec::default()
            }),
        }
    }

    // ── create ────────────────────────────────────────────────────────────────

    #[test]
    fn system_names_map_to_builtins() {
        let env = DeviceEnv::default();
        assert_eq!(DeviceInstance::create(&system("Print"), &env).unwrap().kind(), "Print");
        assert_eq!(DeviceInstance::create(&system("Wait"), &env).unwrap().kind(), "Wait");
        assert!(matches!(
            DeviceInstance::create(&system("Beep"), &env),
            Err(DeviceError::UnknownDeviceType { .. })
        ));
    }

    #[test]
    fn unknown_type_and_unknown_key_are_rejected() {
        let env = DeviceEnv::default();
        let mut odd = system("Print");
        odd.device_type = "can".into();
        assert!(matches!(
            DeviceInstance::create(&odd, &env),
            Err(DeviceError::UnknownDeviceType { ref device_type, .. }) if device_type == "can"
        ));

        let lamp = serial("Lamp", vec![("volume".into(), "11".into())]);
        assert!(matches!(
            DeviceInstance::create(&lamp, &env),
            Err(DeviceError::UnknownConfigKey { ref key, .. }) if key == "volume"
        ));
    }

    // ── test ──────────────────────────────────────────────────────────────────

    #[test]
    fn argument_checks_per_capability() {
        let env = DeviceEnv::default();
        let print = DeviceInstance::create(&system("Print"), &env).unwrap();
        let wait = DeviceInstance::create(&system("Wait"), &env).unwrap();
        let lamp = DeviceInstance::create(&serial("Lamp", vec![]), &env).unwrap();

        assert!(print.test("Print", &[Value::Float(1.0), Value::Str("x".into())]).is_ok());
        assert!(print.test("Print", &[]).is_err());

        assert!(wait.test("Wait", &[Value::Float(10.0)]).is_ok());
        assert!(wait.test("Wait", &[Value::Float(-1.0)]).is_err());
        assert!(wait.test("Wait", &[Value::Str("10".into())]).is_err());
        assert!(wait.test("Wait", &[Value::Float(f64::INFINITY)]).is_err());
        assert!(wait.test("Wait", &[Value::Float(1e300)]).is_err());

        assert!(lamp.test("Lamp", &[Value::Str("on".into())]).is_ok());
        let err = lamp.test("Lamp", &[Value::Float(1.0)]).unwrap_err();
        assert_eq!(err.to_string(), "device 'Lamp': expected one string, got (number)");
    }

    // ── execute ───────────────────────────────────────────────────────────────

    #[test]
    fn print_writes_timestamped_joined_line() {
        let sink = SharedBuffer::default();
        let env = mock_env(&MockTransport::default(), &sink);
        let mut print = DeviceInstance::create(&system("Print"), &env).unwrap();
        print
            .execute("Print", &[Value::Str("t =".into()), Value::Float(2.5)])
            .unwrap();
        assert_eq!(sink.contents(), "T t = 2.5\n");
    }

    #[test]
    fn wait_blocks_for_the_duration() {
        let mut wait = DeviceInstance::create(&system("Wait"), &DeviceEnv::default()).unwrap();
        let started = Instant::now();
        wait.execute("Wait", &[Value::Float(20.0)]).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wait_rejects_unrepresentable_pause_without_sleeping() {
        let mut wait = DeviceInstance::create(&system("Wait"), &DeviceEnv::default()).unwrap();
        let err = wait.execute("Wait", &[Value::Float(1e300)]).unwrap_err();
        assert!(matches!(err, DeviceError::ArgumentType { .. }));
    }

    #[test]
    fn transport_requires_open_and_closes_once() {
        let mock = MockTransport::default();
        let env = mock_env(&mock, &SharedBuffer::default());
        let mut lamp = DeviceInstance::create(&serial("Lamp", vec![]), &env).unwrap();

        assert!(lamp.execute("Lamp", &[Value::Str("early".into())]).is_err());
        lamp.open().unwrap();
        lamp.open().unwrap();
        lamp.execute("Lamp", &[Value::Str("on".into())]).unwrap();
        lamp.close().unwrap();
        lamp.close().unwrap();

        assert_eq!(*mock.log.lock(), vec!["open", "write on", "close"]);
    }
}
