use crate::error::{ConnectionError, TransmissionError};

/// A [`Sender`] publishes one message at a time through an already open connection.
///
/// Workers call [`Sender::send`] in a tight loop with a monotonically increasing payload
/// until they are told to stop, so implementations should keep per-call work to the
/// bare minimum: allocate buffers and prepare statements in [`Connector::connect`].
pub trait Sender {
    fn send(&mut self, payload: u64) -> Result<(), TransmissionError>;
}

impl<F> Sender for F
where
    F: FnMut(u64) -> Result<(), TransmissionError>,
{
    fn send(&mut self, payload: u64) -> Result<(), TransmissionError> {
        self(payload)
    }
}

/// A [`Connector`] is the plug point for a queue backend.
///
/// Every worker process calls [`Connector::connect`] exactly once, before the start
/// barrier, and then drives the returned [`Sender`] for the rest of the sample. Beyond
/// this contract the sampler treats connectors as stateless.
///
/// # Example
/// ```rust
/// use mqprobe::{Connector, Sender, error::{ConnectionError, TransmissionError}};
///
/// struct Counting;
///
/// impl Connector for Counting {
///     fn name(&self) -> &str {
///         "counting"
///     }
///
///     fn connect(&self) -> Result<Box<dyn Sender>, ConnectionError> {
///         let mut sent = 0u64;
///         Ok(Box::new(move |_payload: u64| -> Result<(), TransmissionError> {
///             sent += 1;
///             Ok(())
///         }))
///     }
/// }
/// ```
pub trait Connector {
    /// Backend label recorded in every [`crate::SampleDescription`].
    fn name(&self) -> &str;

    fn connect(&self) -> Result<Box<dyn Sender>, ConnectionError>;
}

/// A type-erased connector, as resolved at runtime from a backend name.
pub type BoxedConnector = Box<dyn Connector + Send + Sync>;

impl<C: Connector + ?Sized> Connector for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn connect(&self) -> Result<Box<dyn Sender>, ConnectionError> {
        (**self).connect()
    }
}

#[cfg(feature = "builtins")]
pub use builtins::*;

#[cfg(feature = "builtins")]
mod builtins {
    use std::time::Duration;

    use super::*;

    /// Discards every message. Sampling it measures the harness itself.
    #[derive(Debug, Clone, Default)]
    pub struct NullConnector;

    impl Connector for NullConnector {
        fn name(&self) -> &str {
            "null"
        }

        fn connect(&self) -> Result<Box<dyn Sender>, ConnectionError> {
            Ok(Box::new(|payload: u64| -> Result<(), TransmissionError> {
                std::hint::black_box(payload);
                Ok(())
            }))
        }
    }

    /// Never manages to connect.
    #[derive(Debug, Clone, Default)]
    pub struct RefusingConnector;

    impl Connector for RefusingConnector {
        fn name(&self) -> &str {
            "refuse"
        }

        fn connect(&self) -> Result<Box<dyn Sender>, ConnectionError> {
            Err(ConnectionError("connection refused".into()))
        }
    }

    /// Connects fine, then fails once `fail_after` messages went through.
    #[derive(Debug, Clone)]
    pub struct FaultyConnector {
        pub fail_after: u64,
    }

    impl Connector for FaultyConnector {
        fn name(&self) -> &str {
            "faulty"
        }

        fn connect(&self) -> Result<Box<dyn Sender>, ConnectionError> {
            let fail_after = self.fail_after;
            let mut sent = 0u64;
            Ok(Box::new(move |_payload: u64| -> Result<(), TransmissionError> {
                if sent >= fail_after {
                    return Err(TransmissionError(format!(
                        "backend dropped the connection after {sent} messages"
                    )));
                }
                sent += 1;
                Ok(())
            }))
        }
    }

    /// Spends `delay` on every message, like a backend with a fixed per-publish cost.
    #[derive(Debug, Clone)]
    pub struct DelayConnector {
        pub delay: Duration,
    }

    impl Connector for DelayConnector {
        fn name(&self) -> &str {
            "delay"
        }

        fn connect(&self) -> Result<Box<dyn Sender>, ConnectionError> {
            let delay = self.delay;
            Ok(Box::new(move |_payload: u64| -> Result<(), TransmissionError> {
                std::thread::sleep(delay);
                Ok(())
            }))
        }
    }

    /// Resolves a built-in connector from its command-line spelling:
    /// `null`, `refuse`, `faulty:<messages>` or `delay:<micros>`.
    pub fn connector_by_name(backend: &str) -> Option<BoxedConnector> {
        let (name, arg) = match backend.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (backend, None),
        };
        let connector: BoxedConnector = match (name, arg) {
            ("null", None) => Box::new(NullConnector),
            ("refuse", None) => Box::new(RefusingConnector),
            ("faulty", Some(n)) => Box::new(FaultyConnector {
                fail_after: n.parse().ok()?,
            }),
            ("delay", Some(us)) => Box::new(DelayConnector {
                delay: Duration::from_micros(us.parse().ok()?),
            }),
            _ => return None,
        };
        Some(connector)
    }
}
