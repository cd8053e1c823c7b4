//! The publisher side of a sample, run inside each worker process.
//!
//! A worker binary only has to pick a [`Connector`] and hand it to [`serve`]:
//!
//! ```rust,no_run
//! use mqprobe::{connector::NullConnector, worker};
//!
//! fn main() -> std::process::ExitCode {
//!     match worker::serve(&NullConnector) {
//!         Ok(()) => std::process::ExitCode::SUCCESS,
//!         Err(_) => std::process::ExitCode::FAILURE,
//!     }
//! }
//! ```
//!
//! stdout belongs to the protocol, so anything the worker logs must go to stderr.

use std::{
    io::{BufRead, BufReader, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use crate::{
    connector::Connector,
    error::{Error, Result},
    protocol::{self, ControlMessage, FailureStage, WORKER_ID_ENV, WorkerMessage},
};

/// Run a worker over this process's stdin and stdout.
pub fn serve<C: Connector + ?Sized>(connector: &C) -> Result<()> {
    let worker_id = worker_id_from_env()?;
    let input = BufReader::new(std::io::stdin());
    run(connector, worker_id, input, std::io::stdout())
}

fn worker_id_from_env() -> Result<usize> {
    let raw = std::env::var(WORKER_ID_ENV).map_err(|_| Error::Config {
        message: format!("{WORKER_ID_ENV} is not set; workers are started by the sampler"),
    })?;
    match raw.parse() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(Error::Config {
            message: format!("{WORKER_ID_ENV} must be a positive integer, got {raw:?}"),
        }),
    }
}

/// Drive one worker lifecycle over arbitrary streams.
///
/// Connects, reports `ready`, waits for `start`, sends until `stop` (or end of input), and
/// reports `finished`. A failed connect or send is reported as `failed` and returned as
/// an error; no result follows it.
pub fn run<C, R, W>(connector: &C, worker_id: usize, mut input: R, mut output: W) -> Result<()>
where
    C: Connector + ?Sized,
    R: BufRead + Send + 'static,
    W: Write,
{
    let mut sender = match connector.connect() {
        Ok(sender) => sender,
        Err(e) => {
            tracing::error!(worker_id, "{e}");
            reply(
                &mut output,
                &WorkerMessage::Failed {
                    stage: FailureStage::Connect,
                    reason: e.0.clone(),
                },
            )?;
            return Err(Error::Connection {
                worker_id,
                reason: e.0,
            });
        }
    };
    reply(&mut output, &WorkerMessage::Ready)?;

    match next_control(&mut input)? {
        Some(ControlMessage::Start) => {}
        Some(ControlMessage::Stop) | None => {
            tracing::info!(worker_id, "Sample called off before start");
            return Ok(());
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let watcher = spawn_stop_watcher(input, stop.clone());

    let start = Instant::now();
    let mut i: u64 = 0;
    while !stop.load(Ordering::Relaxed) {
        if let Err(e) = sender.send(i) {
            tracing::error!(worker_id, iterations = i, "{e}");
            reply(
                &mut output,
                &WorkerMessage::Failed {
                    stage: FailureStage::Send,
                    reason: e.0.clone(),
                },
            )?;
            return Err(Error::Transmission {
                worker_id,
                reason: e.0,
            });
        }
        i += 1;
    }
    let elapsed = start.elapsed();

    reply(
        &mut output,
        &WorkerMessage::Finished {
            iterations: i,
            elapsed,
        },
    )?;
    // the watcher raised the flag, so it has already returned
    let _ = watcher.join();
    tracing::debug!(worker_id, iterations = i, "Worker done");
    Ok(())
}

fn reply<W: Write>(output: &mut W, msg: &WorkerMessage) -> Result<()> {
    output.write_all(protocol::encode(msg)?.as_bytes())?;
    output.flush()?;
    Ok(())
}

fn next_control<R: BufRead>(input: &mut R) -> Result<Option<ControlMessage>> {
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            return protocol::decode(&line).map(Some);
        }
    }
}

/// Raise `stop` on the first `stop` message, end of input, or unreadable input.
fn spawn_stop_watcher<R>(mut input: R, stop: Arc<AtomicBool>) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        loop {
            match next_control(&mut input) {
                Ok(Some(ControlMessage::Start)) => {
                    tracing::warn!("Ignoring duplicate start");
                }
                Ok(Some(ControlMessage::Stop)) | Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Stopping on unreadable control input: {e}");
                    break;
                }
            }
        }
        stop.store(true, Ordering::Relaxed);
    })
}

#[cfg(all(test, feature = "builtins"))]
mod tests {
    use super::*;
    use crate::{
        connector::{FaultyConnector, NullConnector, RefusingConnector, Sender},
        error::{ConnectionError, TransmissionError},
    };
    use std::{
        io::{Cursor, Read},
        sync::{Mutex, atomic::AtomicU64, mpsc},
        time::Duration,
    };

    fn replies(out: &[u8]) -> Vec<WorkerMessage> {
        std::str::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| protocol::decode(l).unwrap())
            .collect()
    }

    /// Blocking reader fed line by line from the test, like a pipe.
    struct Pipe {
        rx: mpsc::Receiver<Vec<u8>>,
        pending: Cursor<Vec<u8>>,
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pending.position() as usize == self.pending.get_ref().len() {
                match self.rx.recv() {
                    Ok(chunk) => self.pending = Cursor::new(chunk),
                    Err(_) => return Ok(0),
                }
            }
            self.pending.read(buf)
        }
    }

    fn pipe() -> (mpsc::Sender<Vec<u8>>, BufReader<Pipe>) {
        let (tx, rx) = mpsc::channel();
        let pipe = Pipe {
            rx,
            pending: Cursor::new(Vec::new()),
        };
        (tx, BufReader::new(pipe))
    }

    #[test]
    fn runs_until_stopped() {
        let input = Cursor::new(b"{\"type\":\"start\"}\n{\"type\":\"stop\"}\n".to_vec());
        let mut out = Vec::new();
        run(&NullConnector, 1, input, &mut out).unwrap();

        let msgs = replies(&out);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], WorkerMessage::Ready);
        assert!(matches!(msgs[1], WorkerMessage::Finished { .. }));
    }

    #[test]
    fn reports_connection_failure_without_result() {
        let input = Cursor::new(Vec::new());
        let mut out = Vec::new();
        let err = run(&RefusingConnector, 4, input, &mut out).unwrap_err();

        assert!(matches!(err, Error::Connection { worker_id: 4, .. }));
        assert_eq!(
            replies(&out),
            vec![WorkerMessage::Failed {
                stage: FailureStage::Connect,
                reason: "connection refused".into()
            }]
        );
    }

    #[test]
    fn reports_send_failure_without_result() {
        let (tx, input) = pipe();
        tx.send(b"{\"type\":\"start\"}\n".to_vec()).unwrap();
        let mut out = Vec::new();
        let err = run(&FaultyConnector { fail_after: 5 }, 2, input, &mut out).unwrap_err();

        assert!(matches!(err, Error::Transmission { worker_id: 2, .. }));
        let msgs = replies(&out);
        assert_eq!(msgs[0], WorkerMessage::Ready);
        assert!(matches!(
            msgs[1],
            WorkerMessage::Failed {
                stage: FailureStage::Send,
                ..
            }
        ));
        assert_eq!(msgs.len(), 2);
    }

    #[test]
    fn exits_quietly_when_called_off() {
        let input = Cursor::new(b"{\"type\":\"stop\"}\n".to_vec());
        let mut out = Vec::new();
        run(&NullConnector, 1, input, &mut out).unwrap();
        assert_eq!(replies(&out), vec![WorkerMessage::Ready]);
    }

    #[test]
    fn end_of_input_stops_the_loop() {
        let input = Cursor::new(b"{\"type\":\"start\"}\n".to_vec());
        let mut out = Vec::new();
        run(&NullConnector, 1, input, &mut out).unwrap();
        assert!(matches!(replies(&out)[1], WorkerMessage::Finished { .. }));
    }

    struct Recording {
        sent: Arc<AtomicU64>,
        first_send: Arc<Mutex<Option<Instant>>>,
    }

    impl Connector for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn connect(&self) -> std::result::Result<Box<dyn Sender>, ConnectionError> {
            let sent = self.sent.clone();
            let first_send = self.first_send.clone();
            Ok(Box::new(move |_: u64| -> std::result::Result<(), TransmissionError> {
                first_send.lock().unwrap().get_or_insert_with(Instant::now);
                sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }))
        }
    }

    #[test]
    fn nothing_is_sent_before_start() {
        let sent = Arc::new(AtomicU64::new(0));
        let first_send = Arc::new(Mutex::new(None));
        let connector = Recording {
            sent: sent.clone(),
            first_send: first_send.clone(),
        };
        let (tx, input) = pipe();

        let worker = thread::spawn(move || {
            let mut out = Vec::new();
            run(&connector, 1, input, &mut out).map(|_| out)
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(sent.load(Ordering::Relaxed), 0);

        let released = Instant::now();
        tx.send(b"{\"type\":\"start\"}\n".to_vec()).unwrap();
        thread::sleep(Duration::from_millis(20));
        tx.send(b"{\"type\":\"stop\"}\n".to_vec()).unwrap();

        let out = worker.join().unwrap().unwrap();
        let first = first_send.lock().unwrap().expect("worker never sent");
        assert!(first >= released);
        match &replies(&out)[1] {
            WorkerMessage::Finished { iterations, .. } => {
                assert_eq!(*iterations, sent.load(Ordering::Relaxed))
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }
}
