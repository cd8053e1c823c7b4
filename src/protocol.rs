//! Line protocol between the sampler and its worker processes.
//!
//! Each message is one JSON object on its own line. The worker speaks on stdout and
//! listens on stdin; stderr is left free for logs.
//!
//! ```text
//! controller                      worker
//!     |                             | connect()
//!     | <--------- ready / failed --|
//!  [barrier]                        |
//!     |-- start ------------------> | send loop
//!     |-- stop -------------------> |
//!     | <------------- finished ----|
//! ```
//!
//! A worker that sees its stdin close treats it as `stop` (or, before `start`, as the
//! sample being called off).

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{error::Result, macros::message};

/// Environment variable carrying the 1-based worker id into the worker process.
pub const WORKER_ID_ENV: &str = "MQPROBE_WORKER_ID";

/// Worker → controller.
#[message]
pub enum WorkerMessage {
    /// Connected; waiting at the start barrier
    Ready,
    /// Gave up; no result will follow
    Failed { stage: FailureStage, reason: String },
    /// The send loop ended after the stop signal
    Finished { iterations: u64, elapsed: Duration },
}

/// Where in its lifecycle a worker failed.
#[derive(serde::Serialize, serde::Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Connect,
    Send,
}

/// Controller → worker.
#[message]
pub enum ControlMessage {
    Start,
    Stop,
}

/// Encode `msg` as a single protocol line.
pub fn encode<T: serde::Serialize>(msg: &T) -> Result<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Decode one protocol line. Surrounding whitespace is ignored.
pub fn decode<T: serde::de::DeserializeOwned>(line: &str) -> Result<T> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Read the next message, or `None` on end of stream. Blank lines are skipped.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            return decode(&line).map(Some);
        }
    }
}

/// Write one message and flush it, so the peer sees it immediately.
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    writer.write_all(encode(msg)?.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
