//! Worker process for the built-in connectors.
//!
//! Started by the `ProcessSampler` as `mqprobe-worker <backend>`, where `<backend>` is
//! one of `null`, `refuse`, `faulty:<messages>` or `delay:<micros>`.

use std::process::ExitCode;

use mqprobe::{connector::connector_by_name, worker};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // stdout carries the worker protocol
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Some(backend) = std::env::args().nth(1) else {
        eprintln!("usage: mqprobe-worker <backend>");
        return ExitCode::from(2);
    };
    let Some(connector) = connector_by_name(&backend) else {
        eprintln!("unknown backend {backend:?}");
        return ExitCode::from(2);
    };

    match worker::serve(&connector) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
