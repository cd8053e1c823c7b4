use std::time::Duration;

use mqprobe::{CapacityProbe, Config, ProcessSampler, TracingObserver};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Run `cargo build --bin mqprobe-worker` first, or point MQPROBE_WORKER elsewhere.
    let mut config = Config::from_env()?;
    if std::env::var_os(mqprobe::config::WORKER_ENV).is_none() {
        config.worker_program = "target/debug/mqprobe-worker".into();
    }
    if std::env::var_os(mqprobe::config::DURATION_ENV).is_none() {
        // The null backend saturates fast; no need to wait long per level
        config.duration = Duration::from_secs(2);
    }

    let sampler = ProcessSampler::from_config(&config, TracingObserver);
    let peak = CapacityProbe::builder()
        .power(config.power)
        .observer(TracingObserver)
        .build()
        .probe_sampler(&sampler, |results| results.throughput())
        .await?;

    println!(
        "{} backend peaks at {} publishers with {:.0} msg/s",
        config.backend, peak.concurrency, peak.value
    );
    Ok(())
}
