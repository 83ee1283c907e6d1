use anyhow::Context;
use std::time::{Duration, Instant};
use tandem_config::{TandemConfig, WriteModeConfig};
use tandem_icc::{MmapBackend, ShmBackend, WriteMode};
use tandem_record::Sample;
use tracing_subscriber::EnvFilter;

/// Initial record; readers attaching before the first write see this.
const SEED: Sample = Sample {
    integer: 42,
    fp: 23.42,
};

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let cfg = TandemConfig::load_or_default(config_path.as_deref()).context("failed to load config")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mode = match cfg.writer.mode {
        WriteModeConfig::InPlace => WriteMode::InPlace,
        WriteModeConfig::DoubleBuffered => WriteMode::DoubleBuffered,
    };
    let mut backend = MmapBackend::create(&cfg.shm_file_path, &SEED)
        .context("failed to create shared region")?
        .with_mode(mode);

    if cfg.writer.lock_memory {
        if let Err(e) = backend.lock_memory() {
            tracing::warn!(error = %e, "could not lock shared region into memory");
        }
    }

    let period = cfg.writer.period();
    tracing::info!(path = %cfg.shm_file_path, ?mode, ?period, "tandem writer publishing");

    let mut value = SEED;
    let mut next = Instant::now();
    let mut last_report = Instant::now();
    let mut count: u64 = 0;

    loop {
        value.integer = value.integer.wrapping_add(1);
        value.fp *= 1.0001;
        if !value.fp.is_finite() {
            value.fp = SEED.fp;
        }
        backend.write_record(&value).context("write failed")?;
        count += 1;

        if last_report.elapsed() >= Duration::from_secs(1) {
            tracing::info!(
                rate = count,
                integer = value.integer,
                fp = value.fp,
                sequence = backend.sequence()?,
                "writes in the last second"
            );
            count = 0;
            last_report = Instant::now();
        }

        // Fixed-rate loop: sleep to the next deadline, never drift.
        next += period;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else {
            next = now;
        }
    }
}
