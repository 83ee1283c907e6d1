use anyhow::{Context, bail};
use tandem_config::TandemConfig;
use tandem_icc::{MmapBackend, SharedRecord, ShmBackend, WaitStrategy, WriteMode};
use tandem_record::Sample;
use tracing_subscriber::EnvFilter;

/// Usage: `tandem-monitor [CONFIG] [--set INTEGER FLOAT]`
struct Args {
    config: Option<String>,
    set: Option<Sample>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        config: None,
        set: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        if arg == "--set" {
            let integer = it.next().context("--set needs an integer")?;
            let fp = it.next().context("--set needs a float")?;
            args.set = Some(Sample::new(
                integer.parse().context("bad integer for --set")?,
                fp.parse().context("bad float for --set")?,
            ));
        } else if args.config.is_none() {
            args.config = Some(arg);
        } else {
            bail!("unexpected argument '{arg}'");
        }
    }
    Ok(args)
}

fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    let cfg = TandemConfig::load_or_default(args.config.as_deref()).context("failed to load config")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // The writer process may itself be double-buffering; a second writer has
    // to stay in place so the two never prepare the same spare slot.
    let backend = if args.set.is_some() {
        MmapBackend::open_rw::<Sample, _>(&cfg.shm_file_path).map(|b| b.with_mode(WriteMode::InPlace))
    } else {
        MmapBackend::open_ro::<Sample, _>(&cfg.shm_file_path)
    }
    .context("failed to open shared region")?;

    let wait = WaitStrategy::from_poll_interval(cfg.reader.poll_interval());
    let mut shared = SharedRecord::<_, Sample>::new(backend).with_wait_strategy(wait);

    if let Some(sample) = args.set {
        shared.write(sample).context("failed to update shared record")?;
        tracing::info!(integer = sample.integer, fp = sample.fp, "shared record updated");
        return Ok(());
    }

    tracing::info!(path = %cfg.shm_file_path, ?wait, "tandem monitor attached");
    loop {
        let record = shared.read().context("failed to read shared record")?;
        let stats = shared.stats();
        tracing::info!(
            integer = record.integer,
            fp = record.fp,
            sequence = shared.cached_sequence().unwrap_or_default(),
            active_offset = shared.backend().active_slot_offset()?,
            refreshes = stats.refreshes,
            retries = stats.retries,
            busy_polls = stats.busy_polls,
            "shared record"
        );
        std::thread::sleep(cfg.reader.report_interval());
    }
}
