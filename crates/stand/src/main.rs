use anyhow::Result;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use docbench_model::{DocumentSource, LineFileSource, SyntheticSource};
use docbench_stand::lifecycle::{self, RunSummary};
use docbench_stand::options::{self, Config};
use docbench_store::open_store;

fn setup_tracing(level: &str, verbose_store: bool) -> Result<()> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.parse()?)
        .from_env_lossy();
    if verbose_store {
        filter = filter.add_directive("docbench_store=debug".parse()?);
    }

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

fn execute(config: &Config) -> Result<RunSummary> {
    let setup = config.resolve()?;

    let source: Box<dyn DocumentSource> = match &setup.source_path {
        Some(path) => Box::new(LineFileSource::open(path)?),
        None => Box::new(SyntheticSource::new(
            setup.plan.seed,
            setup.plan.ingest.total_documents,
        )),
    };
    let store = open_store(setup.store_kind, setup.store_config)?;

    lifecycle::run(&setup.plan, source.as_ref(), store.as_ref())
}

fn main() -> Result<()> {
    let config = options::get_config()?;
    setup_tracing(&config.logging.level, config.store.verbose)?;
    tracing::info!("configuration loaded");
    tracing::debug!(?config, "full benchmark configuration");

    match execute(&config) {
        Ok(summary) => {
            let gb = summary.bytes_read as f64 / 1024.0 / 1024.0 / 1024.0;
            let hours = summary.elapsed.as_secs_f64() / 3600.0;
            tracing::info!(
                docs = summary.store_total,
                submitted = summary.submitted,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                bytes = summary.bytes_read,
                "benchmark finished"
            );
            if hours > 0.0 {
                tracing::info!("{:.3} GB/hour plain text", gb / hours);
            }
            Ok(())
        }
        Err(err) => {
            tracing::error!("benchmark run failed: {err:?}");
            std::process::exit(1);
        }
    }
}
