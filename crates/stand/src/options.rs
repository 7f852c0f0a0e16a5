use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use figment::Figment;
use figment::providers::{Format, Serialized, Toml};
use project_root::get_project_root;
use serde::{Deserialize, Serialize};

use docbench_model::KeyEncoding;
use docbench_store::{StoreConfig, StoreKind};

use crate::groups::GroupingContext;
use crate::lifecycle::RunPlan;
use crate::worker::{IngestMode, IngestPlan};

/// A single, unified struct holding all benchmark settings, deserialized
/// from the TOML file and overridden by command-line flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub store: StoreSection,
    pub source: SourceSection,
    pub run: RunSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    pub implementation: String,
    pub path: Option<PathBuf>,
    pub analyzer: String,
    pub merge_strategy: String,
    pub field_encoding: String,
    pub compact_id_keys: bool,
    pub verbose: bool,
    pub write_buffer_mb: f64,
    /// -1 disables the document-count flush threshold.
    pub max_buffered_docs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    /// Tab-separated corpus file; a synthetic corpus is used when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// -1 means consume the source to exhaustion.
    pub total_documents: i64,
    /// 0 means one worker per core.
    pub workers: usize,
    pub force_merge: bool,
    pub do_deletions: bool,
    pub print_throughput: bool,
    pub wait_for_merges: bool,
    pub wait_for_merges_before_close: bool,
    pub upsert: bool,
    pub grouping: bool,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            store: StoreSection {
                implementation: "heap".to_string(),
                path: None,
                analyzer: "standard".to_string(),
                merge_strategy: "tiered".to_string(),
                field_encoding: "plain".to_string(),
                compact_id_keys: false,
                verbose: false,
                write_buffer_mb: 256.0,
                max_buffered_docs: -1,
            },
            source: SourceSection { path: None },
            run: RunSection {
                total_documents: -1,
                workers: 0,
                force_merge: false,
                do_deletions: false,
                print_throughput: false,
                wait_for_merges: true,
                wait_for_merges_before_close: true,
                upsert: false,
                grouping: false,
                seed: 17,
            },
        }
    }
}

/// Parses command-line arguments using the clap derive macro. Every flag
/// mirrors a settings-file entry and wins over it when given.
#[derive(Parser, Debug, Default)]
#[command(version, about = "Concurrent document-ingestion benchmark stand", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to config/settings.toml at the project root).
    #[arg(long)]
    pub config_file: Option<PathBuf>,
    #[arg(long)]
    pub store_implementation: Option<String>,
    #[arg(long)]
    pub store_path: Option<PathBuf>,
    #[arg(long)]
    pub analyzer: Option<String>,
    #[arg(long)]
    pub merge_strategy: Option<String>,
    #[arg(long)]
    pub field_encoding: Option<String>,
    #[arg(long)]
    pub compact_id_keys: Option<bool>,
    #[arg(long)]
    pub verbose_store: Option<bool>,
    #[arg(long)]
    pub write_buffer_mb: Option<f64>,
    #[arg(long)]
    pub max_buffered_docs: Option<i64>,
    #[arg(long)]
    pub source_path: Option<PathBuf>,
    #[arg(short = 'n', long)]
    pub total_documents: Option<i64>,
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,
    #[arg(long)]
    pub force_merge: Option<bool>,
    #[arg(long)]
    pub do_deletions: Option<bool>,
    #[arg(long)]
    pub print_throughput: Option<bool>,
    #[arg(long)]
    pub wait_for_merges: Option<bool>,
    #[arg(long)]
    pub wait_for_merges_before_close: Option<bool>,
    #[arg(long)]
    pub upsert: Option<bool>,
    #[arg(long)]
    pub grouping: Option<bool>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Loads configuration from the TOML file and merges CLI overrides on top.
pub fn get_config() -> anyhow::Result<Config> {
    let cli = Cli::parse();
    let config_path = match &cli.config_file {
        Some(path) => path.clone(),
        None => get_project_root()?.join("config/settings.toml"),
    };
    merge_config(cli, &config_path)
}

fn merge_config(cli: Cli, config_path: &Path) -> anyhow::Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(config_path));

    if let Some(value) = cli.store_implementation {
        figment = figment.merge(("store.implementation", value));
    }
    if let Some(value) = cli.store_path {
        figment = figment.merge(("store.path", value));
    }
    if let Some(value) = cli.analyzer {
        figment = figment.merge(("store.analyzer", value));
    }
    if let Some(value) = cli.merge_strategy {
        figment = figment.merge(("store.merge_strategy", value));
    }
    if let Some(value) = cli.field_encoding {
        figment = figment.merge(("store.field_encoding", value));
    }
    if let Some(value) = cli.compact_id_keys {
        figment = figment.merge(("store.compact_id_keys", value));
    }
    if let Some(value) = cli.verbose_store {
        figment = figment.merge(("store.verbose", value));
    }
    if let Some(value) = cli.write_buffer_mb {
        figment = figment.merge(("store.write_buffer_mb", value));
    }
    if let Some(value) = cli.max_buffered_docs {
        figment = figment.merge(("store.max_buffered_docs", value));
    }
    if let Some(value) = cli.source_path {
        figment = figment.merge(("source.path", value));
    }
    if let Some(value) = cli.total_documents {
        figment = figment.merge(("run.total_documents", value));
    }
    if let Some(value) = cli.workers {
        figment = figment.merge(("run.workers", value));
    }
    if let Some(value) = cli.force_merge {
        figment = figment.merge(("run.force_merge", value));
    }
    if let Some(value) = cli.do_deletions {
        figment = figment.merge(("run.do_deletions", value));
    }
    if let Some(value) = cli.print_throughput {
        figment = figment.merge(("run.print_throughput", value));
    }
    if let Some(value) = cli.wait_for_merges {
        figment = figment.merge(("run.wait_for_merges", value));
    }
    if let Some(value) = cli.wait_for_merges_before_close {
        figment = figment.merge(("run.wait_for_merges_before_close", value));
    }
    if let Some(value) = cli.upsert {
        figment = figment.merge(("run.upsert", value));
    }
    if let Some(value) = cli.grouping {
        figment = figment.merge(("run.grouping", value));
    }
    if let Some(value) = cli.seed {
        figment = figment.merge(("run.seed", value));
    }
    if let Some(value) = cli.log_level {
        figment = figment.merge(("logging.level", value));
    }

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Everything `main` needs to wire a run together.
#[derive(Debug)]
pub struct BenchSetup {
    pub store_kind: StoreKind,
    pub store_config: StoreConfig,
    pub source_path: Option<PathBuf>,
    pub plan: RunPlan,
}

impl Config {
    /// Validate and resolve the raw configuration. Unknown variants and
    /// invalid combinations are fatal here, before any work begins.
    pub fn resolve(&self) -> anyhow::Result<BenchSetup> {
        let store_kind: StoreKind = self.store.implementation.parse()?;
        let analyzer = self.store.analyzer.parse()?;
        let merge_strategy = self.store.merge_strategy.parse()?;
        let field_encoding = self.store.field_encoding.parse()?;
        let key_encoding = if self.store.compact_id_keys {
            KeyEncoding::Compact
        } else {
            KeyEncoding::Padded
        };

        let total_documents = match self.run.total_documents {
            -1 => None,
            n if n >= 0 => Some(n as u64),
            n => bail!("invalid total_documents {n}: use -1 for unbounded"),
        };
        if self.run.grouping && total_documents.is_none() {
            bail!("grouping fields require a finite total_documents");
        }
        if self.source.path.is_none() && total_documents.is_none() {
            bail!("unbounded ingest requires source.path: the synthetic corpus never ends");
        }

        let workers = if self.run.workers == 0 {
            num_cpus::get()
        } else {
            self.run.workers
        };

        if self.store.write_buffer_mb <= 0.0 {
            bail!(
                "write_buffer_mb must be positive, got {}",
                self.store.write_buffer_mb
            );
        }
        let max_buffered_docs = match self.store.max_buffered_docs {
            -1 => None,
            n if n > 0 => Some(n as usize),
            n => bail!("max_buffered_docs must be positive or -1, got {n}"),
        };

        let grouping = if self.run.grouping {
            // Checked above: grouping implies a finite total.
            let total = total_documents.unwrap_or_default();
            Some(Arc::new(GroupingContext::new(total, self.run.seed)))
        } else {
            None
        };

        let mode = if self.run.upsert {
            IngestMode::Upsert
        } else {
            IngestMode::Insert
        };

        Ok(BenchSetup {
            store_kind,
            store_config: StoreConfig {
                path: self.store.path.clone(),
                analyzer,
                merge_strategy,
                field_encoding,
                key_encoding,
                write_buffer_bytes: (self.store.write_buffer_mb * 1024.0 * 1024.0) as u64,
                max_buffered_docs,
            },
            source_path: self.source.path.clone(),
            plan: RunPlan {
                ingest: IngestPlan {
                    total_documents,
                    workers,
                    mode,
                    key_encoding,
                    grouping,
                },
                print_throughput: self.run.print_throughput,
                wait_for_merges: self.run.wait_for_merges,
                force_merge: self.run.force_merge,
                do_deletions: self.run.do_deletions,
                wait_for_merges_before_close: self.run.wait_for_merges_before_close,
                seed: self.run.seed,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["docbench"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("valid test arguments")
    }

    fn write_settings(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.toml");
        let mut file = std::fs::File::create(&path).expect("create settings");
        file.write_all(contents.as_bytes()).expect("write settings");
        (dir, path)
    }

    #[test]
    fn cli_overrides_the_settings_file() -> anyhow::Result<()> {
        let (_dir, path) = write_settings(
            "[run]\ntotal_documents = 500\nworkers = 2\n\n[store]\nanalyzer = \"english\"\n",
        );
        let config = merge_config(cli(&["--workers", "4"]), &path)?;
        assert_eq!(config.run.total_documents, 500);
        assert_eq!(config.run.workers, 4);
        assert_eq!(config.store.analyzer, "english");
        Ok(())
    }

    #[test]
    fn missing_settings_file_falls_back_to_defaults() -> anyhow::Result<()> {
        let (_dir, path) = write_settings("");
        let missing = path.with_file_name("nope.toml");
        let config = merge_config(cli(&[]), &missing)?;
        assert_eq!(config.store.implementation, "heap");
        assert_eq!(config.run.total_documents, -1);
        Ok(())
    }

    #[test]
    fn resolve_rejects_unknown_variants() {
        let mut config = Config::default();
        config.run.total_documents = 100;
        config.store.analyzer = "lemmatizing".to_string();
        let err = config.resolve().expect_err("unknown analyzer");
        assert!(err.to_string().contains("unknown analyzer"));
    }

    #[test]
    fn resolve_rejects_grouping_without_a_finite_total() {
        let mut config = Config::default();
        config.source.path = Some(PathBuf::from("corpus.tsv"));
        config.run.grouping = true;
        let err = config.resolve().expect_err("grouping needs a total");
        assert!(err.to_string().contains("finite total_documents"));
    }

    #[test]
    fn resolve_rejects_unbounded_synthetic_runs() {
        let config = Config::default();
        let err = config.resolve().expect_err("needs a source path");
        assert!(err.to_string().contains("source.path"));
    }

    #[test]
    fn resolve_fills_in_worker_count_and_thresholds() -> anyhow::Result<()> {
        let mut config = Config::default();
        config.run.total_documents = 1_000;
        config.store.max_buffered_docs = 250;
        let setup = config.resolve()?;
        assert!(setup.plan.ingest.workers >= 1);
        assert_eq!(setup.store_config.max_buffered_docs, Some(250));
        assert_eq!(
            setup.store_config.write_buffer_bytes,
            256 * 1024 * 1024
        );
        assert_eq!(setup.plan.ingest.total_documents, Some(1_000));
        Ok(())
    }
}
