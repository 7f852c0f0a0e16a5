use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::ensure;
use docbench_model::{DocumentSource, encode_id};
use docbench_store::StoreHandle;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::rate::{RatePrinter, SAMPLE_INTERVAL};
use crate::worker::{self, IngestMode, IngestPlan};

/// Fraction of the store randomly deleted by the deletion phase.
pub const DELETE_FRACTION: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub ingest: IngestPlan,
    pub print_throughput: bool,
    pub wait_for_merges: bool,
    pub force_merge: bool,
    pub do_deletions: bool,
    pub wait_for_merges_before_close: bool,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    /// Documents counted by the shared progress counter.
    pub submitted: u64,
    pub store_total: u64,
    pub elapsed: Duration,
    pub bytes_read: u64,
}

/// Draw exactly `count` distinct ids uniformly from `[0, max_doc)`.
/// Built sequentially so the cardinality is exact.
pub fn deletion_set(max_doc: u64, count: u64, rng: &mut SmallRng) -> HashSet<u64> {
    let mut deleted = HashSet::with_capacity(count as usize);
    while (deleted.len() as u64) < count {
        deleted.insert(rng.random_range(0..max_doc));
    }
    deleted
}

fn commit_tagged(store: &dyn StoreHandle, tag: &str) -> anyhow::Result<()> {
    let started = Instant::now();
    let mut metadata = BTreeMap::new();
    metadata.insert("tag".to_string(), tag.to_string());
    store.commit(&metadata)?;
    info!(
        tag,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "commit"
    );
    Ok(())
}

/// Drive the whole benchmark: ingest, verification, merge wait, commits,
/// optional optimize and deletion phases, close. Every phase is timed and
/// every consistency check failure is fatal.
pub fn run(
    plan: &RunPlan,
    source: &dyn DocumentSource,
    store: &dyn StoreHandle,
) -> anyhow::Result<RunSummary> {
    let progress = Arc::new(AtomicU64::new(0));
    let run_started = Instant::now();

    info!(workers = plan.ingest.workers, "ingest start");
    let printer = plan
        .print_throughput
        .then(|| RatePrinter::start(progress.clone(), SAMPLE_INTERVAL));
    let worker_result = worker::run_workers(source, store, &plan.ingest, &progress);
    if let Some(printer) = printer {
        printer.stop();
    }
    worker_result?;

    let submitted = progress.load(Ordering::Relaxed);
    info!(
        submitted,
        total = store.total_document_count(),
        elapsed_ms = run_started.elapsed().as_millis() as u64,
        "ingest done"
    );

    if plan.ingest.mode != IngestMode::Upsert
        && let Some(expected) = plan.ingest.total_documents
    {
        let actual = store.total_document_count();
        ensure!(
            actual == expected,
            "ingest count mismatch: store reports {actual} documents but expected {expected}"
        );
    }

    if plan.wait_for_merges {
        let started = Instant::now();
        store.wait_for_background_merges()?;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "background merges settled"
        );
    }

    commit_tagged(store, "multi")?;

    if plan.force_merge {
        let started = Instant::now();
        store.force_merge_to_one()?;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "force merge done"
        );
        commit_tagged(store, "single")?;
    }

    if plan.do_deletions {
        let started = Instant::now();
        let max_doc = store.total_document_count();
        let to_delete = (max_doc as f64 * DELETE_FRACTION) as u64;
        info!(to_delete, max_doc, "deleting random documents");
        let mut rng = SmallRng::seed_from_u64(plan.seed);
        for id in deletion_set(max_doc, to_delete, &mut rng) {
            store.delete(&encode_id(id, plan.ingest.key_encoding))?;
        }
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "deletes done"
        );
        commit_tagged(store, if plan.force_merge { "delsingle" } else { "delmulti" })?;
        if plan.ingest.mode != IngestMode::Upsert {
            let live = store.live_document_count();
            let expected = max_doc - to_delete;
            ensure!(
                live == expected,
                "post-delete count mismatch: store reports {live} live documents but expected {expected}"
            );
        }
    }

    info!(segments = %store.describe_segments(), "at close");
    let close_started = Instant::now();
    store.close(plan.wait_for_merges_before_close)?;
    info!(
        elapsed_ms = close_started.elapsed().as_millis() as u64,
        "store closed"
    );

    Ok(RunSummary {
        submitted,
        store_total: store.total_document_count(),
        elapsed: run_started.elapsed(),
        bytes_read: source.bytes_delivered(),
    })
}
