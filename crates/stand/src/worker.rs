use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::Context as _;
use docbench_model::{DocumentRecord, DocumentSource, FieldFlags, KeyEncoding, encode_id};
use docbench_store::StoreHandle;
use tracing::info;

use crate::groups::{BlockAllocator, GROUP_BLOCK_FIELD, GROUP_END_FIELD, GroupingContext};

/// Progress log cadence, in 1-based document indices.
const PROGRESS_LOG_INTERVAL: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Submit every pulled record directly; nothing is ever replaced.
    Insert,
    /// Replace by the key derived from the record's id.
    Upsert,
}

#[derive(Debug, Clone)]
pub struct IngestPlan {
    /// `None` means consume until the source is exhausted.
    pub total_documents: Option<u64>,
    pub workers: usize,
    pub mode: IngestMode,
    pub key_encoding: KeyEncoding,
    /// When set, workers claim group blocks and submit grouped batches.
    pub grouping: Option<Arc<GroupingContext>>,
}

/// Run the worker pool to completion. Workers are independent closures
/// joined through the scope; the first error any of them returns fails
/// the whole run.
pub fn run_workers(
    source: &dyn DocumentSource,
    store: &dyn StoreHandle,
    plan: &IngestPlan,
    progress: &AtomicU64,
) -> anyhow::Result<()> {
    let allocator = plan
        .grouping
        .as_ref()
        .map(|context| BlockAllocator::new(context.clone()));
    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(plan.workers);
        for _ in 0..plan.workers {
            let allocator = allocator.as_ref();
            handles.push(scope.spawn(move || match allocator {
                Some(allocator) => grouped_loop(source, store, plan, allocator, progress),
                None => ingest_loop(source, store, plan, progress),
            }));
        }
        let mut first_error = None;
        for handle in handles {
            let joined = handle
                .join()
                .unwrap_or_else(|_| Err(anyhow::anyhow!("ingest worker panicked")));
            if let Err(error) = joined
                && first_error.is_none()
            {
                first_error = Some(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    })
}

fn log_progress(id: u64, started: Instant) {
    if (id + 1) % PROGRESS_LOG_INTERVAL == 0 {
        info!(
            docs = id + 1,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ingest progress"
        );
    }
}

fn ingest_loop(
    source: &dyn DocumentSource,
    store: &dyn StoreHandle,
    plan: &IngestPlan,
    progress: &AtomicU64,
) -> anyhow::Result<()> {
    let started = Instant::now();
    loop {
        let Some(doc) = source.next_doc()? else { break };
        let id = doc.id()?;
        if let Some(total) = plan.total_documents
            && id >= total
        {
            break;
        }
        log_progress(id, started);
        match plan.mode {
            IngestMode::Insert => store.submit(doc)?,
            IngestMode::Upsert => {
                let key = encode_id(id, plan.key_encoding);
                store.replace(&key, doc)?;
            }
        }
        progress.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

fn grouped_loop(
    source: &dyn DocumentSource,
    store: &dyn StoreHandle,
    plan: &IngestPlan,
    allocator: &BlockAllocator,
    progress: &AtomicU64,
) -> anyhow::Result<()> {
    let context = allocator.context();
    let total = plan
        .total_documents
        .context("grouped ingest requires a finite document target")?;
    let started = Instant::now();
    let mut batch: Vec<DocumentRecord> = Vec::new();
    while let Some(claim) = allocator.claim_next() {
        let label = context.block_label(claim.index);
        while (batch.len() as u64) < claim.quota {
            let Some(mut doc) = source.next_doc()? else {
                break;
            };
            let id = doc.id()?;
            if id >= total {
                break;
            }
            log_progress(id, started);
            context.tag_routing(&mut doc, id);
            doc.push(GROUP_BLOCK_FIELD, label, FieldFlags::label());
            batch.push(doc);
        }
        if batch.is_empty() {
            break;
        }
        if let Some(last) = batch.last_mut() {
            last.push(GROUP_END_FIELD, "x", FieldFlags::label());
        }
        let submitted = batch.len() as u64;
        store.submit_group(std::mem::take(&mut batch))?;
        progress.fetch_add(submitted, Ordering::Relaxed);
    }
    Ok(())
}
