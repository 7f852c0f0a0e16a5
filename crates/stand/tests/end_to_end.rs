use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use docbench_model::{DocumentRecord, KeyEncoding, SyntheticSource};
use docbench_stand::groups::{
    GROUP_100_FIELD, GROUP_1M_FIELD, GROUP_10K_FIELD, GROUP_100K_FIELD, GROUP_BLOCK_FIELD,
    GROUP_END_FIELD, GroupingContext,
};
use docbench_stand::lifecycle::{self, RunPlan};
use docbench_stand::worker::{IngestMode, IngestPlan};
use docbench_store::{HeapStore, StoreConfig, StoreHandle};

fn plan(total: u64, workers: usize) -> RunPlan {
    RunPlan {
        ingest: IngestPlan {
            total_documents: Some(total),
            workers,
            mode: IngestMode::Insert,
            key_encoding: KeyEncoding::Padded,
            grouping: None,
        },
        print_throughput: false,
        wait_for_merges: true,
        force_merge: false,
        do_deletions: false,
        wait_for_merges_before_close: true,
        seed: 17,
    }
}

fn small_segment_store() -> HeapStore {
    HeapStore::open(StoreConfig {
        max_buffered_docs: Some(64),
        ..StoreConfig::default()
    })
    .expect("open store")
}

fn commit_tags(store: &HeapStore) -> Vec<String> {
    store
        .commits()
        .iter()
        .filter_map(|commit| commit.metadata.get("tag").cloned())
        .collect()
}

#[test]
fn insert_run_reaches_exact_counts() -> anyhow::Result<()> {
    let source = SyntheticSource::new(17, Some(1_000));
    let store = small_segment_store();
    let summary = lifecycle::run(&plan(1_000, 4), &source, &store)?;
    assert_eq!(summary.submitted, 1_000);
    assert_eq!(summary.store_total, 1_000);
    assert_eq!(store.live_document_count(), 1_000);
    assert_eq!(commit_tags(&store), ["multi"]);
    assert!(summary.bytes_read > 0);
    Ok(())
}

#[test]
fn throughput_sampler_does_not_disturb_the_run() -> anyhow::Result<()> {
    let source = SyntheticSource::new(17, Some(500));
    let store = small_segment_store();
    let mut plan = plan(500, 2);
    plan.print_throughput = true;
    let summary = lifecycle::run(&plan, &source, &store)?;
    assert_eq!(summary.submitted, 500);
    Ok(())
}

#[test]
fn deletion_phase_keeps_exact_live_count() -> anyhow::Result<()> {
    let source = SyntheticSource::new(17, Some(2_000));
    let store = small_segment_store();
    let mut plan = plan(2_000, 4);
    plan.do_deletions = true;
    lifecycle::run(&plan, &source, &store)?;
    // A late merge may reclaim tombstones, but the live count is exact.
    assert_eq!(store.live_document_count(), 1_900);
    assert_eq!(commit_tags(&store), ["multi", "delmulti"]);
    Ok(())
}

#[test]
fn optimize_then_delete_commits_delsingle() -> anyhow::Result<()> {
    let source = SyntheticSource::new(17, Some(500));
    let store = small_segment_store();
    let mut plan = plan(500, 2);
    plan.force_merge = true;
    plan.do_deletions = true;
    lifecycle::run(&plan, &source, &store)?;
    assert_eq!(store.live_document_count(), 475);
    assert_eq!(commit_tags(&store), ["multi", "single", "delsingle"]);
    Ok(())
}

#[test]
fn force_merge_leaves_a_single_segment() -> anyhow::Result<()> {
    let source = SyntheticSource::new(17, Some(1_000));
    let store = small_segment_store();
    let mut plan = plan(1_000, 4);
    plan.force_merge = true;
    lifecycle::run(&plan, &source, &store)?;
    assert_eq!(store.segment_count(), 1);
    assert_eq!(commit_tags(&store), ["multi", "single"]);
    Ok(())
}

#[test]
fn upsert_run_skips_count_checks() -> anyhow::Result<()> {
    let source = SyntheticSource::new(17, Some(1_000));
    let store = small_segment_store();
    let mut plan = plan(1_000, 4);
    plan.ingest.mode = IngestMode::Upsert;
    let summary = lifecycle::run(&plan, &source, &store)?;
    assert_eq!(summary.submitted, 1_000);
    assert_eq!(store.live_document_count(), 1_000);
    Ok(())
}

#[test]
fn compact_keys_thread_through_deletes() -> anyhow::Result<()> {
    let source = SyntheticSource::new(17, Some(400));
    let store = HeapStore::open(StoreConfig {
        key_encoding: KeyEncoding::Compact,
        ..StoreConfig::default()
    })?;
    let mut plan = plan(400, 2);
    plan.ingest.key_encoding = KeyEncoding::Compact;
    plan.do_deletions = true;
    lifecycle::run(&plan, &source, &store)?;
    assert_eq!(store.live_document_count(), 380);
    Ok(())
}

const GROUPED_TOTAL: u64 = 5_000;

fn grouped_context() -> Arc<GroupingContext> {
    static CONTEXT: std::sync::OnceLock<Arc<GroupingContext>> = std::sync::OnceLock::new();
    CONTEXT
        .get_or_init(|| Arc::new(GroupingContext::new(GROUPED_TOTAL, 17)))
        .clone()
}

#[test]
fn grouped_run_tags_every_document() -> anyhow::Result<()> {
    let context = grouped_context();
    let source = SyntheticSource::new(17, Some(GROUPED_TOTAL));
    let store = small_segment_store();
    let mut plan = plan(GROUPED_TOTAL, 4);
    plan.ingest.grouping = Some(context.clone());
    let summary = lifecycle::run(&plan, &source, &store)?;

    assert_eq!(summary.submitted, GROUPED_TOTAL);
    assert_eq!(store.total_document_count(), GROUPED_TOTAL);
    assert_eq!(context.block_count(), 100);

    let docs = store.live_documents()?;
    assert_eq!(docs.len(), GROUPED_TOTAL as usize);
    let block_labels = context.block_labels();
    let mut group_ends = 0usize;
    for doc in &docs {
        for field in [
            GROUP_100_FIELD,
            GROUP_10K_FIELD,
            GROUP_100K_FIELD,
            GROUP_1M_FIELD,
        ] {
            assert!(doc.get(field).is_some(), "missing {field}");
        }
        let block = doc.get(GROUP_BLOCK_FIELD).expect("missing block label");
        assert!(
            block_labels.iter().any(|label| label == block),
            "block label {block:?} not in the partition table"
        );
        if doc.get(GROUP_END_FIELD).is_some() {
            group_ends += 1;
        }
    }
    // Racing workers may leave trailing claims short, but every submitted
    // batch carries exactly one end marker.
    assert!(
        (1..=context.block_count()).contains(&group_ends),
        "group end markers: {group_ends}"
    );
    Ok(())
}

#[test]
fn single_grouped_worker_marks_every_block() -> anyhow::Result<()> {
    let context = grouped_context();
    let source = SyntheticSource::new(17, Some(GROUPED_TOTAL));
    let store = small_segment_store();
    let mut plan = plan(GROUPED_TOTAL, 1);
    plan.ingest.grouping = Some(context.clone());
    lifecycle::run(&plan, &source, &store)?;

    // One worker fills blocks strictly in claim order: 99 formula blocks
    // of 50 documents, then the capped final block drains the rest.
    let docs = store.live_documents()?;
    let group_ends = docs
        .iter()
        .filter(|doc| doc.get(GROUP_END_FIELD).is_some())
        .count();
    assert_eq!(group_ends, context.block_count());
    Ok(())
}

#[test]
fn short_source_fails_the_ingest_verification() {
    let source = SyntheticSource::new(17, Some(500));
    let store = small_segment_store();
    let err = lifecycle::run(&plan(1_000, 4), &source, &store).expect_err("count mismatch");
    assert!(err.to_string().contains("ingest count mismatch"), "{err}");
}

/// Store double that starts failing after a fixed number of submissions.
struct FailingStore {
    submitted: AtomicU64,
    fail_after: u64,
}

impl FailingStore {
    fn new(fail_after: u64) -> Self {
        FailingStore {
            submitted: AtomicU64::new(0),
            fail_after,
        }
    }
}

impl StoreHandle for FailingStore {
    fn submit(&self, _doc: DocumentRecord) -> anyhow::Result<()> {
        let seen = self.submitted.fetch_add(1, Ordering::Relaxed);
        anyhow::ensure!(seen < self.fail_after, "synthetic write failure");
        Ok(())
    }

    fn submit_group(&self, docs: Vec<DocumentRecord>) -> anyhow::Result<()> {
        for doc in docs {
            self.submit(doc)?;
        }
        Ok(())
    }

    fn replace(&self, _key: &str, doc: DocumentRecord) -> anyhow::Result<()> {
        self.submit(doc)
    }

    fn delete(&self, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn commit(&self, _metadata: &BTreeMap<String, String>) -> anyhow::Result<()> {
        Ok(())
    }

    fn force_merge_to_one(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn wait_for_background_merges(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn live_document_count(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed).min(self.fail_after)
    }

    fn total_document_count(&self) -> u64 {
        self.live_document_count()
    }

    fn describe_segments(&self) -> String {
        String::new()
    }

    fn close(&self, _wait_for_merges: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

#[test]
fn one_failing_worker_fails_the_whole_run() {
    let source = SyntheticSource::new(17, Some(1_000));
    let store = FailingStore::new(100);
    let err = lifecycle::run(&plan(1_000, 4), &source, &store).expect_err("store failure is fatal");
    assert!(err.to_string().contains("synthetic write failure"), "{err}");
}
