use std::collections::BTreeMap;
use std::io::Write as _;
use std::mem;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use anyhow::Context as _;
use docbench_model::{DocumentRecord, encode_id};
use tracing::debug;

use crate::segment::{self, Segment};
use crate::{MergeStrategy, StoreConfig, StoreHandle};

const MERGE_FACTOR: usize = 10;

#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub metadata: BTreeMap<String, String>,
    pub total: u64,
    pub live: u64,
    pub segments: usize,
}

struct State {
    buffer: Segment,
    sealed: Vec<Segment>,
    commits: Vec<CommitRecord>,
    merges_in_flight: usize,
    // Documents owned by an in-flight merge; counted so totals never dip
    // while segments are checked out by the merge thread.
    inflight_total: u64,
    inflight_live: u64,
    merge_error: Option<String>,
    shutdown: bool,
    closed: bool,
}

struct Shared {
    config: StoreConfig,
    state: Mutex<State>,
    work: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory segmented store: an open write buffer that seals into
/// segments at the configured thresholds, a background thread that merges
/// sealed segments per the merge strategy, tombstone deletes, and commit
/// points appended to a manifest log when a store path is configured.
pub struct HeapStore {
    shared: Arc<Shared>,
    merge_thread: Mutex<Option<JoinHandle<()>>>,
}

impl HeapStore {
    pub fn open(config: StoreConfig) -> anyhow::Result<Self> {
        if let Some(path) = &config.path {
            std::fs::create_dir_all(path)
                .with_context(|| format!("cannot create store path {}", path.display()))?;
        }
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(State {
                buffer: Segment::new(),
                sealed: Vec::new(),
                commits: Vec::new(),
                merges_in_flight: 0,
                inflight_total: 0,
                inflight_live: 0,
                merge_error: None,
                shutdown: false,
                closed: false,
            }),
            work: Condvar::new(),
        });
        let merge_thread = std::thread::Builder::new()
            .name("store-merge".to_string())
            .spawn({
                let shared = shared.clone();
                move || merge_loop(&shared)
            })
            .context("cannot spawn store merge thread")?;
        Ok(HeapStore {
            shared,
            merge_thread: Mutex::new(Some(merge_thread)),
        })
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        self.shared.lock().commits.clone()
    }

    /// Sealed segments only; the open buffer is not counted.
    pub fn segment_count(&self) -> usize {
        self.shared.lock().sealed.len()
    }

    pub fn document(&self, key: &str) -> anyhow::Result<Option<DocumentRecord>> {
        let state = self.shared.lock();
        for segment in state.sealed.iter().chain(Some(&state.buffer)) {
            if let Some(doc) = segment.get(key)? {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    pub fn live_documents(&self) -> anyhow::Result<Vec<DocumentRecord>> {
        let state = self.shared.lock();
        let mut docs = Vec::new();
        for segment in state.sealed.iter().chain(Some(&state.buffer)) {
            docs.extend(segment.live_docs()?);
        }
        Ok(docs)
    }

    pub fn term_count(&self, term: &str) -> u64 {
        let state = self.shared.lock();
        state
            .sealed
            .iter()
            .chain(Some(&state.buffer))
            .map(|segment| segment.term_count(term))
            .sum()
    }

    fn insert_locked(&self, state: &mut State, doc: DocumentRecord) -> anyhow::Result<()> {
        let id = doc.id()?;
        let key = encode_id(id, self.shared.config.key_encoding);
        state.buffer.push(
            key,
            doc,
            self.shared.config.field_encoding,
            &self.shared.config.analyzer,
        );
        Ok(())
    }

    fn buffer_is_full(&self, state: &State) -> bool {
        if let Some(max_docs) = self.shared.config.max_buffered_docs
            && state.buffer.doc_count() >= max_docs
        {
            return true;
        }
        state.buffer.bytes() >= self.shared.config.write_buffer_bytes
    }

    fn seal_locked(&self, state: &mut State) {
        if state.buffer.is_empty() {
            return;
        }
        let segment = mem::replace(&mut state.buffer, Segment::new());
        debug!(
            docs = segment.doc_count(),
            bytes = segment.bytes(),
            "sealed segment"
        );
        state.sealed.push(segment);
        self.shared.work.notify_all();
    }

    fn flush_if_full_locked(&self, state: &mut State) {
        if self.buffer_is_full(state) {
            self.seal_locked(state);
        }
    }

    fn ensure_open(state: &State) -> anyhow::Result<()> {
        anyhow::ensure!(!state.closed, "store is closed");
        Ok(())
    }

    /// Block until no merge is running and none is schedulable.
    fn wait_idle_locked<'a>(
        &self,
        mut state: MutexGuard<'a, State>,
    ) -> anyhow::Result<MutexGuard<'a, State>> {
        loop {
            if let Some(message) = &state.merge_error {
                anyhow::bail!("background merge failed: {message}");
            }
            let idle = state.merges_in_flight == 0
                && pick_merge(&state.sealed, self.shared.config.merge_strategy).is_none();
            if idle {
                return Ok(state);
            }
            state = self
                .shared
                .work
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Deletes must see every sealed segment; wait out any merge that has
    /// segments checked out.
    fn wait_no_merge_in_flight<'a>(
        &self,
        mut state: MutexGuard<'a, State>,
    ) -> MutexGuard<'a, State> {
        while state.merges_in_flight > 0 {
            state = self
                .shared
                .work
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state
    }

    fn shutdown_and_join(&self) -> anyhow::Result<()> {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.closed = true;
            self.shared.work.notify_all();
        }
        let thread = self
            .merge_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread
            && thread.join().is_err()
        {
            anyhow::bail!("store merge thread panicked");
        }
        Ok(())
    }
}

impl StoreHandle for HeapStore {
    fn submit(&self, doc: DocumentRecord) -> anyhow::Result<()> {
        let mut state = self.shared.lock();
        Self::ensure_open(&state)?;
        self.insert_locked(&mut state, doc)?;
        self.flush_if_full_locked(&mut state);
        Ok(())
    }

    fn submit_group(&self, docs: Vec<DocumentRecord>) -> anyhow::Result<()> {
        let mut state = self.shared.lock();
        Self::ensure_open(&state)?;
        // The whole group lands in one buffer generation, so it stays
        // contiguous within a segment.
        for doc in docs {
            self.insert_locked(&mut state, doc)?;
        }
        self.flush_if_full_locked(&mut state);
        Ok(())
    }

    fn replace(&self, key: &str, doc: DocumentRecord) -> anyhow::Result<()> {
        let state = self.shared.lock();
        Self::ensure_open(&state)?;
        let mut state = self.wait_no_merge_in_flight(state);
        state.buffer.delete(key);
        for segment in &mut state.sealed {
            segment.delete(key);
        }
        self.insert_locked(&mut state, doc)?;
        self.flush_if_full_locked(&mut state);
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        let state = self.shared.lock();
        Self::ensure_open(&state)?;
        let mut state = self.wait_no_merge_in_flight(state);
        state.buffer.delete(key);
        for segment in &mut state.sealed {
            segment.delete(key);
        }
        Ok(())
    }

    fn commit(&self, metadata: &BTreeMap<String, String>) -> anyhow::Result<()> {
        let mut state = self.shared.lock();
        Self::ensure_open(&state)?;
        self.seal_locked(&mut state);
        let record = CommitRecord {
            metadata: metadata.clone(),
            total: total_locked(&state),
            live: live_locked(&state),
            segments: state.sealed.len(),
        };
        if let Some(path) = &self.shared.config.path {
            append_manifest(path, &record)?;
        }
        debug!(
            total = record.total,
            live = record.live,
            segments = record.segments,
            "commit"
        );
        state.commits.push(record);
        Ok(())
    }

    fn force_merge_to_one(&self) -> anyhow::Result<()> {
        let mut state = self.shared.lock();
        Self::ensure_open(&state)?;
        self.seal_locked(&mut state);
        state = self.wait_idle_locked(state)?;
        if state.sealed.len() > 1 {
            let victims = mem::take(&mut state.sealed);
            let merged = segment::merge(
                victims,
                self.shared.config.field_encoding,
                &self.shared.config.analyzer,
            )?;
            debug!(docs = merged.doc_count(), "force merge complete");
            state.sealed.push(merged);
        }
        Ok(())
    }

    fn wait_for_background_merges(&self) -> anyhow::Result<()> {
        let state = self.shared.lock();
        self.wait_idle_locked(state)?;
        Ok(())
    }

    fn live_document_count(&self) -> u64 {
        live_locked(&self.shared.lock())
    }

    fn total_document_count(&self) -> u64 {
        total_locked(&self.shared.lock())
    }

    fn describe_segments(&self) -> String {
        let state = self.shared.lock();
        let sealed: Vec<String> = state
            .sealed
            .iter()
            .map(|segment| format!("{}/{}", segment.live_count(), segment.doc_count()))
            .collect();
        format!(
            "sealed=[{}] buffered={}",
            sealed.join(", "),
            state.buffer.doc_count()
        )
    }

    fn close(&self, wait_for_merges: bool) -> anyhow::Result<()> {
        {
            let state = self.shared.lock();
            if state.closed {
                return Ok(());
            }
            if wait_for_merges {
                self.wait_idle_locked(state)?;
            }
        }
        self.shutdown_and_join()?;
        debug!("store closed");
        Ok(())
    }
}

impl Drop for HeapStore {
    fn drop(&mut self) {
        let _ = self.shutdown_and_join();
    }
}

fn total_locked(state: &State) -> u64 {
    let sealed: usize = state.sealed.iter().map(Segment::doc_count).sum();
    (sealed + state.buffer.doc_count()) as u64 + state.inflight_total
}

fn live_locked(state: &State) -> u64 {
    let sealed: usize = state.sealed.iter().map(Segment::live_count).sum();
    (sealed + state.buffer.live_count()) as u64 + state.inflight_live
}

fn append_manifest(path: &Path, record: &CommitRecord) -> anyhow::Result<()> {
    let manifest = path.join("commits.log");
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&manifest)
        .with_context(|| format!("cannot append to {}", manifest.display()))?;
    let metadata: Vec<String> = record
        .metadata
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    writeln!(
        file,
        "{} total={} live={} segments={}",
        metadata.join(","),
        record.total,
        record.live,
        record.segments
    )?;
    Ok(())
}

fn merge_loop(shared: &Shared) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            return;
        }
        let Some(picked) = pick_merge(&state.sealed, shared.config.merge_strategy) else {
            state = shared
                .work
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            continue;
        };
        let victims = take_segments(&mut state.sealed, picked);
        state.merges_in_flight += 1;
        state.inflight_total += victims.iter().map(|s| s.doc_count() as u64).sum::<u64>();
        state.inflight_live += victims.iter().map(|s| s.live_count() as u64).sum::<u64>();
        drop(state);

        let merged = segment::merge(victims, shared.config.field_encoding, &shared.config.analyzer);

        state = shared.lock();
        match merged {
            Ok(segment) => {
                debug!(
                    docs = segment.doc_count(),
                    bytes = segment.bytes(),
                    "background merge complete"
                );
                state.sealed.push(segment);
            }
            Err(err) => {
                tracing::error!("background merge failed: {err:?}");
                state.merge_error.get_or_insert_with(|| format!("{err:#}"));
            }
        }
        state.merges_in_flight -= 1;
        state.inflight_total = 0;
        state.inflight_live = 0;
        shared.work.notify_all();
    }
}

/// Indices (ascending) of the segments the strategy wants merged next.
fn pick_merge(sealed: &[Segment], strategy: MergeStrategy) -> Option<Vec<usize>> {
    if sealed.len() < MERGE_FACTOR {
        return None;
    }
    match strategy {
        MergeStrategy::Tiered => {
            let mut by_size: Vec<usize> = (0..sealed.len()).collect();
            by_size.sort_by_key(|&index| sealed[index].bytes());
            let mut picked = by_size[..MERGE_FACTOR].to_vec();
            picked.sort_unstable();
            Some(picked)
        }
        MergeStrategy::LogDoc => level_window(sealed, |segment| segment.doc_count() as u64),
        MergeStrategy::LogByteSize => level_window(sealed, Segment::bytes),
    }
}

fn level_window(sealed: &[Segment], size: impl Fn(&Segment) -> u64) -> Option<Vec<usize>> {
    for start in 0..=(sealed.len() - MERGE_FACTOR) {
        let level = log_level(size(&sealed[start]));
        let window = &sealed[start..start + MERGE_FACTOR];
        if window.iter().all(|segment| log_level(size(segment)) == level) {
            return Some((start..start + MERGE_FACTOR).collect());
        }
    }
    // No same-level run: stop the backlog from growing without bound.
    if sealed.len() >= 2 * MERGE_FACTOR {
        return Some((0..MERGE_FACTOR).collect());
    }
    None
}

fn log_level(value: u64) -> u32 {
    value.max(1).ilog10()
}

/// Remove the picked segments, preserving their relative order.
fn take_segments(sealed: &mut Vec<Segment>, picked: Vec<usize>) -> Vec<Segment> {
    let mut victims: Vec<Segment> = picked
        .iter()
        .rev()
        .map(|&index| sealed.remove(index))
        .collect();
    victims.reverse();
    victims
}
