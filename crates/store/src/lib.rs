pub mod analyzer;
mod heap;
mod segment;
mod sharded;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use docbench_model::{DocumentRecord, KeyEncoding};

pub use analyzer::TextAnalyzer;
pub use heap::{CommitRecord, HeapStore};
pub use sharded::ShardedStore;

/// The document store boundary. Implementations must support safe
/// concurrent submission from any number of workers.
pub trait StoreHandle: Send + Sync {
    /// Insert a single document.
    fn submit(&self, doc: DocumentRecord) -> anyhow::Result<()>;

    /// Atomically insert an ordered batch of documents. The caller marks
    /// the last element of a logical group before submitting.
    fn submit_group(&self, docs: Vec<DocumentRecord>) -> anyhow::Result<()>;

    /// Delete-by-key then insert, as one logical operation.
    fn replace(&self, key: &str, doc: DocumentRecord) -> anyhow::Result<()>;

    /// Tombstone every live document stored under `key`.
    fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Flush buffered documents and record a commit point with metadata.
    fn commit(&self, metadata: &BTreeMap<String, String>) -> anyhow::Result<()>;

    /// Merge everything down to a single segment per shard (optimize).
    fn force_merge_to_one(&self) -> anyhow::Result<()>;

    /// Block until no background merge work remains.
    fn wait_for_background_merges(&self) -> anyhow::Result<()>;

    fn live_document_count(&self) -> u64;

    /// Includes deleted documents not yet reclaimed by a merge.
    fn total_document_count(&self) -> u64;

    fn describe_segments(&self) -> String;

    /// Shut the store down; further writes fail. `wait_for_merges` lets
    /// pending background merges finish first.
    fn close(&self, wait_for_merges: bool) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Heap,
    Sharded,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heap" => Ok(Self::Heap),
            "sharded" => Ok(Self::Sharded),
            _ => anyhow::bail!("unknown store implementation {s:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Merge the smallest segments regardless of position.
    Tiered,
    /// Merge runs of adjacent segments at the same doc-count level.
    LogDoc,
    /// Merge runs of adjacent segments at the same byte-size level.
    LogByteSize,
}

impl FromStr for MergeStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tiered" => Ok(Self::Tiered),
            "log-doc" => Ok(Self::LogDoc),
            "log-byte-size" => Ok(Self::LogByteSize),
            _ => anyhow::bail!("unknown merge strategy {s:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    /// Fields kept as parsed records.
    Plain,
    /// Each document packed into one delimited buffer, decoded on read.
    Packed,
}

impl FromStr for FieldEncoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "packed" => Ok(Self::Packed),
            _ => anyhow::bail!("unknown field encoding {s:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
    pub analyzer: TextAnalyzer,
    pub merge_strategy: MergeStrategy,
    pub field_encoding: FieldEncoding,
    pub key_encoding: KeyEncoding,
    pub write_buffer_bytes: u64,
    pub max_buffered_docs: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: None,
            analyzer: TextAnalyzer::Standard,
            merge_strategy: MergeStrategy::Tiered,
            field_encoding: FieldEncoding::Plain,
            key_encoding: KeyEncoding::Padded,
            write_buffer_bytes: 256 * 1024 * 1024,
            max_buffered_docs: None,
        }
    }
}

pub fn open_store(kind: StoreKind, config: StoreConfig) -> anyhow::Result<Box<dyn StoreHandle>> {
    Ok(match kind {
        StoreKind::Heap => Box::new(HeapStore::open(config)?),
        StoreKind::Sharded => Box::new(ShardedStore::open(config)?),
    })
}
