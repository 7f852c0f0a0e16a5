use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use docbench_model::{DocumentRecord, encode_id};

use crate::{HeapStore, StoreConfig, StoreHandle};

const SHARD_COUNT: usize = 4;

/// A fixed set of heap shards routed by key hash, so writes for the same
/// key always land on the same shard and replace stays atomic per shard.
pub struct ShardedStore {
    shards: Vec<HeapStore>,
    config: StoreConfig,
}

impl ShardedStore {
    pub fn open(config: StoreConfig) -> anyhow::Result<Self> {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for shard in 0..SHARD_COUNT {
            let mut shard_config = config.clone();
            shard_config.path = config
                .path
                .as_ref()
                .map(|path| path.join(format!("shard-{shard}")));
            shards.push(HeapStore::open(shard_config)?);
        }
        Ok(ShardedStore { shards, config })
    }

    fn shard_for(&self, key: &str) -> &HeapStore {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    fn shard_for_doc(&self, doc: &DocumentRecord) -> anyhow::Result<&HeapStore> {
        let key = encode_id(doc.id()?, self.config.key_encoding);
        Ok(self.shard_for(&key))
    }
}

impl StoreHandle for ShardedStore {
    fn submit(&self, doc: DocumentRecord) -> anyhow::Result<()> {
        self.shard_for_doc(&doc)?.submit(doc)
    }

    fn submit_group(&self, docs: Vec<DocumentRecord>) -> anyhow::Result<()> {
        // A group is atomic, so the whole batch follows its first document.
        let Some(first) = docs.first() else {
            return Ok(());
        };
        self.shard_for_doc(first)?.submit_group(docs)
    }

    fn replace(&self, key: &str, doc: DocumentRecord) -> anyhow::Result<()> {
        self.shard_for(key).replace(key, doc)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.shard_for(key).delete(key)
    }

    fn commit(&self, metadata: &BTreeMap<String, String>) -> anyhow::Result<()> {
        for shard in &self.shards {
            shard.commit(metadata)?;
        }
        Ok(())
    }

    fn force_merge_to_one(&self) -> anyhow::Result<()> {
        for shard in &self.shards {
            shard.force_merge_to_one()?;
        }
        Ok(())
    }

    fn wait_for_background_merges(&self) -> anyhow::Result<()> {
        for shard in &self.shards {
            shard.wait_for_background_merges()?;
        }
        Ok(())
    }

    fn live_document_count(&self) -> u64 {
        self.shards.iter().map(HeapStore::live_document_count).sum()
    }

    fn total_document_count(&self) -> u64 {
        self.shards
            .iter()
            .map(HeapStore::total_document_count)
            .sum()
    }

    fn describe_segments(&self) -> String {
        let shards: Vec<String> = self
            .shards
            .iter()
            .enumerate()
            .map(|(index, shard)| format!("shard-{index}: {}", shard.describe_segments()))
            .collect();
        shards.join("; ")
    }

    fn close(&self, wait_for_merges: bool) -> anyhow::Result<()> {
        for shard in &self.shards {
            shard.close(wait_for_merges)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbench_model::{FieldFlags, ID_FIELD, KeyEncoding};

    fn doc(id: u64) -> DocumentRecord {
        let mut doc = DocumentRecord::new();
        doc.push(ID_FIELD, id.to_string(), FieldFlags::keyword());
        doc.push("body", "shard test body", FieldFlags::body_text());
        doc
    }

    fn key(id: u64) -> String {
        encode_id(id, KeyEncoding::Padded)
    }

    #[test]
    fn counts_aggregate_across_shards() -> anyhow::Result<()> {
        let store = ShardedStore::open(StoreConfig::default())?;
        for id in 0..20 {
            store.submit(doc(id))?;
        }
        assert_eq!(store.total_document_count(), 20);

        for id in 0..5 {
            store.delete(&key(id))?;
        }
        assert_eq!(store.total_document_count(), 20);
        assert_eq!(store.live_document_count(), 15);

        store.force_merge_to_one()?;
        assert_eq!(store.total_document_count(), 15);
        assert_eq!(store.live_document_count(), 15);
        Ok(())
    }

    #[test]
    fn replace_routes_to_the_owning_shard() -> anyhow::Result<()> {
        let store = ShardedStore::open(StoreConfig::default())?;
        for id in 0..10 {
            store.submit(doc(id))?;
        }
        store.replace(&key(3), doc(3))?;
        assert_eq!(store.total_document_count(), 11);
        assert_eq!(store.live_document_count(), 10);
        store.close(true)?;
        Ok(())
    }
}
