use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use docbench_model::{DocumentRecord, FieldFlags};
use rand::distr::{Alphanumeric, SampleString};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub const GROUP_100_FIELD: &str = "group100";
pub const GROUP_10K_FIELD: &str = "group10K";
pub const GROUP_100K_FIELD: &str = "group100K";
pub const GROUP_1M_FIELD: &str = "group1M";
pub const GROUP_BLOCK_FIELD: &str = "groupblock";
pub const GROUP_END_FIELD: &str = "groupend";

/// The final block drains whatever the source still has, up to this cap,
/// instead of following the quota formula.
pub const LAST_BLOCK_CAP: u64 = 10_000;

/// Number of logical group blocks for a given target document count.
pub fn block_table_len(total_documents: u64) -> usize {
    if total_documents >= 5_000_000 {
        1_000_000
    } else if total_documents >= 500_000 {
        10_000
    } else {
        100
    }
}

/// Balanced-bucket quota for block `index` of `blocks`:
/// `floor((index+1)*avg) - floor(index*avg)` with `avg = total / blocks`.
/// Summed over every block this telescopes to exactly `total`, whichever
/// way the per-term floating point rounds.
pub fn formula_quota(total_documents: u64, blocks: usize, index: usize) -> u64 {
    let avg = total_documents as f64 / blocks as f64;
    ((index + 1) as f64 * avg) as u64 - (index as f64 * avg) as u64
}

/// Immutable grouping tables, built once before the workers start and
/// shared by reference. Four routing tables sized 100 / 10K / 100K / 1M;
/// the block-label table aliases the routing table whose size matches the
/// block count.
pub struct GroupingContext {
    group_100: Vec<String>,
    group_10k: Vec<String>,
    group_100k: Vec<String>,
    group_1m: Vec<String>,
    total_documents: u64,
    block_count: usize,
}

impl GroupingContext {
    pub fn new(total_documents: u64, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        GroupingContext {
            group_100: random_labels(100, &mut rng),
            group_10k: random_labels(10_000, &mut rng),
            group_100k: random_labels(100_000, &mut rng),
            group_1m: random_labels(1_000_000, &mut rng),
            total_documents,
            block_count: block_table_len(total_documents),
        }
    }

    pub fn total_documents(&self) -> u64 {
        self.total_documents
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn block_labels(&self) -> &[String] {
        match self.block_count {
            100 => &self.group_100,
            10_000 => &self.group_10k,
            _ => &self.group_1m,
        }
    }

    pub fn block_label(&self, index: usize) -> &str {
        &self.block_labels()[index]
    }

    pub fn block_quota(&self, index: usize) -> u64 {
        if index + 1 == self.block_count {
            LAST_BLOCK_CAP
        } else {
            formula_quota(self.total_documents, self.block_count, index)
        }
    }

    /// Attach the four routing labels, each keyed by `id mod tableSize`.
    pub fn tag_routing(&self, doc: &mut DocumentRecord, id: u64) {
        let flags = FieldFlags::label();
        doc.push(GROUP_100_FIELD, self.group_100[(id % 100) as usize].as_str(), flags);
        doc.push(
            GROUP_10K_FIELD,
            self.group_10k[(id % 10_000) as usize].as_str(),
            flags,
        );
        doc.push(
            GROUP_100K_FIELD,
            self.group_100k[(id % 100_000) as usize].as_str(),
            flags,
        );
        doc.push(
            GROUP_1M_FIELD,
            self.group_1m[(id % 1_000_000) as usize].as_str(),
            flags,
        );
    }
}

impl fmt::Debug for GroupingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupingContext")
            .field("total_documents", &self.total_documents)
            .field("block_count", &self.block_count)
            .finish_non_exhaustive()
    }
}

fn random_labels(count: usize, rng: &mut SmallRng) -> Vec<String> {
    (0..count)
        .map(|_| {
            let len = rng.random_range(7..=16);
            Alphanumeric.sample_string(rng, len)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockClaim {
    pub index: usize,
    pub quota: u64,
}

/// Hands out group blocks to workers. Claims are unique and numerically
/// increasing across the run; completion order is up to the threads.
pub struct BlockAllocator {
    context: Arc<GroupingContext>,
    next: AtomicUsize,
}

impl BlockAllocator {
    pub fn new(context: Arc<GroupingContext>) -> Self {
        BlockAllocator {
            context,
            next: AtomicUsize::new(0),
        }
    }

    pub fn context(&self) -> &GroupingContext {
        &self.context
    }

    pub fn claim_next(&self) -> Option<BlockClaim> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        if index >= self.context.block_count() {
            return None;
        }
        Some(BlockClaim {
            index,
            quota: self.context.block_quota(index),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn test_context() -> Arc<GroupingContext> {
        static CONTEXT: OnceLock<Arc<GroupingContext>> = OnceLock::new();
        CONTEXT
            .get_or_init(|| Arc::new(GroupingContext::new(2_000, 17)))
            .clone()
    }

    #[test]
    fn quota_formula_sums_exactly_to_the_total() {
        for (total, blocks) in [
            (1_000u64, 77usize),
            (999, 1_000),
            (123_457, 100),
            (500_000, 10_000),
            (5_000_000, 1_000_000),
        ] {
            let floor = total / blocks as u64;
            let ceil = total.div_ceil(blocks as u64);
            let mut sum = 0u64;
            for index in 0..blocks {
                let quota = formula_quota(total, blocks, index);
                assert!(
                    quota == floor || quota == ceil,
                    "quota {quota} for block {index} of {blocks} (total {total})"
                );
                sum += quota;
            }
            assert_eq!(sum, total, "blocks {blocks}, total {total}");
        }
    }

    #[test]
    fn block_table_size_follows_the_target() {
        assert_eq!(block_table_len(2_000), 100);
        assert_eq!(block_table_len(499_999), 100);
        assert_eq!(block_table_len(500_000), 10_000);
        assert_eq!(block_table_len(4_999_999), 10_000);
        assert_eq!(block_table_len(5_000_000), 1_000_000);
    }

    #[test]
    fn final_block_absorbs_the_remainder() {
        let context = test_context();
        assert_eq!(context.block_count(), 100);
        for index in 0..99 {
            assert_eq!(context.block_quota(index), 20);
        }
        assert_eq!(context.block_quota(99), LAST_BLOCK_CAP);
    }

    #[test]
    fn labels_are_at_least_seven_chars() {
        let context = test_context();
        for label in context.block_labels().iter().take(32) {
            assert!(label.len() >= 7, "label too short: {label}");
        }
    }

    #[test]
    fn routing_labels_follow_the_id_modulo() {
        let context = test_context();
        let mut doc = DocumentRecord::new();
        context.tag_routing(&mut doc, 1_234);
        assert_eq!(doc.get(GROUP_100_FIELD), Some(&context.group_100[34][..]));
        assert_eq!(doc.get(GROUP_10K_FIELD), Some(&context.group_10k[1_234][..]));
        assert_eq!(
            doc.get(GROUP_100K_FIELD),
            Some(&context.group_100k[1_234][..])
        );
        assert_eq!(doc.get(GROUP_1M_FIELD), Some(&context.group_1m[1_234][..]));
    }

    #[test]
    fn concurrent_claims_cover_every_block_once() {
        let allocator = BlockAllocator::new(test_context());
        let claimed = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let mut mine = Vec::new();
                    while let Some(claim) = allocator.claim_next() {
                        mine.push(claim.index);
                    }
                    claimed.lock().expect("collector lock").extend(mine);
                });
            }
        });
        let mut claimed = claimed.into_inner().expect("collector lock");
        claimed.sort_unstable();
        let expected: Vec<usize> = (0..100).collect();
        assert_eq!(claimed, expected);
    }
}
