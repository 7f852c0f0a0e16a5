use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context as _;

use crate::corpus::CorpusGenerator;
use crate::{DocumentRecord, FieldFlags, ID_FIELD};

/// A shared sequential stream of documents. Implementations must be safe
/// under concurrent pulls and must never hand out the same document twice.
pub trait DocumentSource: Send + Sync {
    fn next_doc(&self) -> anyhow::Result<Option<DocumentRecord>>;

    /// Approximate plain-text bytes delivered so far.
    fn bytes_delivered(&self) -> u64;
}

fn line_doc_record(id: u64, title: &str, date: &str, body: &str) -> DocumentRecord {
    let mut doc = DocumentRecord::new();
    doc.push(ID_FIELD, id.to_string(), FieldFlags::keyword());
    doc.push("title", title, FieldFlags::text());
    doc.push("date", date, FieldFlags::keyword());
    doc.push("body", body, FieldFlags::body_text());
    doc
}

struct LineReader {
    csv: csv::Reader<File>,
    record: csv::StringRecord,
    next_id: u64,
}

/// Reads a tab-separated corpus file (title, date, body per line) and
/// assigns sequential ids starting at 0. The reader and the id counter sit
/// behind one lock so ids always match consumption order.
pub struct LineFileSource {
    reader: Mutex<LineReader>,
    bytes: AtomicU64,
}

impl LineFileSource {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let csv = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("cannot open corpus file {}", path.display()))?;
        Ok(LineFileSource {
            reader: Mutex::new(LineReader {
                csv,
                record: csv::StringRecord::new(),
                next_id: 0,
            }),
            bytes: AtomicU64::new(0),
        })
    }
}

impl DocumentSource for LineFileSource {
    fn next_doc(&self) -> anyhow::Result<Option<DocumentRecord>> {
        let mut guard = self
            .reader
            .lock()
            .map_err(|_| anyhow::anyhow!("corpus reader lock poisoned"))?;
        let LineReader {
            csv,
            record,
            next_id,
        } = &mut *guard;
        if !csv.read_record(record)? {
            return Ok(None);
        }
        anyhow::ensure!(
            record.len() >= 3,
            "malformed corpus line {}: expected 3 fields, got {}",
            *next_id,
            record.len()
        );
        let id = *next_id;
        *next_id += 1;
        let doc = line_doc_record(id, &record[0], &record[1], &record[2]);
        drop(guard);
        self.bytes.fetch_add(doc.approx_bytes(), Ordering::Relaxed);
        Ok(Some(doc))
    }

    fn bytes_delivered(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

struct SyntheticState {
    generator: CorpusGenerator,
    next_id: u64,
}

/// In-memory corpus stream backed by the seeded generator; ends after
/// `limit` documents when one is given.
pub struct SyntheticSource {
    state: Mutex<SyntheticState>,
    limit: Option<u64>,
    bytes: AtomicU64,
}

impl SyntheticSource {
    pub fn new(seed: u64, limit: Option<u64>) -> Self {
        SyntheticSource {
            state: Mutex::new(SyntheticState {
                generator: CorpusGenerator::with_seed(seed),
                next_id: 0,
            }),
            limit,
            bytes: AtomicU64::new(0),
        }
    }
}

impl DocumentSource for SyntheticSource {
    fn next_doc(&self) -> anyhow::Result<Option<DocumentRecord>> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("corpus generator lock poisoned"))?;
        if let Some(limit) = self.limit
            && guard.next_id >= limit
        {
            return Ok(None);
        }
        let Some(line) = guard.generator.next() else {
            return Ok(None);
        };
        let id = guard.next_id;
        guard.next_id += 1;
        let doc = line_doc_record(id, &line.title, &line.date, &line.body);
        drop(guard);
        self.bytes.fetch_add(doc.approx_bytes(), Ordering::Relaxed);
        Ok(Some(doc))
    }

    fn bytes_delivered(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}
