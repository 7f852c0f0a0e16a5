use std::collections::{BTreeMap, HashMap};

use anyhow::Context as _;
use docbench_model::{DocumentRecord, FieldFlags};

use crate::FieldEncoding;
use crate::analyzer::TextAnalyzer;

const FIELD_SEP: char = '\u{1e}';
const PART_SEP: char = '\u{1f}';

/// Stored representation of one document.
#[derive(Debug, Clone)]
pub(crate) enum EncodedDoc {
    Plain(DocumentRecord),
    Packed(String),
}

impl EncodedDoc {
    pub(crate) fn encode(doc: DocumentRecord, encoding: FieldEncoding) -> Self {
        match encoding {
            FieldEncoding::Plain => EncodedDoc::Plain(doc),
            FieldEncoding::Packed => EncodedDoc::Packed(pack(&doc)),
        }
    }

    pub(crate) fn decode(&self) -> anyhow::Result<DocumentRecord> {
        match self {
            EncodedDoc::Plain(doc) => Ok(doc.clone()),
            EncodedDoc::Packed(buf) => unpack(buf),
        }
    }
}

fn flag_bits(flags: FieldFlags) -> u8 {
    u8::from(flags.stored) | u8::from(flags.indexed) << 1 | u8::from(flags.analyzed) << 2
}

fn flags_from_bits(bits: u8) -> FieldFlags {
    FieldFlags {
        stored: bits & 1 != 0,
        indexed: bits & 2 != 0,
        analyzed: bits & 4 != 0,
    }
}

fn pack(doc: &DocumentRecord) -> String {
    let mut buf = String::with_capacity(doc.approx_bytes() as usize + doc.fields().len() * 4);
    for field in doc.fields() {
        buf.push_str(&field.name);
        buf.push(PART_SEP);
        buf.push_str(&field.value);
        buf.push(PART_SEP);
        buf.push(char::from(b'0' + flag_bits(field.flags)));
        buf.push(FIELD_SEP);
    }
    buf
}

fn unpack(buf: &str) -> anyhow::Result<DocumentRecord> {
    let mut doc = DocumentRecord::new();
    for entry in buf.split(FIELD_SEP).filter(|entry| !entry.is_empty()) {
        let mut parts = entry.splitn(3, PART_SEP);
        let name = parts.next().context("packed field without a name")?;
        let value = parts.next().context("packed field without a value")?;
        let bits = parts
            .next()
            .and_then(|flags| flags.chars().next())
            .context("packed field without flags")?;
        let bits = (bits as u32)
            .checked_sub('0' as u32)
            .filter(|bits| *bits < 8)
            .context("packed field flags out of range")? as u8;
        doc.push(name.to_string(), value, flags_from_bits(bits));
    }
    Ok(doc)
}

struct Slot {
    key: String,
    doc: EncodedDoc,
    deleted: bool,
}

/// One immutable-after-seal run of documents plus its term statistics.
/// The open write buffer is just a segment that is still growing.
pub(crate) struct Segment {
    slots: Vec<Slot>,
    index: HashMap<String, Vec<usize>>,
    live: usize,
    bytes: u64,
    terms: BTreeMap<String, u64>,
}

impl Segment {
    pub(crate) fn new() -> Self {
        Segment {
            slots: Vec::new(),
            index: HashMap::new(),
            live: 0,
            bytes: 0,
            terms: BTreeMap::new(),
        }
    }

    pub(crate) fn push(
        &mut self,
        key: String,
        doc: DocumentRecord,
        encoding: FieldEncoding,
        analyzer: &TextAnalyzer,
    ) {
        for field in doc.fields() {
            if field.flags.indexed && field.flags.analyzed {
                for token in analyzer.tokenize(&field.value) {
                    *self.terms.entry(token).or_default() += 1;
                }
            }
        }
        self.bytes += doc.approx_bytes();
        let slot = self.slots.len();
        self.index.entry(key.clone()).or_default().push(slot);
        self.slots.push(Slot {
            key,
            doc: EncodedDoc::encode(doc, encoding),
            deleted: false,
        });
        self.live += 1;
    }

    /// Tombstone every live slot under `key`; returns how many were hit.
    pub(crate) fn delete(&mut self, key: &str) -> usize {
        let Some(slots) = self.index.get(key) else {
            return 0;
        };
        let mut hit = 0;
        for &slot in slots {
            if !self.slots[slot].deleted {
                self.slots[slot].deleted = true;
                hit += 1;
            }
        }
        self.live -= hit;
        hit
    }

    pub(crate) fn doc_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.bytes
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn term_count(&self, term: &str) -> u64 {
        self.terms.get(term).copied().unwrap_or(0)
    }

    pub(crate) fn get(&self, key: &str) -> anyhow::Result<Option<DocumentRecord>> {
        let Some(slots) = self.index.get(key) else {
            return Ok(None);
        };
        for &slot in slots {
            if !self.slots[slot].deleted {
                return self.slots[slot].doc.decode().map(Some);
            }
        }
        Ok(None)
    }

    pub(crate) fn live_docs(&self) -> anyhow::Result<Vec<DocumentRecord>> {
        self.slots
            .iter()
            .filter(|slot| !slot.deleted)
            .map(|slot| slot.doc.decode())
            .collect()
    }
}

/// Rebuild one segment from the live documents of the victims, dropping
/// tombstoned slots for good.
pub(crate) fn merge(
    victims: Vec<Segment>,
    encoding: FieldEncoding,
    analyzer: &TextAnalyzer,
) -> anyhow::Result<Segment> {
    let mut merged = Segment::new();
    for victim in victims {
        for slot in victim.slots {
            if !slot.deleted {
                let doc = slot.doc.decode()?;
                merged.push(slot.key, doc, encoding, analyzer);
            }
        }
    }
    Ok(merged)
}
