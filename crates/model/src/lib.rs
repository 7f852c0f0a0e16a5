pub mod corpus;
pub mod source;

use std::borrow::Cow;

use anyhow::Context as _;

pub use source::{DocumentSource, LineFileSource, SyntheticSource};

/// Name of the mandatory key field every document must carry.
pub const ID_FIELD: &str = "id";

/// Storage hints attached to a field, mirrored into the store's segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldFlags {
    pub stored: bool,
    pub indexed: bool,
    pub analyzed: bool,
}

impl FieldFlags {
    /// Stored and indexed verbatim (ids, dates).
    pub const fn keyword() -> Self {
        FieldFlags {
            stored: true,
            indexed: true,
            analyzed: false,
        }
    }

    /// Stored, indexed and tokenized (titles).
    pub const fn text() -> Self {
        FieldFlags {
            stored: true,
            indexed: true,
            analyzed: true,
        }
    }

    /// Indexed and tokenized but not kept retrievable (bodies).
    pub const fn body_text() -> Self {
        FieldFlags {
            stored: false,
            indexed: true,
            analyzed: true,
        }
    }

    /// Indexed verbatim, never stored (grouping labels, markers).
    pub const fn label() -> Self {
        FieldFlags {
            stored: false,
            indexed: true,
            analyzed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: Cow<'static, str>,
    pub value: String,
    pub flags: FieldFlags,
}

/// An ordered set of named fields. The record is owned by the worker that
/// pulled it until it is handed to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentRecord {
    fields: Vec<Field>,
}

impl DocumentRecord {
    pub fn new() -> Self {
        DocumentRecord { fields: Vec::new() }
    }

    pub fn push(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        value: impl Into<String>,
        flags: FieldFlags,
    ) {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
            flags,
        });
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.value.as_str())
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// The document's logical index, parsed from the mandatory `id` field.
    pub fn id(&self) -> anyhow::Result<u64> {
        let raw = self
            .get(ID_FIELD)
            .context("document carries no id field")?;
        raw.parse::<u64>()
            .with_context(|| format!("document id {raw:?} is not a non-negative integer"))
    }

    pub fn approx_bytes(&self) -> u64 {
        self.fields
            .iter()
            .map(|field| (field.name.len() + field.value.len()) as u64)
            .sum()
    }
}

/// How a document id is rendered into its store key. Upsert replacement,
/// the deletion phase and the store itself must all agree on this.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyEncoding {
    /// Zero-padded 9-digit decimal; sorts like the numeric id.
    #[default]
    Padded,
    /// Lowercase hexadecimal, no padding.
    Compact,
}

pub fn encode_id(id: u64, encoding: KeyEncoding) -> String {
    match encoding {
        KeyEncoding::Padded => format!("{id:09}"),
        KeyEncoding::Compact => format!("{id:x}"),
    }
}

pub fn out_dir_path() -> Box<std::path::Path> {
    let out_dir = env!("CORPUS_DIR");
    std::path::Path::new(out_dir).into()
}

/// Pregenerate corpus files of the given sizes into the scratch directory.
/// Existing files are left alone so repeated builds stay cheap.
pub fn generate_corpora(counts: impl Iterator<Item = usize>) -> anyhow::Result<()> {
    let out_dir = out_dir_path();
    for count in counts {
        let file_name = format!("docs_{count}.tsv");
        let file_path = out_dir.join(file_name.as_str());
        if let Ok(file) = std::fs::File::create_new(file_path) {
            corpus::write_corpus(file, count, corpus::DEFAULT_SEED)?;
        }
    }
    Ok(())
}

pub fn write_corpus_file(
    path: &std::path::Path,
    count: usize,
    seed: u64,
) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("cannot create corpus file {}", path.display()))?;
    corpus::write_corpus(file, count, seed)
}

pub fn list_corpus_files() -> anyhow::Result<impl Iterator<Item = (u64, std::path::PathBuf)>> {
    // IMPLEMENTATION NOTES:
    // We need to iterate over all `out_dir` entries to catch any io errors.
    // Otherwise, we have to unwrap this values, which might be unexpected.

    let out_dir = out_dir_path();

    let mut files = vec![];
    for entry in std::fs::read_dir(out_dir)? {
        let path = entry?.path();
        if path.is_file() {
            let count = get_doc_count(&path)?;
            files.push((count, path));
        }
    }

    files.sort();

    Ok(files.into_iter())
}

fn get_doc_count(path: &std::path::Path) -> anyhow::Result<u64> {
    let Some(stem) = path.file_stem() else {
        anyhow::bail!("invalid corpus file path: {}", path.display());
    };
    let Some(stem) = stem.to_str() else {
        anyhow::bail!("non ascii character in corpus file path");
    };
    let count = stem[5..].parse::<u64>()?;
    Ok(count)
}
