use num_rational::Ratio;

use rand::distr::{Alphanumeric, SampleString};
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

pub const DEFAULT_SEED: u64 = 17;

/// One row of a tab-separated corpus file. Ids are not part of the file;
/// the source assigns them in consumption order.
#[derive(Debug, Clone, PartialEq)]
pub struct LineDoc {
    pub title: String,
    pub date: String,
    pub body: String,
}

impl LineDoc {
    pub fn serialize_line<W>(&self, writer: &mut csv::Writer<W>) -> anyhow::Result<()>
    where
        W: std::io::Write,
    {
        writer.write_field(self.title.as_bytes())?;
        writer.write_field(self.date.as_bytes())?;
        writer.write_field(self.body.as_bytes())?;
        writer.write_record(None::<&[u8]>)?;
        Ok(())
    }
}

/// Synthetic corpus stream. A small pool of frequent terms grows as the
/// stream advances and gets mixed into bodies, so term frequencies are
/// skewed the way real text is.
pub struct CorpusGenerator {
    rng: SmallRng,
    frequent_pool: Vec<String>,
}

impl CorpusGenerator {
    const POOL_GROWTH: Ratio<u32> = Ratio::new_raw(1, 100);
    const FREQUENT_WORDS: Ratio<u32> = Ratio::new_raw(50, 100);

    const DATE_BOUNDARY: u64 = 1742817035;

    pub fn new() -> Self {
        Self::from_rng(SmallRng::from_os_rng())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(SmallRng::seed_from_u64(seed))
    }

    fn from_rng(rng: SmallRng) -> Self {
        CorpusGenerator {
            rng,
            frequent_pool: Vec::new(),
        }
    }

    fn random_ratio(&mut self, ratio: Ratio<u32>) -> bool {
        self.rng.random_ratio(*ratio.numer(), *ratio.denom())
    }

    fn fresh_word(&mut self) -> String {
        let len = self.rng.random_range(3..=10);
        Alphanumeric.sample_string(&mut self.rng, len)
    }

    fn next_word(&mut self) -> String {
        if self.random_ratio(Self::FREQUENT_WORDS)
            && let Some(word) = self.frequent_pool.choose(&mut self.rng)
        {
            return word.clone();
        }
        self.fresh_word()
    }

    fn words(&mut self, count: usize) -> String {
        let mut text = String::new();
        for i in 0..count {
            if i > 0 {
                text.push(' ');
            }
            text.push_str(&self.next_word());
        }
        text
    }
}

impl Default for CorpusGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for CorpusGenerator {
    type Item = LineDoc;

    fn next(&mut self) -> Option<Self::Item> {
        if self.random_ratio(Self::POOL_GROWTH) {
            let word = self.fresh_word();
            self.frequent_pool.push(word);
        }
        let title_len = self.rng.random_range(2..=4);
        let title = self.words(title_len);
        let date = self.rng.random_range(0..Self::DATE_BOUNDARY).to_string();
        let body_len = self.rng.random_range(20..=60);
        let body = self.words(body_len);
        Some(LineDoc { title, date, body })
    }
}

pub(crate) fn write_corpus<W>(writer: W, count: usize, seed: u64) -> anyhow::Result<()>
where
    W: std::io::Write,
{
    let mut csv_file = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    let docs = CorpusGenerator::with_seed(seed);
    for doc in docs.take(count) {
        doc.serialize_line(&mut csv_file)?;
    }
    csv_file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_generation_is_deterministic() {
        let a: Vec<LineDoc> = CorpusGenerator::with_seed(7).take(32).collect();
        let b: Vec<LineDoc> = CorpusGenerator::with_seed(7).take(32).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_diverge() {
        let a: Vec<LineDoc> = CorpusGenerator::with_seed(7).take(8).collect();
        let b: Vec<LineDoc> = CorpusGenerator::with_seed(8).take(8).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn docs_have_plausible_shape() {
        for doc in CorpusGenerator::with_seed(17).take(64) {
            let title_words = doc.title.split_whitespace().count();
            assert!((2..=4).contains(&title_words), "title: {}", doc.title);
            let body_words = doc.body.split_whitespace().count();
            assert!((20..=60).contains(&body_words), "body words: {body_words}");
            assert!(doc.date.parse::<u64>().is_ok());
        }
    }
}
