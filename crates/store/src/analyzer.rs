use std::str::FromStr;

/// Tokenization variant applied to analyzed fields on the way into a
/// segment's term statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAnalyzer {
    /// Split on whitespace, keep case.
    Whitespace,
    /// Split on non-alphanumeric runs, lowercase.
    Standard,
    /// Standard plus stopword removal and light suffix stripping.
    English,
    /// Standard tokens plus word bigrams.
    ShingleStandard,
}

impl FromStr for TextAnalyzer {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whitespace" => Ok(Self::Whitespace),
            "standard" => Ok(Self::Standard),
            "english" => Ok(Self::English),
            "shingle-standard" => Ok(Self::ShingleStandard),
            _ => anyhow::bail!("unknown analyzer {s:?}"),
        }
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

impl TextAnalyzer {
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        match self {
            TextAnalyzer::Whitespace => text.split_whitespace().map(str::to_string).collect(),
            TextAnalyzer::Standard => standard_tokens(text),
            TextAnalyzer::English => standard_tokens(text)
                .into_iter()
                .filter(|token| !STOPWORDS.contains(&token.as_str()))
                .map(strip_suffix)
                .collect(),
            TextAnalyzer::ShingleStandard => {
                let unigrams = standard_tokens(text);
                let mut tokens = unigrams.clone();
                for pair in unigrams.windows(2) {
                    tokens.push(format!("{} {}", pair[0], pair[1]));
                }
                tokens
            }
        }
    }
}

fn standard_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn strip_suffix(token: String) -> String {
    if token.len() > 5 && token.ends_with("ing") {
        token[..token.len() - 3].to_string()
    } else if token.len() > 4 && token.ends_with("ed") {
        token[..token.len() - 2].to_string()
    } else if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token
    }
}
