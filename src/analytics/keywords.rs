//! チャット本文のキーワード抽出
//!
//! 空白で分割し、小文字化・前後の記号除去を行ったうえで、
//! 短すぎる語・数値・記号のみ・同一文字の繰り返し・ストップワードを除外する。

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// 抽出対象とする最小文字数（コードポイント単位）
pub const MIN_TOKEN_CHARS: usize = 3;

const ENGLISH_STOPWORDS: &[&str] = &[
    "me", "my", "myself", "we", "our", "ours", "you", "your", "yours", "he", "him", "his", "she",
    "her", "hers", "it", "its", "they", "them", "their", "what", "which", "who", "whom", "this",
    "that", "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have",
    "has", "had", "do", "does", "did", "an", "the", "hi", "yo", "i'm", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "to", "from", "up", "down", "in",
    "out", "on", "off", "over", "under", "again", "further", "then", "once", "here", "there",
    "when", "where", "why", "how", "all", "any", "both", "each", "few", "more", "most", "other",
    "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than", "too", "very",
    "can", "will", "just", "don", "should", "now", "it's", "they're", "you're", "ur", "don't",
    "dont", "yea", "yeah", "ok", "okie", "okay",
];

const KOREAN_STOPWORDS: &[&str] = &[
    "이", "그", "저", "것", "수", "들", "등", "에서", "에게", "으로", "하다", "이다", "입니다",
    "있다", "없다", "그리고", "하지만", "그러나", "때문", "그래서", "만약", "만", "뿐", "의",
    "를", "은", "는", "이야", "아니", "한", "한번", "많이", "모두", "너", "나", "우리", "또한",
    "더", "더욱", "아직", "이미", "정말", "저기", "여기", "그곳", "뭐",
];

const FRENCH_STOPWORDS: &[&str] = &["les", "le", "la", "las", "des", "de", "pas", "est"];

/// キーワード抽出器
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    stopwords: HashSet<String>,
}

impl Default for KeywordScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordScorer {
    /// 組み込みストップワード（英語・韓国語・フランス語）で作成
    pub fn new() -> Self {
        let stopwords = ENGLISH_STOPWORDS
            .iter()
            .chain(KOREAN_STOPWORDS)
            .chain(FRENCH_STOPWORDS)
            .map(|w| w.to_string())
            .collect();
        Self { stopwords }
    }

    /// 追加のストップワードを登録
    pub fn with_extra_stopwords<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in words {
            let word = word.as_ref().trim().to_lowercase();
            if !word.is_empty() {
                self.stopwords.insert(word);
            }
        }
        self
    }

    /// ストップワードファイルを読み込む（1行1語、`#` 以降はコメント）
    pub fn load_stopword_file(self, path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read stopword file: {}", path.display()))?;

        let words: Vec<&str> = content
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default().trim())
            .filter(|line| !line.is_empty())
            .collect();

        tracing::info!(
            "📚 Loaded {} extra stopwords from {}",
            words.len(),
            path.display()
        );
        Ok(self.with_extra_stopwords(words))
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.contains(word)
    }

    /// 本文からキーワード候補を抽出（出現ごとに1トークン）
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        if text.chars().count() < MIN_TOKEN_CHARS {
            return Vec::new();
        }

        text.split_whitespace()
            .filter_map(|raw| {
                let token = raw
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase();
                self.accepts(&token).then_some(token)
            })
            .collect()
    }

    fn accepts(&self, token: &str) -> bool {
        token.chars().count() >= MIN_TOKEN_CHARS
            && !is_numeric(token)
            && !is_symbol_only(token)
            && !is_repeated_char(token)
            && !is_korean_vowels_only(token)
            && !self.is_stopword(token)
    }
}

fn is_numeric(token: &str) -> bool {
    let body = token.strip_prefix('-').unwrap_or(token);
    body.chars().any(|c| c.is_ascii_digit())
        && body.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
        && body.matches('.').count() <= 1
}

fn is_symbol_only(token: &str) -> bool {
    !token.chars().any(|c| c.is_alphanumeric())
}

fn is_repeated_char(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => false,
    }
}

/// ㅏ〜ㅣ（ハングル互換字母の母音）のみで構成されているか
fn is_korean_vowels_only(token: &str) -> bool {
    token.chars().all(|c| ('\u{314F}'..='\u{3163}').contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tokenization() {
        let scorer = KeywordScorer::new();
        let tokens = scorer.tokenize("Rust is AMAZING, rust rocks!");
        assert_eq!(tokens, vec!["rust", "amazing", "rust", "rocks"]);
    }

    #[test]
    fn test_short_message_yields_nothing() {
        let scorer = KeywordScorer::new();
        assert!(scorer.tokenize("gg").is_empty());
        assert!(scorer.tokenize("").is_empty());
    }

    #[test]
    fn test_filters() {
        let scorer = KeywordScorer::new();
        // 数値・記号のみ・繰り返し・母音のみ・短い語
        let tokens = scorer.tokenize("123 -4.5 !!! ??? wwww ㅏㅑㅓ ㅋㅋㅋ ab poggers");
        assert_eq!(tokens, vec!["poggers"]);
    }

    #[test]
    fn test_stopwords_are_dropped() {
        let scorer = KeywordScorer::new();
        let tokens = scorer.tokenize("what are you doing there yeah okay");
        assert_eq!(tokens, vec!["doing"]);

        // 그리고 と les はストップワード、정말/대박 は2文字なので除外
        let tokens = scorer.tokenize("그리고 정말 대박 les fromage");
        assert_eq!(tokens, vec!["fromage"]);
    }

    #[test]
    fn test_punctuation_is_stripped() {
        let scorer = KeywordScorer::new();
        let tokens = scorer.tokenize("\"hello\" (world) ...nice...");
        assert_eq!(tokens, vec!["hello", "world", "nice"]);
    }

    #[test]
    fn test_extra_stopwords() {
        let scorer = KeywordScorer::new().with_extra_stopwords(["Hello", " "]);
        assert!(scorer.is_stopword("hello"));
        assert_eq!(scorer.tokenize("hello streamer"), vec!["streamer"]);
    }

    #[test]
    fn test_load_stopword_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stopwords.txt");
        std::fs::write(&path, "# comment\nbanana\n  cherry # fruit\n\n").unwrap();

        let scorer = KeywordScorer::new().load_stopword_file(&path).unwrap();
        assert_eq!(scorer.tokenize("banana cherry mango"), vec!["mango"]);
    }
}
