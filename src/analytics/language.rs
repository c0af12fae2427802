//! 言語判定
//!
//! 本番の判定器は外部コンポーネントで、ここではそのインタフェースと
//! 文字種ベースの簡易判定器を提供する。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// スキップ言語として受け付ける最大数
pub const MAX_SKIP_LANGUAGES: usize = 5;

/// 受け付ける言語名
pub const KNOWN_LANGUAGES: &[&str] = &[
    "ALBANIAN", "ARABIC", "AZERBAIJANI", "CHINESE", "DANISH", "DUTCH", "ENGLISH", "ESTONIAN",
    "FRENCH", "GERMAN", "GREEK", "HEBREW", "HINDI", "INDONESIAN", "ITALIAN", "JAPANESE",
    "KOREAN", "MAORI", "NYNORSK", "PERSIAN", "POLISH", "PORTUGUESE", "RUSSIAN", "SOMALI",
    "SPANISH", "SWEDISH", "TAGALOG", "THAI", "TURKISH", "UKRAINIAN", "URDU", "VIETNAMESE",
];

/// 言語タグ（"ENGLISH", "KOREAN" のような大文字名）
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct LanguageTag(String);

impl LanguageTag {
    pub const UNKNOWN: &'static str = "UNKNOWN";

    /// 既知の言語名から作成（大文字小文字は問わない）
    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.trim().to_uppercase();
        KNOWN_LANGUAGES
            .contains(&upper.as_str())
            .then_some(Self(upper))
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn known(name: &'static str) -> Self {
        Self(name.to_string())
    }
}

/// 判定結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub language: LanguageTag,
    /// 0.0〜1.0
    pub confidence: f64,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            language: LanguageTag::unknown(),
            confidence: 0.0,
        }
    }
}

/// 言語判定器のインタフェース
pub trait LanguageClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Classification;
}

/// クエリパラメータからスキップ言語を解析
///
/// カンマ区切り・複数指定の両方に対応。未知の言語名は無視し、最大5件まで。
pub fn parse_skip_languages<S: AsRef<str>>(values: &[S]) -> BTreeSet<LanguageTag> {
    let mut result = BTreeSet::new();
    for name in values.iter().flat_map(|v| v.as_ref().split(',')) {
        if result.len() >= MAX_SKIP_LANGUAGES {
            break;
        }
        match LanguageTag::parse(name) {
            Some(tag) => {
                result.insert(tag);
            }
            None if !name.trim().is_empty() => {
                tracing::debug!("Ignoring unknown skip language: {}", name.trim());
            }
            None => {}
        }
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Script {
    Hangul,
    Kana,
    Han,
    Cyrillic,
    Arabic,
    Thai,
    Hebrew,
    Greek,
    Devanagari,
    Latin,
}

fn script_of(c: char) -> Option<Script> {
    let script = match c as u32 {
        0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F => Script::Hangul,
        0x3040..=0x30FF | 0x31F0..=0x31FF | 0xFF66..=0xFF9F => Script::Kana,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF => Script::Han,
        0x0400..=0x04FF => Script::Cyrillic,
        0x0600..=0x06FF | 0x0750..=0x077F => Script::Arabic,
        0x0E00..=0x0E7F => Script::Thai,
        0x0590..=0x05FF => Script::Hebrew,
        0x0370..=0x03FF => Script::Greek,
        0x0900..=0x097F => Script::Devanagari,
        _ if c.is_alphabetic() && (c.is_ascii() || ('\u{00C0}'..='\u{024F}').contains(&c)) => {
            Script::Latin
        }
        _ => return None,
    };
    Some(script)
}

/// ラテン文字言語の手がかりとなる頻出語
const LATIN_HINTS: &[(&str, &[&str])] = &[
    ("SPANISH", &["que", "el", "los", "por", "gracias", "hola", "muy", "pero", "como", "está"]),
    ("FRENCH", &["je", "les", "est", "merci", "bonjour", "c'est", "oui", "pas", "vous", "très"]),
    ("GERMAN", &["und", "ich", "nicht", "danke", "das", "ist", "hallo", "sehr", "auch", "gut"]),
    ("PORTUGUESE", &["obrigado", "não", "você", "muito", "olá", "bom", "tudo", "isso"]),
    ("INDONESIAN", &["yang", "dan", "tidak", "terima", "kasih", "apa", "ini", "itu"]),
    ("TAGALOG", &["ang", "mga", "salamat", "po", "ako", "ikaw", "naman", "talaga"]),
];

/// 文字種による簡易言語判定
///
/// 非ラテン文字は文字種からほぼ一意に決まる。ラテン文字は頻出語で
/// 推定し、手がかりがなければ ENGLISH とみなす（信頼度は低め）。
#[derive(Debug, Clone)]
pub struct ScriptLanguageClassifier {
    min_confidence: f64,
}

impl Default for ScriptLanguageClassifier {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl ScriptLanguageClassifier {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }

    fn classify_latin(text: &str) -> (&'static str, f64) {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
            .collect();

        let best = LATIN_HINTS
            .iter()
            .map(|(lang, hints)| {
                let hits = words.iter().filter(|w| hints.contains(w)).count();
                (*lang, hits)
            })
            .max_by_key(|(_, hits)| *hits);

        match best {
            Some((lang, hits)) if hits > 0 => {
                let confidence = (0.6 + 0.1 * hits as f64).min(0.95);
                (lang, confidence)
            }
            _ => ("ENGLISH", 0.6),
        }
    }
}

impl LanguageClassifier for ScriptLanguageClassifier {
    fn classify(&self, text: &str) -> Classification {
        let mut counts: HashMap<Script, usize> = HashMap::new();
        let mut letters = 0usize;
        for script in text.chars().filter_map(script_of) {
            *counts.entry(script).or_default() += 1;
            letters += 1;
        }
        if letters == 0 {
            return Classification::unknown();
        }

        // かなが含まれていれば漢字混じりでも日本語
        let kana = counts.get(&Script::Kana).copied().unwrap_or(0);
        let han = counts.get(&Script::Han).copied().unwrap_or(0);
        let (dominant, dominant_count) = if kana > 0 {
            (Script::Kana, kana + han)
        } else {
            counts
                .iter()
                .max_by_key(|(_, count)| **count)
                .map(|(s, c)| (*s, *c))
                .unwrap_or((Script::Latin, 0))
        };
        let coverage = dominant_count as f64 / letters as f64;

        let (name, base_confidence) = match dominant {
            Script::Hangul => ("KOREAN", 0.99),
            Script::Kana => ("JAPANESE", 0.99),
            Script::Han => ("CHINESE", 0.9),
            Script::Cyrillic => ("RUSSIAN", 0.8),
            Script::Arabic => ("ARABIC", 0.8),
            Script::Thai => ("THAI", 0.99),
            Script::Hebrew => ("HEBREW", 0.99),
            Script::Greek => ("GREEK", 0.99),
            Script::Devanagari => ("HINDI", 0.9),
            Script::Latin => Self::classify_latin(text),
        };

        let confidence = base_confidence * coverage;
        if confidence < self.min_confidence {
            return Classification {
                language: LanguageTag::unknown(),
                confidence,
            };
        }

        Classification {
            language: LanguageTag::known(name),
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str) -> LanguageTag {
        LanguageTag::parse(name).unwrap()
    }

    #[test]
    fn test_language_tag_parse() {
        assert_eq!(tag("korean").as_str(), "KOREAN");
        assert_eq!(tag(" English ").as_str(), "ENGLISH");
        assert!(LanguageTag::parse("KLINGON").is_none());
        assert!(LanguageTag::unknown().is_unknown());
    }

    #[test]
    fn test_parse_skip_languages() {
        let langs = parse_skip_languages(&["english,korean", "klingon", "SPANISH"]);
        let names: Vec<&str> = langs.iter().map(|t| t.as_str()).collect();
        assert_eq!(names, vec!["ENGLISH", "KOREAN", "SPANISH"]);
    }

    #[test]
    fn test_parse_skip_languages_is_capped() {
        let langs = parse_skip_languages(&[
            "english,korean,spanish,french,german,dutch,polish",
        ]);
        assert_eq!(langs.len(), MAX_SKIP_LANGUAGES);
        assert!(!langs.contains(&tag("DUTCH")));
    }

    #[test]
    fn test_script_classification() {
        let classifier = ScriptLanguageClassifier::default();
        assert_eq!(classifier.classify("안녕하세요 여러분").language, tag("KOREAN"));
        assert_eq!(classifier.classify("こんにちは世界").language, tag("JAPANESE"));
        assert_eq!(classifier.classify("你好世界").language, tag("CHINESE"));
        assert_eq!(classifier.classify("привет всем").language, tag("RUSSIAN"));
        assert_eq!(classifier.classify("hello everyone").language, tag("ENGLISH"));
        assert_eq!(
            classifier.classify("hola que tal, muchas gracias").language,
            tag("SPANISH")
        );
    }

    #[test]
    fn test_unclassifiable_text() {
        let classifier = ScriptLanguageClassifier::default();
        assert!(classifier.classify("!!! 123 🎉").language.is_unknown());
        assert!(classifier.classify("").language.is_unknown());
    }

    #[test]
    fn test_min_confidence_threshold() {
        let strict = ScriptLanguageClassifier::new(0.99);
        let result = strict.classify("hello everyone");
        assert!(result.language.is_unknown());
        assert!(result.confidence > 0.0);
    }
}
