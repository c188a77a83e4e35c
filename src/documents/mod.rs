// FAQ document model
// Normalises raw question/answer pairs and filters length outliers before indexing


use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::DocumentConfig;

/// Closing survey line the FAQ site appends to every answer
pub const ANSWER_FOOTER: &str = "위 도움말이 도움이 되었나요?";

const QUESTION_LABEL: &str = "질문";
const ANSWER_LABEL: &str = "대답";

/// Metadata keys hidden from the LLM; the chunk text already carries them
pub const LLM_EXCLUDED_METADATA: &[&str] = &["question", "answer"];

/// Metadata stored alongside every FAQ document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub question: String,
    pub answer: String,
    /// Comma separated category path, e.g. "판매관리, 배송"
    pub categories: String,
}

impl DocumentMetadata {
    /// Metadata entries in display order
    #[inline]
    pub fn entries(&self) -> [(&'static str, &str); 3] {
        [
            ("question", self.question.as_str()),
            ("answer", self.answer.as_str()),
            ("categories", self.categories.as_str()),
        ]
    }
}

/// A normalised FAQ entry ready for chunking and embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaqDocument {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl FaqDocument {
    /// Build a document from one raw question/answer pair
    #[inline]
    pub fn from_raw(raw_question: &str, raw_answer: &str) -> Self {
        let answer = clean_answer(raw_answer);
        let (categories, question) = parse_question(raw_question);

        Self {
            id: Uuid::new_v4().to_string(),
            text: format!("{QUESTION_LABEL}: {question}\n{ANSWER_LABEL}: {answer}"),
            metadata: DocumentMetadata {
                question,
                answer,
                categories,
            },
        }
    }

    /// The bare document text without any metadata
    #[inline]
    pub fn content(&self) -> &str {
        &self.text
    }

    /// Length of the bare text in characters
    #[inline]
    pub fn content_length(&self) -> usize {
        self.text.chars().count()
    }

    /// Text sent to the embedding model: every metadata entry plus the content
    #[inline]
    pub fn embed_content(&self, config: &DocumentConfig) -> String {
        render_with_metadata(&self.text, &self.metadata, &[], config)
    }

    /// Text shown to the LLM: categories plus the content
    #[inline]
    pub fn llm_content(&self, config: &DocumentConfig) -> String {
        render_with_metadata(&self.text, &self.metadata, LLM_EXCLUDED_METADATA, config)
    }
}

/// Strip the survey footer and surrounding whitespace from an answer
#[inline]
pub fn clean_answer(raw_answer: &str) -> String {
    raw_answer
        .split(ANSWER_FOOTER)
        .next()
        .unwrap_or(raw_answer)
        .trim()
        .to_string()
}

/// Split `[Category][Sub category] Question` into `("Category, Sub category", "Question")`
#[inline]
pub fn parse_question(raw_question: &str) -> (String, String) {
    let parts: Vec<&str> = raw_question.trim().split(']').collect();
    let (question, category_parts) = parts
        .split_last()
        .map_or(("", &[][..]), |(last, rest)| (*last, rest));

    let categories = category_parts
        .iter()
        .map(|part| part.replace('[', "").trim().to_string())
        .filter(|part| !part.is_empty())
        .join(", ");

    (categories, question.trim().to_string())
}

/// Render content with its metadata block using the configured templates
#[inline]
pub fn render_with_metadata(
    content: &str,
    metadata: &DocumentMetadata,
    excluded_keys: &[&str],
    config: &DocumentConfig,
) -> String {
    let metadata_str = metadata
        .entries()
        .into_iter()
        .filter(|(key, _)| !excluded_keys.contains(key))
        .map(|(key, value)| {
            config
                .metadata_template
                .replace("{key}", key)
                .replace("{value}", value)
        })
        .join(&config.metadata_separator);

    let metadata_str = metadata_str.trim();
    if metadata_str.is_empty() {
        return content.to_string();
    }

    config
        .text_template
        .replace("{metadata_str}", metadata_str)
        .replace("{content}", content)
        .trim()
        .to_string()
}

/// Percentile of an ascending slice using linear interpolation between ranks
#[inline]
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    Some((sorted[upper] - sorted[lower]).mul_add(weight, sorted[lower]))
}

/// Inclusive Tukey fences over document lengths
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierBounds {
    pub lower: f64,
    pub upper: f64,
}

impl OutlierBounds {
    #[inline]
    pub fn contains(&self, length: usize) -> bool {
        let length = length as f64;
        length >= self.lower && length <= self.upper
    }
}

/// Compute `Q1 - 1.5 IQR` and `Q3 + 1.5 IQR` for the given lengths
#[inline]
pub fn outlier_bounds(lengths: &[usize]) -> Option<OutlierBounds> {
    let mut sorted: Vec<f64> = lengths.iter().map(|&len| len as f64).collect();
    sorted.sort_by(f64::total_cmp);

    let q1 = percentile(&sorted, 25.0)?;
    let q3 = percentile(&sorted, 75.0)?;
    let iqr = q3 - q1;

    Some(OutlierBounds {
        lower: 1.5f64.mul_add(-iqr, q1),
        upper: 1.5f64.mul_add(iqr, q3),
    })
}

/// Documents split by the outlier filter
#[derive(Debug, Clone, Default)]
pub struct OutlierReport {
    pub kept: Vec<FaqDocument>,
    pub too_short: Vec<FaqDocument>,
    pub too_long: Vec<FaqDocument>,
    pub bounds: Option<OutlierBounds>,
}

/// Drop documents whose content length falls outside the IQR fences
#[inline]
pub fn filter_outliers(documents: Vec<FaqDocument>) -> OutlierReport {
    let lengths: Vec<usize> = documents.iter().map(FaqDocument::content_length).collect();
    let Some(bounds) = outlier_bounds(&lengths) else {
        return OutlierReport::default();
    };

    let mut report = OutlierReport {
        bounds: Some(bounds),
        ..OutlierReport::default()
    };

    for document in documents {
        let length = document.content_length();
        if bounds.contains(length) {
            report.kept.push(document);
        } else if (length as f64) < bounds.lower {
            report.too_short.push(document);
        } else {
            report.too_long.push(document);
        }
    }

    debug!(
        "Outlier bounds [{:.1}, {:.1}]: {} too short, {} too long, {} kept",
        bounds.lower,
        bounds.upper,
        report.too_short.len(),
        report.too_long.len(),
        report.kept.len()
    );

    report
}

/// Length statistics of a document set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthStats {
    pub min: usize,
    pub max: usize,
    pub mean: usize,
}

impl LengthStats {
    #[inline]
    pub fn from_documents(documents: &[FaqDocument]) -> Option<Self> {
        let lengths: Vec<usize> = documents.iter().map(FaqDocument::content_length).collect();
        let min = *lengths.iter().min()?;
        let max = *lengths.iter().max()?;
        let mean = lengths.iter().sum::<usize>() / lengths.len();
        Some(Self { min, max, mean })
    }
}
