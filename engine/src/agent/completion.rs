//! Completion Heuristic
//!
//! Scores whether a model response without pending tool calls means the task
//! is done. The score starts from the strongest matched phrase group, is
//! scaled down by penalties and nudged up by small bonuses, then compared to
//! a threshold.
//!
//! The phrase table is English-only.

use serde::{Deserialize, Serialize};

/// Default confidence needed to end a turn early
pub const DEFAULT_THRESHOLD: f64 = 0.7;

const PENDING_PENALTY: f64 = 0.1;
const ANALYSIS_WITHOUT_RESULTS_PENALTY: f64 = 0.3;
const SUMMARY_REQUEST_PENALTY: f64 = 0.2;

const NO_TOOL_CALL_BONUS: f64 = 0.1;
const LENGTH_BONUS: f64 = 0.05;
const DIRECT_ANSWER_BONUS: f64 = 0.1;
const LENGTH_BONUS_MIN_CHARS: usize = 200;

/// A group of phrases sharing one weight
#[derive(Debug, Clone, Copy)]
pub struct PhraseGroup {
    pub weight: f64,
    pub reason: &'static str,
    pub phrases: &'static [&'static str],
}

const PHRASE_GROUPS: &[PhraseGroup] = &[
    PhraseGroup {
        weight: 0.9,
        reason: "explicit completion statement",
        phrases: &[
            "task completed",
            "task is complete",
            "task has been completed",
            "task is done",
            "i have completed",
            "i've completed",
            "completed successfully",
            "successfully completed",
            "all done",
            "everything is done",
            "all requested steps are done",
        ],
    },
    PhraseGroup {
        weight: 0.7,
        reason: "summary or conclusion delivered",
        phrases: &[
            "in summary",
            "to summarize",
            "in conclusion",
            "summary:",
            "here is a summary",
            "here's a summary",
            "key findings",
            "overall,",
        ],
    },
    PhraseGroup {
        weight: 0.6,
        reason: "offered further assistance",
        phrases: &[
            "anything else",
            "is there anything",
            "let me know if",
            "would you like me to",
            "feel free to ask",
        ],
    },
    PhraseGroup {
        weight: 0.55,
        reason: "tool action reported as done",
        phrases: &[
            "✅",
            "navigated to",
            "zoomed in",
            "zoomed out",
            "scrolled",
            "has been created",
            "has been exported",
            "has been loaded",
            "bookmark created",
            "now showing",
            "now displaying",
        ],
    },
];

const ANALYSIS_KEYWORDS: &[&str] = &["analy", "examine", "investigate", "evaluate"];

const RESULT_KEYWORDS: &[&str] = &[
    "result",
    "statistic",
    "finding",
    "found",
    "content is",
    "%",
    "count",
    "frequency",
    "total",
];

const SUMMARY_REQUEST_PHRASES: &[&str] = &[
    "please summarize",
    "please provide a summary",
    "can you summarize",
    "could you summarize",
    "provide a summary",
    "give me a summary",
    "summarize the results",
];

const DIRECT_ANSWER_PHRASES: &[&str] = &[
    "here is",
    "here are",
    "the answer is",
    "the result is",
    "the results are",
];

/// Outcome of evaluating one response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionVerdict {
    pub is_complete: bool,
    /// Final score in 0..=1
    pub confidence: f64,
    pub reason: String,
    /// The full response text when complete, empty otherwise
    pub summary_text: String,
}

/// Phrase-table completion detector
#[derive(Debug, Clone)]
pub struct CompletionHeuristic {
    threshold: f64,
}

impl Default for CompletionHeuristic {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl CompletionHeuristic {
    /// Create a heuristic with the given confidence threshold (clamped to 0..=1)
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Current threshold
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Strongest matched phrase group, before any adjustment
    pub fn base_score(&self, text: &str) -> Option<(f64, &'static str)> {
        let lower = text.to_lowercase();
        PHRASE_GROUPS
            .iter()
            .filter(|group| group.phrases.iter().any(|p| lower.contains(p)))
            .map(|group| (group.weight, group.reason))
            .max_by(|a, b| a.0.total_cmp(&b.0))
    }

    /// Score a response.
    ///
    /// `has_pending_invocations` must describe the current round; a pending
    /// tool call always outweighs completion phrasing.
    pub fn evaluate(&self, text: &str, has_pending_invocations: bool) -> CompletionVerdict {
        let Some((weight, reason)) = self.base_score(text) else {
            return CompletionVerdict {
                is_complete: false,
                confidence: 0.0,
                reason: "no completion phrasing".to_string(),
                summary_text: String::new(),
            };
        };

        let lower = text.to_lowercase();
        let mut score = weight;

        if has_pending_invocations {
            score *= PENDING_PENALTY;
        }
        if is_analysis_without_results(&lower) {
            score *= ANALYSIS_WITHOUT_RESULTS_PENALTY;
        }
        if SUMMARY_REQUEST_PHRASES.iter().any(|p| lower.contains(p)) {
            score *= SUMMARY_REQUEST_PENALTY;
        }

        if !has_pending_invocations && !lower.contains("\"tool_name\"") {
            score += NO_TOOL_CALL_BONUS;
        }
        if text.chars().count() > LENGTH_BONUS_MIN_CHARS {
            score += LENGTH_BONUS;
        }
        if is_direct_answer(text, &lower) {
            score += DIRECT_ANSWER_BONUS;
        }

        let confidence = score.clamp(0.0, 1.0);
        let is_complete = confidence >= self.threshold;

        tracing::debug!(
            "Completion heuristic: reason='{}', base={:.2}, confidence={:.2}, complete={}",
            reason,
            weight,
            confidence,
            is_complete
        );

        CompletionVerdict {
            is_complete,
            confidence,
            reason: reason.to_string(),
            summary_text: if is_complete {
                text.to_string()
            } else {
                String::new()
            },
        }
    }
}

fn is_analysis_without_results(lower: &str) -> bool {
    ANALYSIS_KEYWORDS.iter().any(|k| lower.contains(k))
        && !RESULT_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn is_direct_answer(text: &str, lower: &str) -> bool {
    text.trim_start().starts_with('✅') || DIRECT_ANSWER_PHRASES.iter().any(|p| lower.contains(p))
}
