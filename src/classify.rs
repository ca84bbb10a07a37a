//! Answered-vs-fallback heuristic for chat analytics.
//!
//! Any pricing or availability term marks the answer as answered outright.
//! Otherwise phrases are scored: "not found" +2, "go elsewhere" +1, "in this
//! document" +1, apology-plus-negation regex +1. A score of 2 or more is a
//! fallback. The phrase tables and the threshold feed logged analytics, so
//! they must stay exactly as they are.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::format::compile_regex;
use crate::models::AnswerStatus;

const NOT_FOUND_SIGNALS: &[&str] = &[
    "tidak menemukan informasi",
    "tidak menemukan info",
    "saya tidak menemukan",
    "tidak ada informasi",
    "tidak ada info",
    "tidak tersedia",
    "belum tersedia",
    "saya tidak memiliki informasi",
    "saya tidak punya informasi",
    "saya tidak memiliki data",
    "saya tidak punya data",
    "saya tidak dapat menemukan",
    "saya tidak bisa menemukan",
    "maaf, saya tidak",
    "maaf saya tidak",
];

const REDIRECT_SIGNALS: &[&str] = &[
    "silakan kunjungi",
    "silahkan kunjungi",
    "website resmi",
    "hubungi kontak",
    "kontak yang tersedia",
    "untuk informasi lebih lanjut",
];

const DOC_SIGNALS: &[&str] = &["dalam dokumen ini", "di dokumen ini", "pada dokumen ini"];

const ANSWER_SIGNALS: &[&str] = &[
    "harga",
    "rp",
    "kapasitas",
    "include",
    "exclude",
    "paket",
    "sewa",
    "tersedia",
    "fasilitas",
];

static APOLOGY_NEGATION: Lazy<Regex> =
    Lazy::new(|| compile_regex(r"maaf[, ]+.*tidak.*(informasi|data)"));

const FALLBACK_THRESHOLD: u32 = 2;

/// Classify the raw model answer.
pub fn classify(answer: &str) -> AnswerStatus {
    let a = answer.trim().to_lowercase();
    if a.is_empty() {
        return AnswerStatus::Fallback;
    }

    if contains_any(&a, ANSWER_SIGNALS) {
        return AnswerStatus::Answered;
    }

    if fallback_score(&a) >= FALLBACK_THRESHOLD {
        AnswerStatus::Fallback
    } else {
        AnswerStatus::Answered
    }
}

fn fallback_score(a: &str) -> u32 {
    let mut score = 0;
    if contains_any(a, NOT_FOUND_SIGNALS) {
        score += 2;
    }
    if contains_any(a, REDIRECT_SIGNALS) {
        score += 1;
    }
    if contains_any(a, DOC_SIGNALS) {
        score += 1;
    }
    if APOLOGY_NEGATION.is_match(a) {
        score += 1;
    }
    score
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
