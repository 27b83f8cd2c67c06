//! Name normalization
//!
//! Two strengths, never interchangeable:
//! - [`strict_key`]: cache and index lookups. Stable; keeps punctuation and
//!   diacritics so distinct names stay distinct.
//! - [`loose_key`]: fuzzy scoring only. Lossy; folds width, strips diacritics
//!   and removes separators.
//!
//! Plus query-variant and slug helpers used by the strategies.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Characters removed by [`loose_key`] (after NFKC folding)
const LOOSE_SEPARATORS: &[char] = &[
    '-', '_', '.', '/', '(', ')', '·', '—', '–', '（', '）', '／', '・',
];

static TITLE_CASE_ARTIFACT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'([A-Z])\b").expect("valid regex"));

static DASH_OR_SLASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[-/]\s*").expect("valid regex"));

static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\(.*?\)\s*").expect("valid regex"));

static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Exact-lookup key: NFC, trimmed, lowercased, whitespace runs collapsed.
pub fn strict_key(name: &str) -> String {
    let composed: String = name.nfc().collect();
    composed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Fuzzy-comparison key: width-folded, diacritics stripped, lowercased,
/// separators and whitespace removed.
pub fn loose_key(name: &str) -> String {
    let folded: String = name.nfkc().collect();
    folded
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| !c.is_whitespace() && !LOOSE_SEPARATORS.contains(c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Fix OCR title-casing artifacts: `Aaron'S Ruby` becomes `Aaron's Ruby`.
pub fn fix_title_case_artifacts(name: &str) -> String {
    TITLE_CASE_ARTIFACT
        .replace_all(name, |caps: &regex::Captures<'_>| {
            format!("'{}", caps[1].to_lowercase())
        })
        .into_owned()
}

/// Remove hyphens/slashes together with the whitespace around them.
pub fn strip_separators(name: &str) -> String {
    DASH_OR_SLASH.replace_all(name, "").trim().to_string()
}

/// Spelling variants for exact-name sources: artifact-fixed form first, then
/// the name as given.
pub fn spelling_variants(name: &str) -> Vec<String> {
    let name = name.trim();
    dedupe(vec![fix_title_case_artifacts(name), name.to_string()])
}

/// Variants for search-style sources, in the order they should be tried:
/// as given, separators stripped, each side of ` - `, each part of ` / `,
/// spaces removed.
pub fn search_variants(name: &str) -> Vec<String> {
    let name = name.trim();
    let mut variants = vec![name.to_string(), strip_separators(name)];

    if name.contains(" - ") {
        let parts: Vec<&str> = name.split(" - ").collect();
        if let Some(last) = parts.last() {
            variants.push(last.trim().to_string());
        }
        if let Some(first) = parts.first() {
            variants.push(first.trim().to_string());
        }
    }

    if name.contains(" / ") {
        variants.extend(name.split(" / ").map(|p| p.trim().to_string()));
    }

    variants.push(name.replace(' ', ""));
    dedupe(variants)
}

/// URL slug: lowercase, apostrophes dropped, non-alphanumeric runs to `-`.
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase().replace(['\'', '’'], "");
    NON_SLUG
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// Diacritics removed, everything else kept (`Rosé` → `Rose`)
pub fn fold_diacritics(name: &str) -> String {
    name.nfd().filter(|c| !is_combining_mark(*c)).nfc().collect()
}

/// Name with parenthetical suffixes removed (`Alba (Variegated)` → `Alba`)
pub fn without_parenthetical(name: &str) -> String {
    PARENTHETICAL.replace_all(name, " ").trim().to_string()
}

fn dedupe(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        if !v.is_empty() && !out.contains(&v) {
            out.push(v);
        }
    }
    out
}
