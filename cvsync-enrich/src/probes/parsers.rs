//! HTML extraction
//!
//! Each parser pulls one kind of value out of a fetched page. Parsers are
//! regex-based and tolerant: `None` means "nothing usable on this page", never
//! a parse failure.

use once_cell::sync::Lazy;
use regex::Regex;

/// Extracts a value from a response body
pub trait PageParser {
    type Output;

    fn parse(&self, body: &str) -> Option<Self::Output>;
}

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid regex"));

/// Decode the HTML entities that occur in the source pages
pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match entity {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    _ => None,
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Entities decoded, tags replaced by spaces, whitespace collapsed
pub fn normalize_text(html: &str) -> String {
    let decoded = decode_entities(html);
    let untagged = TAG.replace_all(&decoded, " ");
    WHITESPACE.replace_all(&untagged, " ").trim().to_string()
}

// ============================================================================
// Search result thumbnails
// ============================================================================

static ALT_TEXT_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<img[^>]*src="(images/[^"]+\.jpg)"[^>]*alt="([^"]*)""#).expect("valid regex")
});

/// Image on a search results page, with its alt text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltTextImage {
    /// Relative `images/...jpg` path as it appears in the page
    pub src: String,
    pub alt: String,
}

/// `<img src="images/….jpg" alt="…">` pairs, in page order
pub struct AltTextImageParser;

impl PageParser for AltTextImageParser {
    type Output = Vec<AltTextImage>;

    fn parse(&self, body: &str) -> Option<Self::Output> {
        let images: Vec<AltTextImage> = ALT_TEXT_IMAGE
            .captures_iter(body)
            .map(|caps| AltTextImage {
                src: caps[1].to_string(),
                alt: decode_entities(&caps[2]),
            })
            .collect();
        (!images.is_empty()).then_some(images)
    }
}

// ============================================================================
// Content images
// ============================================================================

static CONTENT_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img[^>]*src="([^"]+\.(?:jpg|jpeg|png))""#).expect("valid regex")
});

/// Path fragments of site chrome images
const NON_CONTENT_MARKERS: &[&str] = &[
    "logo",
    "icon",
    "social",
    "facebook",
    "twitter",
    "button",
    "banner",
    "header",
    "footer",
    "sprite",
    "gravatar",
    "sites/default/files/styles",
];

/// First content image of a page, as an absolute URL
pub struct ContentImageParser {
    page_url: String,
}

impl ContentImageParser {
    pub fn for_page(page_url: impl Into<String>) -> Self {
        Self {
            page_url: page_url.into(),
        }
    }

    fn resolve(&self, src: &str) -> String {
        if src.starts_with("http://") || src.starts_with("https://") {
            return src.to_string();
        }
        if let Some(rest) = src.strip_prefix("//") {
            return format!("https://{}", rest);
        }
        if src.starts_with('/') {
            return format!("{}{}", origin(&self.page_url), src);
        }
        let dir = self
            .page_url
            .rsplit_once('/')
            .map_or(self.page_url.as_str(), |(dir, _)| dir);
        format!("{}/{}", dir, src)
    }
}

impl PageParser for ContentImageParser {
    type Output = String;

    fn parse(&self, body: &str) -> Option<Self::Output> {
        CONTENT_IMAGE
            .captures_iter(body)
            .map(|caps| caps[1].to_string())
            .find(|src| {
                let lower = src.to_lowercase();
                !NON_CONTENT_MARKERS.iter().any(|m| lower.contains(m))
            })
            .map(|src| self.resolve(&src))
    }
}

/// `scheme://host` of a URL (the URL itself if it has no path)
fn origin(url: &str) -> &str {
    let after_scheme = url.find("://").map_or(0, |i| i + 3);
    match url[after_scheme..].find('/') {
        Some(i) => &url[..after_scheme + i],
        None => url,
    }
}

// ============================================================================
// Chinese names
// ============================================================================

static CJK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{3400}-\u{4dbf}\u{4e00}-\u{9fff}]").expect("valid regex"));

static NAME_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[、，,；;|/]+").expect("valid regex"));

static PARAGRAPH_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<p[^>]*>\s*(?:<[^>]+>\s*)*Chinese\s*Name\s*(?:</[^>]+>\s*)*[：:]\s*(.*?)</p>")
        .expect("valid regex")
});

static TABLE_ROW_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<td[^>]*>\s*(?:<[^>]+>\s*)*Chinese\s*Name\s*(?:</[^>]+>\s*)*</td>\s*<td[^>]*>(.*?)</td>",
    )
    .expect("valid regex")
});

static TEXT_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Chinese\s*Name\s*[：:]\s*").expect("valid regex"));

static NEXT_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:Japanese\s*Name|Meaning|Synonym|Scientific\s*Name|Species/Combination|Id)\b")
        .expect("valid regex")
});

/// Labels that leak into the name field on some pages
const FOREIGN_LABELS: &[&str] = &["Japanese Name", "Meaning", "Synonym"];

const NAME_TRIM: &[char] = &[
    ' ', '\t', '\r', '\n', ':', '：', '(', ')', '[', ']', '{', '}',
];

/// Split a "Chinese Name" field into individual CJK names
pub fn split_candidate_names(value: &str) -> Vec<String> {
    let value = normalize_text(value);
    let mut names = Vec::new();
    for part in NAME_SEPARATORS.split(&value) {
        let name = part.trim_matches(NAME_TRIM);
        if name.is_empty()
            || FOREIGN_LABELS.iter().any(|label| name.contains(label))
            || !CJK.is_match(name)
        {
            continue;
        }
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Names listed under the "Chinese Name" label of a detail page
///
/// Tries a `<p>` label, then a table row, then a plain-text scan bounded by
/// the next known label. Results of all three are merged in that order.
pub struct ChineseNameParser;

impl PageParser for ChineseNameParser {
    type Output = Vec<String>;

    fn parse(&self, body: &str) -> Option<Self::Output> {
        let mut names: Vec<String> = Vec::new();
        let mut push_all = |found: Vec<String>| {
            for name in found {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        };

        for caps in PARAGRAPH_LABEL.captures_iter(body) {
            push_all(split_candidate_names(&caps[1]));
        }
        for caps in TABLE_ROW_LABEL.captures_iter(body) {
            push_all(split_candidate_names(&caps[1]));
        }

        let text = normalize_text(body);
        for label in TEXT_LABEL.find_iter(&text) {
            let rest = &text[label.end()..];
            let field = NEXT_LABEL.find(rest).map_or(rest, |next| &rest[..next.start()]);
            push_all(split_candidate_names(field));
        }

        (!names.is_empty()).then_some(names)
    }
}
