//! Markdown governance document → [`AgentRule`]s
//!
//! Every heading starts a section and every non-empty section becomes one
//! rule, in document order. Text before the first heading becomes an
//! "Introduction" rule. Headings inside fenced code blocks are ignored.
//!
//! # Severity
//!
//! [`infer_severity`] reads the heading and body, lowercased:
//!
//! 1. An explicit tag wins: `severity: high` or `[high]` (any of the five
//!    level names).
//! 2. Otherwise [`SEVERITY_MARKERS`] is checked from the critical tier down
//!    and the first tier with a substring hit is used.
//! 3. Otherwise the rule is `medium`.
//!
//! # Keywords
//!
//! Keywords are what the detector matches against session text:
//!
//! - inline code spans (`` `git push --force` ``), kept whole
//! - words of three or more letters from bullet items, minus [`STOP_WORDS`]
//!
//! A section with neither contributes words from its heading instead.
//! Keywords are lowercased and deduplicated, first occurrence first.

use crate::types::{AgentRule, Severity};
use std::collections::HashSet;

/// Marker phrases per severity tier, highest tier first.
pub const SEVERITY_MARKERS: &[(Severity, &[&str])] = &[
    (
        Severity::Critical,
        &["critical", "forbidden", "under no circumstances"],
    ),
    (
        Severity::High,
        &["must not", "never", "do not", "don't", "prohibited"],
    ),
    (
        Severity::Medium,
        &["avoid", "should not", "warn", "caution"],
    ),
    (Severity::Low, &["prefer", "consider", "recommend"]),
    (
        Severity::Info,
        &["fyi", "informational", "for reference"],
    ),
];

/// Words too common to identify a rule violation.
pub const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "are", "not", "you", "your", "use", "all", "any",
    "can", "from", "into", "only", "when", "then", "than", "but", "was", "were", "has", "have",
    "had", "its", "our", "out", "over", "via", "per", "each", "more", "most", "must", "should",
    "never", "always", "don", "does", "did", "will", "would", "could", "may", "might", "also",
    "such", "them", "they", "their", "there", "here", "what", "which", "who", "how", "why",
    "instead", "before", "after", "etc", "avoid", "prefer", "make", "sure", "way", "using",
    "these", "those", "other", "being", "been", "just", "like", "don't",
];

const INTRODUCTION: &str = "Introduction";

struct Section {
    heading: String,
    level: u8,
    lines: Vec<String>,
}

/// Parse a governance document into rules.
///
/// `source` is recorded on every rule, usually the document's path.
pub fn parse_agent_rules(markdown: &str, source: Option<&str>) -> Vec<AgentRule> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current: Option<Section> = None;
    let mut in_fence = false;

    for line in markdown.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
        } else if !in_fence {
            if let Some((level, heading)) = parse_heading(line) {
                sections.extend(current.take());
                current = Some(Section {
                    heading,
                    level,
                    lines: Vec::new(),
                });
                continue;
            }
        }
        current
            .get_or_insert_with(|| Section {
                heading: INTRODUCTION.to_string(),
                level: 1,
                lines: Vec::new(),
            })
            .lines
            .push(line.to_string());
    }
    sections.extend(current);

    let mut slugs = SlugAllocator::default();
    sections
        .into_iter()
        .filter_map(|section| {
            let body = section.lines.join("\n").trim().to_string();
            let summary = derive_summary(&section.lines);
            if body.is_empty() && summary.is_empty() {
                return None;
            }
            let bullets = derive_bullets(&section.lines);
            let severity = infer_severity(&section.heading, &body);
            let keywords = derive_keywords(&section.heading, &bullets, &body);
            Some(AgentRule {
                id: slugs.allocate(&section.heading),
                heading: section.heading,
                level: section.level,
                summary,
                body,
                bullets,
                severity,
                keywords,
                source: source.map(String::from),
            })
        })
        .collect()
}

/// `#`-style heading: `(level, title)`.
fn parse_heading(line: &str) -> Option<(u8, String)> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        return None;
    }
    Some((hashes as u8, title.to_string()))
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Bullet or ordered-list item text without its marker.
fn bullet_text(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let marked = |rest: &str| rest.is_empty() || rest.starts_with([' ', '\t']);
    if let Some(rest) = trimmed.strip_prefix(['-', '*', '+']) {
        return marked(rest).then(|| rest.trim());
    }
    let digits = trimmed.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 {
        if let Some(rest) = trimmed[digits..].strip_prefix(['.', ')']) {
            return marked(rest).then(|| rest.trim());
        }
    }
    None
}

fn derive_bullets(lines: &[String]) -> Vec<String> {
    let mut in_fence = false;
    let mut bullets = Vec::new();
    for line in lines {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(text) = bullet_text(line) {
            if !text.is_empty() {
                bullets.push(text.to_string());
            }
        }
    }
    bullets
}

/// First plain-prose line of a section.
fn derive_summary(lines: &[String]) -> String {
    let mut in_fence = false;
    for line in lines {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        let trimmed = line.trim();
        if in_fence || trimmed.is_empty() || bullet_text(trimmed).is_some() {
            continue;
        }
        return trimmed.to_string();
    }
    String::new()
}

/// Map a section's text onto a severity. See the module docs for the order.
pub fn infer_severity(heading: &str, body: &str) -> Severity {
    let text = format!("{}\n{}", heading, body).to_lowercase();

    if let Some(explicit) = explicit_severity(&text) {
        return explicit;
    }

    SEVERITY_MARKERS
        .iter()
        .find(|(_, markers)| markers.iter().any(|marker| text.contains(marker)))
        .map(|(severity, _)| *severity)
        .unwrap_or(Severity::Medium)
}

fn explicit_severity(text: &str) -> Option<Severity> {
    Severity::ALL.into_iter().rev().find(|severity| {
        let name = severity.as_str();
        text.contains(&format!("[{}]", name))
            || text.contains(&format!("severity: {}", name))
            || text.contains(&format!("severity:{}", name))
    })
}

fn derive_keywords(heading: &str, bullets: &[String], body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for span in code_spans(body) {
        push_keyword(&mut seen, &mut keywords, span);
    }
    for bullet in bullets {
        for word in words(bullet) {
            push_keyword(&mut seen, &mut keywords, word);
        }
    }
    if keywords.is_empty() {
        for word in words(heading) {
            push_keyword(&mut seen, &mut keywords, word);
        }
    }
    keywords
}

fn push_keyword(seen: &mut HashSet<String>, keywords: &mut Vec<String>, keyword: String) {
    if seen.insert(keyword.clone()) {
        keywords.push(keyword);
    }
}

/// Lowercased inline code spans outside fenced blocks.
fn code_spans(body: &str) -> Vec<String> {
    let mut in_fence = false;
    let mut spans = Vec::new();
    for line in body.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let mut parts = line.split('`');
        parts.next();
        while let (Some(inside), Some(_)) = (parts.next(), parts.next()) {
            let span = inside.trim().to_lowercase();
            if span.len() > 1 {
                spans.push(span);
            }
        }
    }
    spans
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| token.len() > 2)
        .map(str::to_ascii_lowercase)
        .filter(|token| !STOP_WORDS.contains(&token.as_str()))
}

/// Heading slugs, suffixed `-2`, `-3`, ... on collision.
#[derive(Debug, Default)]
pub struct SlugAllocator {
    taken: HashSet<String>,
}

impl SlugAllocator {
    pub fn allocate(&mut self, title: &str) -> String {
        unique_id(&slugify(title), &mut self.taken)
    }
}

/// `base`, or the first free `base-N` (N from 2), marked as taken.
pub(crate) fn unique_id(base: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(base.to_string()) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Lowercase, non-alphanumeric runs become `-`, empty becomes `section`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug.to_string()
    }
}
