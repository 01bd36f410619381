//! Extraction pipeline: turn fetched page content into a [`PartialSnowReport`].
//!
//! Parsers run in tiers. Specialized parsers for site templates the resort is
//! known to publish with go first, the generic pattern parser last. Each later
//! parser only fills fields the earlier ones left unknown.

pub mod cleaner;
pub mod generic;
pub mod registry;
pub mod specialized;

use crate::models::{PartialSnowReport, Resort, Tier};
use crate::utils::collapse_whitespace;
use scraper::{Html, Node, Selector};
use tracing::debug;

pub use self::generic::GenericParser;
pub use self::registry::ParserRegistry;
pub use self::specialized::{EpicParser, OnTheSnowParser};

// ── Document ──────────────────────────────────────────────────────────────────

/// Parsed page shared by every parser in one extraction.
pub struct Document {
    pub html: Html,
    /// Visible text, whitespace collapsed.
    text: String,
    /// `description` / `og:description` meta content.
    meta: Vec<String>,
    searchable: String,
}

impl Document {
    pub fn parse(content: &str) -> Self {
        let html = Html::parse_document(content);
        let text = visible_text(&html);
        let meta = meta_descriptions(&html);

        let mut searchable = text.clone();
        for m in &meta {
            searchable.push(' ');
            searchable.push_str(m);
        }

        Self {
            html,
            text,
            meta,
            searchable,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    #[cfg(test)]
    pub fn meta(&self) -> &[String] {
        &self.meta
    }

    /// Visible text followed by meta descriptions.
    pub fn searchable_text(&self) -> &str {
        &self.searchable
    }
}

fn visible_text(html: &Html) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in html.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element())
            .is_some_and(|el| matches!(el.name(), "script" | "style" | "noscript" | "template"));
        if !hidden {
            parts.push(text);
        }
    }
    collapse_whitespace(&parts.join(" "))
}

fn meta_descriptions(html: &Html) -> Vec<String> {
    let Ok(sel) = Selector::parse(r#"meta[name="description"], meta[property="og:description"]"#)
    else {
        return Vec::new();
    };
    html.select(&sel)
        .filter_map(|m| m.value().attr("content"))
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
        .collect()
}

// ── Parser trait ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Specialized,
    Generic,
}

/// One extraction strategy. Implementations never fail: a field they cannot
/// find is left unknown.
pub trait SnowParser: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> ParserKind;

    /// Whether this parser should run for `resort`.
    fn applies_to(&self, _resort: &Resort) -> bool {
        true
    }

    fn extract(&self, doc: &Document) -> PartialSnowReport;
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub report: PartialSnowReport,
    pub tier: Tier,
}

pub struct ExtractionPipeline {
    parsers: ParserRegistry,
}

impl Default for ExtractionPipeline {
    fn default() -> Self {
        Self::new(ParserRegistry::with_defaults())
    }
}

impl ExtractionPipeline {
    pub fn new(parsers: ParserRegistry) -> Self {
        Self { parsers }
    }

    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    /// Run every applicable parser over `content`. The tier records which
    /// kinds of parser contributed at least one field.
    pub fn extract(&self, resort: &Resort, content: &str) -> Extraction {
        let doc = Document::parse(content);
        let mut report = PartialSnowReport::default();
        let mut specialized_hit = false;
        let mut generic_hit = false;

        for parser in self.parsers.resolve(resort) {
            if report.is_complete() {
                break;
            }
            let found = parser.extract(&doc);
            let added = report.merge_missing(&found);
            debug!(
                resort = %resort.name,
                parser = parser.name(),
                found = found.field_count(),
                added,
                "Parser pass"
            );
            if added > 0 {
                match parser.kind() {
                    ParserKind::Specialized => specialized_hit = true,
                    ParserKind::Generic => generic_hit = true,
                }
            }
        }

        Extraction {
            tier: Tier::from_hits(specialized_hit, generic_hit),
            report,
        }
    }
}
