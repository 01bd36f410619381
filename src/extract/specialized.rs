//! Parsers for site templates shared by several resorts.

use super::cleaner::{first_number, to_cm, UnitSystem};
use super::registry::ChainMatcher;
use super::{Document, ParserKind, SnowParser};
use crate::models::{Field, FieldValue, PartialSnowReport, Resort};
use regex::Regex;
use scraper::{ElementRef, Selector};
use std::sync::LazyLock;
use tracing::trace;

/// Map a stat label ("Base Depth", "24 Hr Snowfall", "Lifts Open") to the
/// field it reports. Depth labels are checked before new-snow windows so
/// "Summit 7-day" style labels never land in a window.
pub fn classify_stat_label(label: &str) -> Option<Field> {
    let l = label.to_lowercase();
    let has = |needle: &str| l.contains(needle);

    if has("lift") || has("chair") || has("gondola") {
        Some(Field::Lifts)
    } else if has("trail") || has("run") || has("piste") || has("slope") {
        Some(Field::Runs)
    } else if has("season") || has("year to date") {
        Some(Field::SeasonTotal)
    } else if has("base") || has("lower") {
        Some(Field::BaseDepth)
    } else if has("summit") || has("top") || has("upper") {
        Some(Field::SummitDepth)
    } else if has("24") || has("overnight") {
        Some(Field::NewSnow24h)
    } else if has("48") {
        Some(Field::NewSnow48h)
    } else if has("7") || has("week") {
        Some(Field::NewSnow7d)
    } else {
        None
    }
}

fn depth_bound(field: Field) -> i32 {
    match field {
        Field::BaseDepth | Field::SummitDepth => 1000,
        Field::SeasonTotal => 3000,
        _ => 300,
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    crate::utils::collapse_whitespace(&el.text().collect::<String>())
}

/// Length in a stat value such as `18"`, `45 cm`, `12 in`.
fn stat_length(value: &str, default: UnitSystem) -> Option<(f64, Option<String>)> {
    static LENGTH: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)(\d+(?:\.\d+)?)\s*(cm\b|in\b|inch(?:es)?\b|"|”|″)?"#).unwrap()
    });
    let caps = LENGTH.captures(value)?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_string())
        .or_else(|| (default == UnitSystem::Imperial).then(|| "in".to_string()));
    Some((number, unit))
}

fn stat_ratio(value: &str) -> Option<FieldValue> {
    static RATIO: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\d+)\s*(?:/|of)\s*(\d+)").unwrap());
    let caps = RATIO.captures(value)?;
    let open: i32 = caps[1].parse().ok()?;
    let total: i32 = caps[2].parse().ok()?;
    (open <= total && total > 0 && total <= 500).then_some(FieldValue::Ratio { open, total })
}

// ── Vail Resorts / Epic ───────────────────────────────────────────────────────

const VAIL_MEMBERS: &[&str] = &[
    "Vail",
    "Breckenridge",
    "Keystone",
    "Park City",
    "Heavenly",
    "Stowe",
    "Killington",
];

/// The Vail Resorts mountain-report template. Depth elements are tagged with
/// `data-snow-depth` or a `*snow-depth*` / `*depth-value*` class, values are
/// in inches unless marked cm, and the enclosing block's label says whether
/// a depth is base or summit.
pub struct EpicParser {
    matcher: ChainMatcher,
}

impl Default for EpicParser {
    fn default() -> Self {
        Self {
            matcher: ChainMatcher {
                chain: "vail-resorts",
                members: VAIL_MEMBERS,
                hosts: &["epicpass.com", "snow.com"],
            },
        }
    }
}

impl EpicParser {
    /// Base or summit, from the element's own text or its nearest labelled ancestor.
    fn depth_position(el: ElementRef<'_>) -> Option<Field> {
        let own = element_text(el).to_lowercase();
        let mut contexts = vec![own];
        contexts.extend(
            el.ancestors()
                .take(3)
                .filter_map(ElementRef::wrap)
                .map(|a| element_text(a).to_lowercase()),
        );

        contexts.iter().find_map(|ctx| {
            if ctx.contains("base") || ctx.contains("lower") {
                Some(Field::BaseDepth)
            } else if ctx.contains("summit") || ctx.contains("top") || ctx.contains("upper") {
                Some(Field::SummitDepth)
            } else {
                None
            }
        })
    }
}

impl SnowParser for EpicParser {
    fn name(&self) -> &'static str {
        "epic"
    }

    fn kind(&self) -> ParserKind {
        ParserKind::Specialized
    }

    fn applies_to(&self, resort: &Resort) -> bool {
        self.matcher.matches(resort)
    }

    fn extract(&self, doc: &Document) -> PartialSnowReport {
        let mut report = PartialSnowReport::default();
        let Ok(sel) =
            Selector::parse(r#"[data-snow-depth], [class*="snow-depth"], [class*="depth-value"]"#)
        else {
            return report;
        };

        for el in doc.html.select(&sel) {
            let text = element_text(el);
            let raw = el
                .value()
                .attr("data-snow-depth")
                .and_then(first_number)
                .or_else(|| first_number(&text));
            let Some(value) = raw else { continue };
            let Some(field) = Self::depth_position(el) else {
                continue;
            };

            let unit = if text.to_lowercase().contains("cm") { "cm" } else { "in" };
            let cm = to_cm(value, Some(unit), UnitSystem::Imperial);
            if (0..=depth_bound(field)).contains(&cm) {
                trace!("epic {:?} = {} cm from {:?}", field, cm, text);
                report.fill(field, FieldValue::Centimetres(cm));
            }
        }

        report
    }
}

// ── OnTheSnow ─────────────────────────────────────────────────────────────────

/// The OnTheSnow ski-report template: `snow-report__stat` label/value blocks
/// for depths and new snow, `terrain-stats__stat` blocks for lift and run ratios.
pub struct OnTheSnowParser {
    matcher: ChainMatcher,
}

impl Default for OnTheSnowParser {
    fn default() -> Self {
        Self {
            matcher: ChainMatcher {
                chain: "onthesnow",
                members: &[],
                hosts: &["onthesnow.com", "onthesnow.co.uk", "onthesnow.ca"],
            },
        }
    }
}

impl OnTheSnowParser {
    fn stat_blocks(
        doc: &Document,
        block: &str,
        label: &str,
        value: &str,
    ) -> Vec<(String, String)> {
        let (Ok(block_sel), Ok(label_sel), Ok(value_sel)) = (
            Selector::parse(block),
            Selector::parse(label),
            Selector::parse(value),
        ) else {
            return Vec::new();
        };

        doc.html
            .select(&block_sel)
            .filter_map(|b| {
                let label = b.select(&label_sel).next().map(element_text)?;
                let value = b.select(&value_sel).next().map(element_text)?;
                Some((label, value))
            })
            .collect()
    }
}

impl SnowParser for OnTheSnowParser {
    fn name(&self) -> &'static str {
        "onthesnow"
    }

    fn kind(&self) -> ParserKind {
        ParserKind::Specialized
    }

    fn applies_to(&self, resort: &Resort) -> bool {
        self.matcher.matches(resort)
    }

    fn extract(&self, doc: &Document) -> PartialSnowReport {
        let mut report = PartialSnowReport::default();

        let snow = Self::stat_blocks(
            doc,
            ".snow-report__stat",
            ".snow-report__stat-label",
            ".snow-report__stat-value",
        );
        for (label, value) in snow {
            let Some(field) = classify_stat_label(&label) else {
                continue;
            };
            if matches!(field, Field::Lifts | Field::Runs) {
                continue;
            }
            // US-hosted template: unmarked values are inches.
            let Some((number, unit)) = stat_length(&value, UnitSystem::Imperial) else {
                continue;
            };
            let cm = to_cm(number, unit.as_deref(), UnitSystem::Imperial);
            if (0..=depth_bound(field)).contains(&cm) {
                report.fill(field, FieldValue::Centimetres(cm));
            }
        }

        let terrain = Self::stat_blocks(
            doc,
            ".terrain-stats__stat",
            ".terrain-stats__label",
            ".terrain-stats__value",
        );
        for (label, value) in terrain {
            let field = match classify_stat_label(&label) {
                Some(f @ (Field::Lifts | Field::Runs)) => f,
                _ => continue,
            };
            if let Some(ratio) = stat_ratio(&value) {
                report.fill(field, ratio);
            }
        }

        report
    }
}
