//! Number, unit and date normalisation shared by every parser.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

/// Unit system a page reports in when a number carries no unit of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitSystem {
    Metric,
    Imperial,
}

impl UnitSystem {
    /// Imperial when inch mentions outnumber centimetre mentions.
    pub fn detect(text: &str) -> Self {
        static INCHES: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"(?i)\d\s*(?:in\b|inch(?:es)?\b|"|”|″)"#).unwrap()
        });
        static CENTIMETRES: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(?i)\d\s*(?:cm\b|centimet(?:er|re)s?\b)").unwrap());

        let inches = INCHES.find_iter(text).count();
        let cm = CENTIMETRES.find_iter(text).count();
        if inches > cm {
            UnitSystem::Imperial
        } else {
            UnitSystem::Metric
        }
    }
}

// ── Numbers ───────────────────────────────────────────────────────────────────

/// Parse a number, tolerating thousands separators and a leading sign.
/// "1,234" → 1234.0 | "-3.5" → -3.5 | "N/A" → None
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" || s == "-" || s == "—" {
        return None;
    }
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse().ok()
}

/// First number appearing anywhere in `s`.
pub fn first_number(s: &str) -> Option<f64> {
    static NUM: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"-?\d{1,3}(?:,\d{3})+(?:\.\d+)?|-?\d+(?:\.\d+)?").unwrap());
    NUM.find(s).and_then(|m| parse_number(m.as_str()))
}

pub fn is_inch_unit(unit: &str) -> bool {
    let u = unit.trim().to_lowercase();
    u.starts_with("in") || u == "\"" || u == "”" || u == "″"
}

/// Convert a length to whole centimetres. An explicit unit wins; otherwise
/// the page's unit system decides. Inch conversions truncate, so 18" is 45 cm.
pub fn to_cm(value: f64, unit: Option<&str>, default: UnitSystem) -> i32 {
    let imperial = match unit {
        Some(u) if !u.trim().is_empty() => is_inch_unit(u),
        _ => default == UnitSystem::Imperial,
    };
    if imperial {
        (value * 2.54 + 1e-9).trunc() as i32
    } else {
        value.round() as i32
    }
}

pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    ((f - 32.0) * 5.0 / 9.0 * 10.0).round() / 10.0
}

/// Convert a temperature to °C. An explicit `F`/`C` wins; otherwise the
/// page's unit system decides.
pub fn to_celsius(value: f64, unit: Option<&str>, default: UnitSystem) -> f64 {
    let fahrenheit = match unit.map(|u| u.trim().to_lowercase()) {
        Some(u) if u.ends_with('f') => true,
        Some(u) if u.ends_with('c') => false,
        _ => default == UnitSystem::Imperial,
    };
    if fahrenheit {
        fahrenheit_to_celsius(value)
    } else {
        value
    }
}

// ── Dates ─────────────────────────────────────────────────────────────────────

/// Parse dates in the shapes snow reports use: ISO, "Jan 5, 2025",
/// "January 5 2025", "5 Jan 2025", "01/05/2025" (US first, then EU).
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim().trim_end_matches(['.', ',']);
    let s = s.replace('.', "");

    const FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%b %d, %Y",
        "%B %d, %Y",
        "%b %d %Y",
        "%B %d %Y",
        "%d %b %Y",
        "%d %B %Y",
        "%m/%d/%Y",
        "%d/%m/%Y",
    ];

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&s, fmt).ok())
}

// ── Text ──────────────────────────────────────────────────────────────────────

/// Lower-case, trim and collapse whitespace in a free-text status value.
pub fn normalise_status(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
