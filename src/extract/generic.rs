//! Generic pattern tier.
//!
//! Each field is recovered by its own [`PatternRule`]: an ordered list of
//! regexes plus the shape of the value they capture. Rules never look at each
//! other's results, so a regression in one pattern only loses that one field.
//! Within a rule the first pattern with an in-bounds match wins.

use super::cleaner::{first_number, normalise_status, parse_date, to_celsius, to_cm, UnitSystem};
use super::{Document, ParserKind, SnowParser};
use crate::models::{Field, FieldValue, PartialSnowReport};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::{debug, trace};

/// Length unit suffix: cm, inches, or an inch mark.
const UNIT: &str = r#"(cm\b|centimet(?:er|re)s?\b|in\b|inch(?:es)?\b|"|”|″)"#;
/// Optional label separator.
const SEP: &str = r"\s*[:\-–]?\s*";
/// Separator ahead of a signed value; a dash here would eat the sign.
const TSEP: &str = r"\s*:?\s*";
const NUM: &str = r"(\d+(?:\.\d+)?)";
const SIGNED: &str = r"(-?\d+(?:\.\d+)?)";

/// What a rule's capture groups hold and how they are checked.
#[derive(Debug, Clone, Copy)]
pub enum Shape {
    /// group 1 number, group 2 optional length unit; accepted when within `0..=max_cm`.
    Length { max_cm: i32 },
    /// group 1 open, group 2 total; accepted when open <= total <= 500.
    Ratio,
    /// group 1 signed number, group 2 optional `C`/`F`; accepted within -60..=50 °C.
    Temperature,
    /// group 1 free text, normalised.
    Status,
    /// group 1 a date string.
    Date,
}

#[derive(Debug)]
pub struct PatternRule {
    pub field: Field,
    shape: Shape,
    patterns: Vec<Regex>,
    /// Matches whose preceding text ends with this are skipped.
    unless_after: Option<Regex>,
}

impl PatternRule {
    fn new(field: Field, shape: Shape, patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Regex::new(&format!("(?i){p}")) {
                Ok(re) => Some(re),
                Err(e) => {
                    debug!("Dropping bad pattern for {:?}: {}", field, e);
                    None
                }
            })
            .collect();
        Self {
            field,
            shape,
            patterns,
            unless_after: None,
        }
    }

    fn unless_after(mut self, pattern: &str) -> Self {
        match Regex::new(&format!("(?i)(?:{pattern})$")) {
            Ok(re) => self.unless_after = Some(re),
            Err(e) => debug!("Dropping bad guard for {:?}: {}", self.field, e),
        }
        self
    }

    fn guarded(&self, text: &str, start: usize) -> bool {
        self.unless_after
            .as_ref()
            .is_some_and(|re| re.is_match(&text[..start]))
    }

    /// Run the rule against page text.
    pub fn apply(&self, text: &str, units: UnitSystem) -> Option<FieldValue> {
        for re in &self.patterns {
            for caps in re.captures_iter(text) {
                let start = caps.get(0).map_or(0, |m| m.start());
                if self.guarded(text, start) {
                    continue;
                }
                if let Some(value) = self.interpret(&caps, units) {
                    trace!("{:?} matched {:?} via /{}/", self.field, &caps[0], re.as_str());
                    return Some(value);
                }
            }
        }
        None
    }

    fn interpret(&self, caps: &Captures<'_>, units: UnitSystem) -> Option<FieldValue> {
        let group = |i: usize| caps.get(i).map(|m| m.as_str());

        match self.shape {
            Shape::Length { max_cm } => {
                let value = first_number(group(1)?)?;
                let cm = to_cm(value, group(2), units);
                (0..=max_cm).contains(&cm).then_some(FieldValue::Centimetres(cm))
            }
            Shape::Ratio => {
                let open = group(1)?.parse::<i32>().ok()?;
                let total = group(2)?.parse::<i32>().ok()?;
                (open <= total && total > 0 && total <= 500)
                    .then_some(FieldValue::Ratio { open, total })
            }
            Shape::Temperature => {
                let value: f64 = group(1)?.parse().ok()?;
                let c = to_celsius(value, group(2), units);
                (-60.0..=50.0).contains(&c).then_some(FieldValue::Celsius(c))
            }
            Shape::Status => {
                let text = normalise_status(group(1)?);
                (!text.is_empty()).then_some(FieldValue::Text(text))
            }
            Shape::Date => parse_date(group(1)?).map(FieldValue::Date),
        }
    }
}

fn depth_rule(field: Field, labels: &str, max_cm: i32) -> PatternRule {
    PatternRule::new(
        field,
        Shape::Length { max_cm },
        &[
            // "Base Depth: 45 cm", "Summit 60\""
            format!(r"\b(?:{labels})(?:\s+(?:depth|snow\s+depth|area))?{SEP}{NUM}\s*{UNIT}"),
            // "45 cm at the base"
            format!(r"{NUM}\s*{UNIT}\s*at\s+(?:the\s+)?(?:{labels})\b"),
            // "Snow depth at base: 45"
            format!(r"snow\s+depth\s+(?:at\s+)?(?:the\s+)?(?:{labels}){SEP}{NUM}\s*{UNIT}?"),
        ],
    )
}

fn window_rule(field: Field, windows: &str) -> PatternRule {
    PatternRule::new(
        field,
        Shape::Length { max_cm: 300 },
        &[
            // "New Snow 24h: 10 cm", "Overnight 4\""
            format!(r"\b(?:{windows})(?:\s+snow(?:fall)?)?{SEP}{NUM}\s*{UNIT}"),
            // "Overnight: 4", "Last 48 hours - 12"
            // Without a unit the separator is required, so "New Snow 24 hours" is a label.
            format!(r"\b(?:{windows})(?:\s+snow(?:fall)?)?\s*[:\-–]\s*{NUM}\b"),
            // "10 cm in the last 24 hours"
            format!(r"{NUM}\s*{UNIT}\s*(?:of\s+new\s+snow\s+)?in\s+the\s+(?:{windows})"),
        ],
    )
}

fn ratio_rule(field: Field, nouns: &str) -> PatternRule {
    PatternRule::new(
        field,
        Shape::Ratio,
        &[
            // "Lifts: 8/12 open", "Lifts open: 8 of 12"
            format!(r"\b(?:{nouns})(?:\s+open)?{SEP}(\d+)\s*(?:/|of|out\s+of)\s*(\d+)"),
            // "8 of 12 lifts"
            format!(r"(\d+)\s*(?:/|of|out\s+of)\s*(\d+)\s+(?:{nouns})\b"),
        ],
    )
}

/// Every generic rule, one per field.
pub fn default_rules() -> Vec<PatternRule> {
    vec![
        depth_rule(Field::BaseDepth, r"base|lower\s+mountain|bottom", 1000),
        depth_rule(Field::SummitDepth, r"summit|upper\s+mountain|top|peak", 1000),
        window_rule(
            Field::NewSnow24h,
            r"24\s*-?\s*h(?:rs?|ours?)?\b|last\s+24|overnight|new\s+snow(?:fall)?|fresh\s+snow(?:fall)?",
        ),
        window_rule(
            Field::NewSnow48h,
            r"48\s*-?\s*h(?:rs?|ours?)?\b|last\s+48|(?:2|two)\s*-?\s*days?\b",
        ),
        window_rule(
            Field::NewSnow7d,
            r"(?:7|seven)\s*-?\s*days?\b|7d\b|(?:past|last|this)\s+week",
        ),
        PatternRule::new(
            Field::SeasonTotal,
            Shape::Length { max_cm: 3000 },
            &[
                format!(
                    r"(?:season(?:\s+to\s+date|\s+total)?|year\s+to\s+date)(?:\s+snow(?:fall)?)?{SEP}{NUM}\s*{UNIT}"
                ),
                format!(r"{NUM}\s*{UNIT}\s*(?:of\s+snow\s+)?(?:this\s+season|season\s+to\s+date)"),
            ],
        ),
        ratio_rule(Field::Lifts, r"lifts?|chairs?|chairlifts?|gondolas?"),
        ratio_rule(Field::Runs, r"runs?|trails?|pistes?|slopes?"),
        PatternRule::new(
            Field::TemperatureSummit,
            Shape::Temperature,
            &[format!(
                r"(?:summit|top|peak)\s+temp(?:erature)?s?{TSEP}{SIGNED}\s*°?\s*([cf])?\b"
            )],
        ),
        PatternRule::new(
            Field::TemperatureBase,
            Shape::Temperature,
            &[
                format!(r"\bbase\s+temp(?:erature)?s?{TSEP}{SIGNED}\s*°?\s*([cf])?\b"),
                format!(r"\btemp(?:erature)?s?{TSEP}{SIGNED}\s*°?\s*([cf])?\b"),
                format!(r"{SIGNED}\s*°\s*([cf])\b"),
            ],
        )
        .unless_after(r"\b(?:summit|top|peak)(?:\s+temp(?:erature)?s?)?\s*:?\s*"),
        PatternRule::new(
            Field::SnowCondition,
            Shape::Status,
            &[format!(
                r"(?:surface|snow\s+conditions?|conditions?){SEP}(packed\s+powder|powder|machine\s+groomed|groomed|hard\s*pack(?:ed)?|spring\s+conditions|spring\s+snow|icy|variable|wet\s+snow|corn|slush|crud|(?:loose|frozen)\s+granular|granular)"
            )],
        ),
        PatternRule::new(
            Field::TerrainPark,
            Shape::Status,
            &[format!(
                r"\b(?:terrain\s+)?parks?{SEP}(partially\s+open|open|closed)\b"
            )],
        ),
        PatternRule::new(
            Field::LastSnowfall,
            Shape::Date,
            &[format!(
                r"last\s+snow(?:fall)?(?:\s+(?:date|on))?{SEP}(\d{{4}}-\d{{2}}-\d{{2}}|\d{{1,2}}/\d{{1,2}}/\d{{4}}|[a-z]{{3,9}}\.?\s+\d{{1,2}},?\s+\d{{4}}|\d{{1,2}}\s+[a-z]{{3,9}}\s+\d{{4}})"
            )],
        ),
    ]
}

static RULES: LazyLock<Vec<PatternRule>> = LazyLock::new(default_rules);

/// Fallback parser applied to every resort's page.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericParser;

impl GenericParser {
    pub fn rules(&self) -> &'static [PatternRule] {
        &RULES
    }

    pub fn extract_text(&self, text: &str) -> PartialSnowReport {
        let units = UnitSystem::detect(text);
        let mut report = PartialSnowReport::default();
        for rule in self.rules() {
            if let Some(value) = rule.apply(text, units) {
                report.fill(rule.field, value);
            }
        }
        report
    }
}

impl SnowParser for GenericParser {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn kind(&self) -> ParserKind {
        ParserKind::Generic
    }

    fn extract(&self, doc: &Document) -> PartialSnowReport {
        self.extract_text(&doc.searchable_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rule(field: Field) -> &'static PatternRule {
        RULES.iter().find(|r| r.field == field).unwrap()
    }

    fn metric(field: Field, text: &str) -> Option<FieldValue> {
        rule(field).apply(text, UnitSystem::Metric)
    }

    #[test]
    fn test_reference_blob() {
        let text = "Base Depth: 45 cm New Snow 24h: 10 cm Lifts: 8/12 open";
        let report = GenericParser.extract_text(text);

        let expected = PartialSnowReport {
            base_depth_cm: Some(45),
            new_snow_24h_cm: Some(10),
            lifts_open: Some(8),
            lifts_total: Some(12),
            ..Default::default()
        };
        assert_eq!(report, expected);
    }

    #[test]
    fn test_every_rule_compiles() {
        for r in RULES.iter() {
            assert!(!r.patterns.is_empty(), "{:?} has no patterns", r.field);
        }
    }

    // ── depth ────────────────────────────────────────────────────────────────

    #[test]
    fn test_base_depth_shapes() {
        assert_eq!(metric(Field::BaseDepth, "Base: 120cm"), Some(FieldValue::Centimetres(120)));
        assert_eq!(
            metric(Field::BaseDepth, "we have 80 cm at the base"),
            Some(FieldValue::Centimetres(80))
        );
        assert_eq!(
            metric(Field::BaseDepth, "Lower Mountain 30\""),
            Some(FieldValue::Centimetres(76))
        );
    }

    #[test]
    fn test_base_depth_out_of_bounds_skipped() {
        assert_eq!(metric(Field::BaseDepth, "Base: 2500 cm"), None);
        assert_eq!(
            metric(Field::BaseDepth, "Base 5000 cm ... Base 90 cm"),
            Some(FieldValue::Centimetres(90))
        );
    }

    #[test]
    fn test_summit_depth() {
        assert_eq!(
            metric(Field::SummitDepth, "Summit Depth - 210 cm"),
            Some(FieldValue::Centimetres(210))
        );
        assert_eq!(metric(Field::SummitDepth, "Base Depth: 45 cm"), None);
    }

    // ── new snow ─────────────────────────────────────────────────────────────

    #[test]
    fn test_new_snow_windows_are_independent() {
        let text = "24h: 5 cm  48 hours: 12 cm  7 days: 40 cm";
        assert_eq!(metric(Field::NewSnow24h, text), Some(FieldValue::Centimetres(5)));
        assert_eq!(metric(Field::NewSnow48h, text), Some(FieldValue::Centimetres(12)));
        assert_eq!(metric(Field::NewSnow7d, text), Some(FieldValue::Centimetres(40)));
    }

    #[test]
    fn test_new_snow_unitless_follows_page_units() {
        let r = rule(Field::NewSnow24h);
        assert_eq!(
            r.apply("Overnight: 4", UnitSystem::Imperial),
            Some(FieldValue::Centimetres(10))
        );
        assert_eq!(
            r.apply("Overnight: 4", UnitSystem::Metric),
            Some(FieldValue::Centimetres(4))
        );
    }

    #[test]
    fn test_new_snow_trailing_window() {
        assert_eq!(
            metric(Field::NewSnow24h, "15 cm in the last 24 hours"),
            Some(FieldValue::Centimetres(15))
        );
        assert_eq!(metric(Field::NewSnow48h, "New Snow 24h: 10 cm"), None);
    }

    #[test]
    fn test_spaced_window_label_is_not_the_value() {
        let report = GenericParser.extract_text("New Snow 24 hours: 10 cm");
        assert_eq!(report.new_snow_24h_cm, Some(10));

        let report = GenericParser.extract_text("New Snow 48 hrs: 12 cm");
        assert_eq!(report.new_snow_24h_cm, None);
        assert_eq!(report.new_snow_48h_cm, Some(12));

        let report = GenericParser.extract_text("Fresh snow 7 days: 40 cm");
        assert_eq!(report.new_snow_24h_cm, None);
        assert_eq!(report.new_snow_7d_cm, Some(40));
    }

    #[test]
    fn test_unitless_window_needs_separator() {
        let r = rule(Field::NewSnow24h);
        assert_eq!(r.apply("New Snow 24 hours", UnitSystem::Metric), None);
        assert_eq!(
            rule(Field::NewSnow48h).apply("Last 48 hours - 12", UnitSystem::Metric),
            Some(FieldValue::Centimetres(12))
        );
    }

    #[test]
    fn test_new_snow_bound() {
        assert_eq!(metric(Field::NewSnow24h, "24h: 900 cm"), None);
    }

    #[test]
    fn test_season_total() {
        assert_eq!(
            metric(Field::SeasonTotal, "Season Total Snowfall: 412 cm"),
            Some(FieldValue::Centimetres(412))
        );
        assert_eq!(
            metric(Field::SeasonTotal, "312\" this season"),
            Some(FieldValue::Centimetres(792))
        );
    }

    // ── lifts / runs ─────────────────────────────────────────────────────────

    #[test]
    fn test_lifts() {
        assert_eq!(
            metric(Field::Lifts, "Lifts open: 8 of 12"),
            Some(FieldValue::Ratio { open: 8, total: 12 })
        );
        assert_eq!(
            metric(Field::Lifts, "21 out of 31 chairs"),
            Some(FieldValue::Ratio { open: 21, total: 31 })
        );
        assert_eq!(metric(Field::Lifts, "Lifts: 14/12"), None);
    }

    #[test]
    fn test_runs() {
        assert_eq!(
            metric(Field::Runs, "Trails 120/195"),
            Some(FieldValue::Ratio { open: 120, total: 195 })
        );
        assert_eq!(metric(Field::Runs, "Lifts: 8/12 open"), None);
    }

    // ── temperature ──────────────────────────────────────────────────────────

    #[test]
    fn test_temperature() {
        assert_eq!(
            metric(Field::TemperatureBase, "Temperature: -4 °C"),
            Some(FieldValue::Celsius(-4.0))
        );
        assert_eq!(
            metric(Field::TemperatureBase, "currently 23°F at the lodge"),
            Some(FieldValue::Celsius(-5.0))
        );
        assert_eq!(
            metric(Field::TemperatureSummit, "Summit temp: -12C"),
            Some(FieldValue::Celsius(-12.0))
        );
        assert_eq!(
            metric(Field::TemperatureBase, "Temp -4 C"),
            Some(FieldValue::Celsius(-4.0))
        );
        assert_eq!(metric(Field::TemperatureBase, "Base Depth: 45 cm"), None);
    }

    #[test]
    fn test_summit_reading_is_not_base_temperature() {
        let report = GenericParser.extract_text("Summit temp: -12°C");
        assert_eq!(report.temperature_summit_c, Some(-12.0));
        assert_eq!(report.temperature_base_c, None);

        let report =
            GenericParser.extract_text("Summit temperature -12°C, Base temperature -4°C");
        assert_eq!(report.temperature_summit_c, Some(-12.0));
        assert_eq!(report.temperature_base_c, Some(-4.0));

        assert_eq!(
            metric(Field::TemperatureBase, "Summit temp -12°C, Temp -4°C"),
            Some(FieldValue::Celsius(-4.0))
        );
    }

    // ── text fields ──────────────────────────────────────────────────────────

    #[test]
    fn test_snow_condition() {
        assert_eq!(
            metric(Field::SnowCondition, "Surface: Packed  Powder"),
            Some(FieldValue::Text("packed powder".into()))
        );
        assert_eq!(metric(Field::SnowCondition, "Terms and conditions apply"), None);
    }

    #[test]
    fn test_terrain_park() {
        assert_eq!(
            metric(Field::TerrainPark, "Terrain Park: Partially Open"),
            Some(FieldValue::Text("partially open".into()))
        );
    }

    #[test]
    fn test_last_snowfall() {
        assert_eq!(
            metric(Field::LastSnowfall, "Last Snowfall: Jan 5, 2025"),
            Some(FieldValue::Date(NaiveDate::from_ymd_opt(2025, 1, 5).unwrap()))
        );
        assert_eq!(
            metric(Field::LastSnowfall, "Last snow on 2024-12-30"),
            Some(FieldValue::Date(NaiveDate::from_ymd_opt(2024, 12, 30).unwrap()))
        );
    }

    #[test]
    fn test_unrelated_text_yields_nothing() {
        assert!(GenericParser
            .extract_text("Book your lodging now and save 20% on rentals")
            .is_empty());
    }
}
