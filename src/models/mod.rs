use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Resort ────────────────────────────────────────────────────────────────────

/// Static resort metadata, owned by the registry and never mutated by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resort {
    pub name: String,
    pub country: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub base_elevation_m: Option<i32>,
    #[serde(default)]
    pub summit_elevation_m: Option<i32>,
    #[serde(default)]
    pub vertical_drop_m: Option<i32>,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub snow_report_url: Option<String>,
    /// Shared site template this resort is published with, e.g. "vail-resorts".
    #[serde(default)]
    pub chain: Option<String>,
}

impl Resort {
    /// Candidate URLs in preference order: dedicated snow report first, site root second.
    pub fn candidate_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::with_capacity(2);
        for url in [&self.snow_report_url, &self.website_url].into_iter().flatten() {
            let url = url.trim();
            if !url.is_empty() && !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        }
        urls
    }
}

// ── Partial snow report ───────────────────────────────────────────────────────

/// Every field a parser can recover. Lift and run ratios are one field each
/// here because a single match yields both the open and total counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    BaseDepth,
    SummitDepth,
    NewSnow24h,
    NewSnow48h,
    NewSnow7d,
    SeasonTotal,
    Lifts,
    Runs,
    TemperatureBase,
    TemperatureSummit,
    SnowCondition,
    LastSnowfall,
    TerrainPark,
}

/// A value recovered by a parser, already normalised to metric units.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Centimetres(i32),
    Ratio { open: i32, total: i32 },
    Celsius(f64),
    Text(String),
    Date(NaiveDate),
}

/// Snow-report shaped structure where every field may be unknown (`None`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialSnowReport {
    pub base_depth_cm: Option<i32>,
    pub summit_depth_cm: Option<i32>,
    pub new_snow_24h_cm: Option<i32>,
    pub new_snow_48h_cm: Option<i32>,
    pub new_snow_7d_cm: Option<i32>,
    pub lifts_open: Option<i32>,
    pub lifts_total: Option<i32>,
    pub runs_open: Option<i32>,
    pub runs_total: Option<i32>,
    pub temperature_base_c: Option<f64>,
    pub temperature_summit_c: Option<f64>,
    pub snow_condition: Option<String>,
    pub season_total_cm: Option<i32>,
    pub last_snowfall_date: Option<NaiveDate>,
    pub terrain_park_status: Option<String>,
}

macro_rules! fill_missing {
    ($dst:ident, $src:ident, $added:ident; $($field:ident),+ $(,)?) => {
        $(
            if $dst.$field.is_none() && $src.$field.is_some() {
                $dst.$field = $src.$field.clone();
                $added += 1;
            }
        )+
    };
}

impl PartialSnowReport {
    /// Number of individual fields that are known.
    pub fn field_count(&self) -> usize {
        [
            self.base_depth_cm.is_some(),
            self.summit_depth_cm.is_some(),
            self.new_snow_24h_cm.is_some(),
            self.new_snow_48h_cm.is_some(),
            self.new_snow_7d_cm.is_some(),
            self.lifts_open.is_some(),
            self.lifts_total.is_some(),
            self.runs_open.is_some(),
            self.runs_total.is_some(),
            self.temperature_base_c.is_some(),
            self.temperature_summit_c.is_some(),
            self.snow_condition.is_some(),
            self.season_total_cm.is_some(),
            self.last_snowfall_date.is_some(),
            self.terrain_park_status.is_some(),
        ]
        .into_iter()
        .filter(|known| *known)
        .count()
    }

    pub const FIELD_TOTAL: usize = 15;

    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }

    pub fn is_complete(&self) -> bool {
        self.field_count() == Self::FIELD_TOTAL
    }

    /// Base depth or any new-snow window.
    pub fn has_core_fields(&self) -> bool {
        self.base_depth_cm.is_some()
            || self.new_snow_24h_cm.is_some()
            || self.new_snow_48h_cm.is_some()
            || self.new_snow_7d_cm.is_some()
    }

    pub fn is_known(&self, field: Field) -> bool {
        match field {
            Field::BaseDepth => self.base_depth_cm.is_some(),
            Field::SummitDepth => self.summit_depth_cm.is_some(),
            Field::NewSnow24h => self.new_snow_24h_cm.is_some(),
            Field::NewSnow48h => self.new_snow_48h_cm.is_some(),
            Field::NewSnow7d => self.new_snow_7d_cm.is_some(),
            Field::SeasonTotal => self.season_total_cm.is_some(),
            Field::Lifts => self.lifts_open.is_some() && self.lifts_total.is_some(),
            Field::Runs => self.runs_open.is_some() && self.runs_total.is_some(),
            Field::TemperatureBase => self.temperature_base_c.is_some(),
            Field::TemperatureSummit => self.temperature_summit_c.is_some(),
            Field::SnowCondition => self.snow_condition.is_some(),
            Field::LastSnowfall => self.last_snowfall_date.is_some(),
            Field::TerrainPark => self.terrain_park_status.is_some(),
        }
    }

    /// Set `field` from `value` unless it is already known. Returns whether
    /// the field was filled. A value of the wrong shape for the field is ignored.
    pub fn fill(&mut self, field: Field, value: FieldValue) -> bool {
        if self.is_known(field) {
            return false;
        }
        match (field, value) {
            (Field::BaseDepth, FieldValue::Centimetres(cm)) => self.base_depth_cm = Some(cm),
            (Field::SummitDepth, FieldValue::Centimetres(cm)) => self.summit_depth_cm = Some(cm),
            (Field::NewSnow24h, FieldValue::Centimetres(cm)) => self.new_snow_24h_cm = Some(cm),
            (Field::NewSnow48h, FieldValue::Centimetres(cm)) => self.new_snow_48h_cm = Some(cm),
            (Field::NewSnow7d, FieldValue::Centimetres(cm)) => self.new_snow_7d_cm = Some(cm),
            (Field::SeasonTotal, FieldValue::Centimetres(cm)) => self.season_total_cm = Some(cm),
            (Field::Lifts, FieldValue::Ratio { open, total }) => {
                self.lifts_open = Some(open);
                self.lifts_total = Some(total);
            }
            (Field::Runs, FieldValue::Ratio { open, total }) => {
                self.runs_open = Some(open);
                self.runs_total = Some(total);
            }
            (Field::TemperatureBase, FieldValue::Celsius(c)) => self.temperature_base_c = Some(c),
            (Field::TemperatureSummit, FieldValue::Celsius(c)) => {
                self.temperature_summit_c = Some(c)
            }
            (Field::SnowCondition, FieldValue::Text(s)) => self.snow_condition = Some(s),
            (Field::TerrainPark, FieldValue::Text(s)) => self.terrain_park_status = Some(s),
            (Field::LastSnowfall, FieldValue::Date(d)) => self.last_snowfall_date = Some(d),
            _ => return false,
        }
        true
    }

    /// Copy every field known in `other` but unknown here. Returns how many
    /// fields were added; known fields are never overwritten.
    pub fn merge_missing(&mut self, other: &PartialSnowReport) -> usize {
        let mut added = 0;
        fill_missing!(self, other, added;
            base_depth_cm,
            summit_depth_cm,
            new_snow_24h_cm,
            new_snow_48h_cm,
            new_snow_7d_cm,
            lifts_open,
            lifts_total,
            runs_open,
            runs_total,
            temperature_base_c,
            temperature_summit_c,
            snow_condition,
            season_total_cm,
            last_snowfall_date,
            terrain_park_status,
        );
        added
    }
}

// ── Stored snow report ────────────────────────────────────────────────────────

/// One row of `snow_data`: at most one per (resort, date).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnowReport {
    pub resort: String,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub fields: PartialSnowReport,
    pub scraped_at: NaiveDateTime,
}

// ── Extraction tier ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    None,
    Specialized,
    Generic,
    #[serde(rename = "specialized+generic")]
    SpecializedGeneric,
}

impl Tier {
    pub fn from_hits(specialized: bool, generic: bool) -> Self {
        match (specialized, generic) {
            (true, true) => Tier::SpecializedGeneric,
            (true, false) => Tier::Specialized,
            (false, true) => Tier::Generic,
            (false, false) => Tier::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::None => "none",
            Tier::Specialized => "specialized",
            Tier::Generic => "generic",
            Tier::SpecializedGeneric => "specialized+generic",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Tier::None),
            "specialized" => Ok(Tier::Specialized),
            "generic" => Ok(Tier::Generic),
            "specialized+generic" => Ok(Tier::SpecializedGeneric),
            other => Err(format!("unknown tier {other:?}")),
        }
    }
}

// ── Scrape attempt ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Partial,
    Failure,
}

impl AttemptOutcome {
    /// Classify retrieved content purely by what was extracted from it.
    pub fn classify(report: &PartialSnowReport) -> Self {
        if report.has_core_fields() {
            AttemptOutcome::Success
        } else {
            AttemptOutcome::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Partial => "partial",
            AttemptOutcome::Failure => "failure",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AttemptOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AttemptOutcome::Success),
            "partial" => Ok(AttemptOutcome::Partial),
            "failure" => Ok(AttemptOutcome::Failure),
            other => Err(format!("unknown outcome {other:?}")),
        }
    }
}

/// Append-only audit entry, one per resort per sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeAttempt {
    pub resort: String,
    pub attempted_at: NaiveDateTime,
    pub outcome: AttemptOutcome,
    pub tier: Tier,
    pub fields_recovered: usize,
    pub url: Option<String>,
    pub error_detail: Option<String>,
}

// ── Run summary ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn tally(&mut self, outcome: AttemptOutcome) {
        self.attempted += 1;
        match outcome {
            AttemptOutcome::Success => self.succeeded += 1,
            AttemptOutcome::Partial => self.partial += 1,
            AttemptOutcome::Failure => self.failed += 1,
        }
    }
}

// ── Resort filter ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResortFilter {
    #[default]
    All,
    Countries(Vec<String>),
    Names(Vec<String>),
}
