//! Source registry: the read-only, ordered list of resorts a sweep can visit.

use crate::error::EngineError;
use crate::models::{Resort, ResortFilter};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct ResortRegistry {
    resorts: Vec<Resort>,
}

impl ResortRegistry {
    /// Build a registry, rejecting entries the engine could never fetch.
    pub fn new(resorts: Vec<Resort>) -> Result<Self, EngineError> {
        let registry = Self { resorts };
        registry.validate()?;
        Ok(registry)
    }

    #[cfg(test)]
    pub(crate) fn unvalidated(resorts: Vec<Resort>) -> Self {
        Self { resorts }
    }

    /// Read a resort CSV (header row, one resort per line).
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading resort registry from {:?}", path);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open registry {:?}", path))?;

        let mut resorts = Vec::new();
        for (i, row) in reader.deserialize::<Resort>().enumerate() {
            let resort = row.with_context(|| format!("Row {} in {:?}", i + 1, path))?;
            resorts.push(resort);
        }

        let registry = Self::new(resorts)?;
        info!("{} resorts loaded from {:?}", registry.len(), path);
        Ok(registry)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for resort in &self.resorts {
            if resort.name.trim().is_empty() {
                return Err(EngineError::Configuration(
                    "resort with an empty name".to_string(),
                ));
            }
            if !seen.insert(resort.name.as_str()) {
                return Err(EngineError::Configuration(format!(
                    "duplicate resort {:?}",
                    resort.name
                )));
            }

            let urls = resort.candidate_urls();
            if urls.is_empty() {
                return Err(EngineError::Configuration(format!(
                    "{} has neither a website URL nor a snow report URL",
                    resort.name
                )));
            }
            for url in &urls {
                Url::parse(url).map_err(|e| {
                    EngineError::Configuration(format!(
                        "{} has an invalid URL {:?}: {}",
                        resort.name, url, e
                    ))
                })?;
            }
        }
        Ok(())
    }

    pub fn resorts(&self) -> &[Resort] {
        &self.resorts
    }

    /// Case-insensitive lookup by name.
    pub fn get(&self, name: &str) -> Option<&Resort> {
        self.resorts.iter().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.resorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resorts.is_empty()
    }

    /// Resorts matching `filter`, in registry order.
    pub fn resolve(&self, filter: &ResortFilter) -> Vec<&Resort> {
        match filter {
            ResortFilter::All => self.resorts.iter().collect(),
            ResortFilter::Countries(countries) => self
                .resorts
                .iter()
                .filter(|r| countries.iter().any(|c| c.eq_ignore_ascii_case(&r.country)))
                .collect(),
            ResortFilter::Names(names) => {
                for name in names {
                    if !self.resorts.iter().any(|r| r.name.eq_ignore_ascii_case(name)) {
                        warn!("No resort named {:?} in registry", name);
                    }
                }
                self.resorts
                    .iter()
                    .filter(|r| names.iter().any(|n| n.eq_ignore_ascii_case(&r.name)))
                    .collect()
            }
        }
    }

    /// Distinct countries, sorted.
    pub fn countries(&self) -> Vec<&str> {
        let mut countries: Vec<&str> = self.resorts.iter().map(|r| r.country.as_str()).collect();
        countries.sort_unstable();
        countries.dedup();
        countries
    }
}

impl ResortFilter {
    /// Build a filter from CLI-style lists; both lists at once is rejected.
    pub fn from_args(countries: Vec<String>, names: Vec<String>) -> Result<Self, EngineError> {
        match (countries.is_empty(), names.is_empty()) {
            (true, true) => Ok(ResortFilter::All),
            (false, true) => Ok(ResortFilter::Countries(countries)),
            (true, false) => Ok(ResortFilter::Names(names)),
            (false, false) => Err(EngineError::Configuration(
                "filter by countries or by resort names, not both".to_string(),
            )),
        }
    }
}

#[cfg(test)]
pub(crate) fn resort(name: &str, country: &str, report_url: Option<&str>) -> Resort {
    Resort {
        name: name.to_string(),
        country: country.to_string(),
        region: None,
        latitude: None,
        longitude: None,
        base_elevation_m: None,
        summit_elevation_m: None,
        vertical_drop_m: None,
        website_url: Some(format!(
            "https://www.{}.example",
            name.to_lowercase().replace(' ', "-")
        )),
        snow_report_url: report_url.map(str::to_string),
        chain: None,
    }
}
