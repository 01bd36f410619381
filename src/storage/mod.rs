use crate::models::{AttemptOutcome, PartialSnowReport, Resort, ScrapeAttempt, SnowReport, Tier};
use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use duckdb::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS resorts (
    name                VARCHAR PRIMARY KEY,
    country             VARCHAR NOT NULL,
    region              VARCHAR,
    latitude            DOUBLE,
    longitude           DOUBLE,
    base_elevation_m    INTEGER,
    summit_elevation_m  INTEGER,
    vertical_drop_m     INTEGER,
    website_url         VARCHAR,
    snow_report_url     VARCHAR,
    chain               VARCHAR,
    updated_at          TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS snow_data (
    resort                  VARCHAR  NOT NULL,
    date                    DATE     NOT NULL,
    base_depth_cm           INTEGER,
    summit_depth_cm         INTEGER,
    new_snow_24h_cm         INTEGER,
    new_snow_48h_cm         INTEGER,
    new_snow_7d_cm          INTEGER,
    lifts_open              INTEGER,
    lifts_total             INTEGER,
    runs_open               INTEGER,
    runs_total              INTEGER,
    temperature_base_c      DOUBLE,
    temperature_summit_c    DOUBLE,
    snow_condition          VARCHAR,
    season_total_cm         INTEGER,
    last_snowfall_date      DATE,
    terrain_park_status     VARCHAR,
    scraped_at              TIMESTAMP NOT NULL,
    PRIMARY KEY (resort, date)
);

CREATE SEQUENCE IF NOT EXISTS scraping_log_id_seq START 1;

CREATE TABLE IF NOT EXISTS scraping_log (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('scraping_log_id_seq'),
    resort              VARCHAR   NOT NULL,
    attempted_at        TIMESTAMP NOT NULL,
    outcome             VARCHAR   NOT NULL,
    tier                VARCHAR   NOT NULL,
    fields_recovered    INTEGER   NOT NULL DEFAULT 0,
    url                 VARCHAR,
    error_detail        VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_snow_date  ON snow_data (date);
CREATE INDEX IF NOT EXISTS idx_log_resort ON scraping_log (resort);
"#;

const REPORT_COLUMNS: &str = r#"
    resort, date,
    base_depth_cm, summit_depth_cm,
    new_snow_24h_cm, new_snow_48h_cm, new_snow_7d_cm,
    lifts_open, lifts_total, runs_open, runs_total,
    temperature_base_c, temperature_summit_c,
    snow_condition, season_total_cm, last_snowfall_date, terrain_park_status,
    scraped_at
"#;

// ── Store traits ──────────────────────────────────────────────────────────────

/// Durable per-(resort, date) snow reports.
pub trait ReportStore: Send + Sync {
    /// Insert or merge. Known incoming fields replace stored ones; unknown
    /// incoming fields never erase stored ones.
    fn upsert(
        &self,
        resort: &str,
        date: NaiveDate,
        report: &PartialSnowReport,
        scraped_at: NaiveDateTime,
    ) -> Result<()>;

    /// Newest report per resort, newest date first then resort name.
    fn latest(&self, resort: Option<&str>) -> Result<Vec<SnowReport>>;
}

/// Append-only scrape attempt log.
pub trait AttemptRecorder: Send + Sync {
    /// Persist one attempt and return its log id.
    fn record(&self, attempt: &ScrapeAttempt) -> Result<i64>;
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("DuckDB connection lock poisoned"))
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Resorts ───────────────────────────────────────────────────────────────

    /// Mirror registry metadata into `resorts`. The engine only ever reads it back.
    pub fn upsert_resorts(&self, resorts: &[Resort]) -> Result<usize> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now().naive_utc();
        for r in resorts {
            tx.execute(
                r#"INSERT INTO resorts
                       (name, country, region, latitude, longitude,
                        base_elevation_m, summit_elevation_m, vertical_drop_m,
                        website_url, snow_report_url, chain, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT (name) DO UPDATE SET
                       country            = excluded.country,
                       region             = COALESCE(excluded.region,             resorts.region),
                       latitude           = COALESCE(excluded.latitude,           resorts.latitude),
                       longitude          = COALESCE(excluded.longitude,          resorts.longitude),
                       base_elevation_m   = COALESCE(excluded.base_elevation_m,   resorts.base_elevation_m),
                       summit_elevation_m = COALESCE(excluded.summit_elevation_m, resorts.summit_elevation_m),
                       vertical_drop_m    = COALESCE(excluded.vertical_drop_m,    resorts.vertical_drop_m),
                       website_url        = excluded.website_url,
                       snow_report_url    = excluded.snow_report_url,
                       chain              = excluded.chain,
                       updated_at         = excluded.updated_at"#,
                params![
                    r.name,
                    r.country,
                    r.region,
                    r.latitude,
                    r.longitude,
                    r.base_elevation_m,
                    r.summit_elevation_m,
                    r.vertical_drop_m,
                    r.website_url,
                    r.snow_report_url,
                    r.chain,
                    now,
                ],
            )
            .with_context(|| format!("upsert resort {}", r.name))?;
        }
        tx.commit()?;
        Ok(resorts.len())
    }

    pub fn resort_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM resorts")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Reports ───────────────────────────────────────────────────────────────

    #[cfg(test)]
    pub fn report(&self, resort: &str, date: NaiveDate) -> Result<Option<SnowReport>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPORT_COLUMNS} FROM snow_data WHERE resort = ? AND date = ?"
        ))?;
        let mut rows = stmt.query_map(params![resort, date], report_from_row)?;
        rows.next().transpose().context("read snow report")
    }

    pub fn report_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM snow_data")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT MIN(date), MAX(date) FROM snow_data")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Scraping log ──────────────────────────────────────────────────────────

    /// Most recent attempts first, optionally for one resort.
    pub fn attempts(&self, resort: Option<&str>, limit: usize) -> Result<Vec<ScrapeAttempt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT resort, attempted_at, outcome, tier, fields_recovered, url, error_detail
               FROM scraping_log
               WHERE ?::VARCHAR IS NULL OR lower(resort) = lower(?::VARCHAR)
               ORDER BY attempted_at DESC, id DESC
               LIMIT ?"#,
        )?;
        let rows = stmt.query_map(params![resort, resort, limit as i64], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, NaiveDateTime>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i32>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut attempts = Vec::new();
        for row in rows {
            let (resort, attempted_at, outcome, tier, fields, url, error_detail) = row?;
            attempts.push(ScrapeAttempt {
                resort,
                attempted_at,
                outcome: outcome.parse::<AttemptOutcome>().map_err(|e| anyhow!(e))?,
                tier: tier.parse::<Tier>().map_err(|e| anyhow!(e))?,
                fields_recovered: fields.max(0) as usize,
                url,
                error_detail,
            });
        }
        Ok(attempts)
    }

    pub fn attempt_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM scraping_log")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    /// Attempt totals per outcome, in outcome order.
    pub fn outcome_counts(&self) -> Result<Vec<(AttemptOutcome, i64)>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT outcome, COUNT(*) FROM scraping_log GROUP BY outcome")?;
        let rows: Vec<(String, i64)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;

        let mut counts: Vec<(AttemptOutcome, i64)> = rows
            .into_iter()
            .filter_map(|(o, n)| o.parse().ok().map(|o| (o, n)))
            .collect();
        counts.sort_by_key(|(o, _)| *o as u8);
        Ok(counts)
    }
}

fn report_from_row(r: &Row<'_>) -> duckdb::Result<SnowReport> {
    Ok(SnowReport {
        resort: r.get(0)?,
        date: r.get(1)?,
        fields: PartialSnowReport {
            base_depth_cm: r.get(2)?,
            summit_depth_cm: r.get(3)?,
            new_snow_24h_cm: r.get(4)?,
            new_snow_48h_cm: r.get(5)?,
            new_snow_7d_cm: r.get(6)?,
            lifts_open: r.get(7)?,
            lifts_total: r.get(8)?,
            runs_open: r.get(9)?,
            runs_total: r.get(10)?,
            temperature_base_c: r.get(11)?,
            temperature_summit_c: r.get(12)?,
            snow_condition: r.get(13)?,
            season_total_cm: r.get(14)?,
            last_snowfall_date: r.get(15)?,
            terrain_park_status: r.get(16)?,
        },
        scraped_at: r.get(17)?,
    })
}

impl ReportStore for Repository {
    fn upsert(
        &self,
        resort: &str,
        date: NaiveDate,
        report: &PartialSnowReport,
        scraped_at: NaiveDateTime,
    ) -> Result<()> {
        let sql = r#"
            INSERT INTO snow_data
                (resort, date,
                 base_depth_cm, summit_depth_cm,
                 new_snow_24h_cm, new_snow_48h_cm, new_snow_7d_cm,
                 lifts_open, lifts_total, runs_open, runs_total,
                 temperature_base_c, temperature_summit_c,
                 snow_condition, season_total_cm, last_snowfall_date, terrain_park_status,
                 scraped_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (resort, date) DO UPDATE SET
                base_depth_cm        = COALESCE(excluded.base_depth_cm,        snow_data.base_depth_cm),
                summit_depth_cm      = COALESCE(excluded.summit_depth_cm,      snow_data.summit_depth_cm),
                new_snow_24h_cm      = COALESCE(excluded.new_snow_24h_cm,      snow_data.new_snow_24h_cm),
                new_snow_48h_cm      = COALESCE(excluded.new_snow_48h_cm,      snow_data.new_snow_48h_cm),
                new_snow_7d_cm       = COALESCE(excluded.new_snow_7d_cm,       snow_data.new_snow_7d_cm),
                lifts_open           = COALESCE(excluded.lifts_open,           snow_data.lifts_open),
                lifts_total          = COALESCE(excluded.lifts_total,          snow_data.lifts_total),
                runs_open            = COALESCE(excluded.runs_open,            snow_data.runs_open),
                runs_total           = COALESCE(excluded.runs_total,           snow_data.runs_total),
                temperature_base_c   = COALESCE(excluded.temperature_base_c,   snow_data.temperature_base_c),
                temperature_summit_c = COALESCE(excluded.temperature_summit_c, snow_data.temperature_summit_c),
                snow_condition       = COALESCE(excluded.snow_condition,       snow_data.snow_condition),
                season_total_cm      = COALESCE(excluded.season_total_cm,      snow_data.season_total_cm),
                last_snowfall_date   = COALESCE(excluded.last_snowfall_date,   snow_data.last_snowfall_date),
                terrain_park_status  = COALESCE(excluded.terrain_park_status,  snow_data.terrain_park_status),
                scraped_at           = excluded.scraped_at
        "#;

        let r = report;
        let conn = self.conn()?;
        conn.execute(
            sql,
            params![
                resort,
                date,
                r.base_depth_cm,
                r.summit_depth_cm,
                r.new_snow_24h_cm,
                r.new_snow_48h_cm,
                r.new_snow_7d_cm,
                r.lifts_open,
                r.lifts_total,
                r.runs_open,
                r.runs_total,
                r.temperature_base_c,
                r.temperature_summit_c,
                r.snow_condition,
                r.season_total_cm,
                r.last_snowfall_date,
                r.terrain_park_status,
                scraped_at,
            ],
        )
        .with_context(|| format!("upsert snow report {} {}", resort, date))?;
        debug!(resort, %date, fields = r.field_count(), "Upserted snow report");
        Ok(())
    }

    fn latest(&self, resort: Option<&str>) -> Result<Vec<SnowReport>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT {REPORT_COLUMNS}
               FROM snow_data
               WHERE ?::VARCHAR IS NULL OR lower(resort) = lower(?::VARCHAR)
               QUALIFY row_number() OVER (PARTITION BY resort ORDER BY date DESC) = 1
               ORDER BY date DESC, resort"#
        ))?;
        let reports = stmt
            .query_map(params![resort, resort], report_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("read latest snow reports")?;
        Ok(reports)
    }
}

impl AttemptRecorder for Repository {
    fn record(&self, attempt: &ScrapeAttempt) -> Result<i64> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"INSERT INTO scraping_log
                   (resort, attempted_at, outcome, tier, fields_recovered, url, error_detail)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               RETURNING id"#,
        )?;
        let id: i64 = stmt
            .query_row(
                params![
                    attempt.resort,
                    attempt.attempted_at,
                    attempt.outcome.as_str(),
                    attempt.tier.as_str(),
                    attempt.fields_recovered as i64,
                    attempt.url,
                    attempt.error_detail,
                ],
                |r| r.get(0),
            )
            .with_context(|| format!("record attempt for {}", attempt.resort))?;
        Ok(id)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::resort;
    use chrono::NaiveTime;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn at(d: u32, h: u32) -> NaiveDateTime {
        day(d).and_time(NaiveTime::from_hms_opt(h, 0, 0).unwrap())
    }

    fn attempt(resort: &str, when: NaiveDateTime, outcome: AttemptOutcome) -> ScrapeAttempt {
        ScrapeAttempt {
            resort: resort.to_string(),
            attempted_at: when,
            outcome,
            tier: Tier::Generic,
            fields_recovered: 3,
            url: Some(format!("https://{}.example/snow", resort.to_lowercase())),
            error_detail: None,
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let repo = repo();
        repo.run_migrations().unwrap();
        assert_eq!(repo.report_count().unwrap(), 0);
    }

    #[test]
    fn test_upsert_merge_never_erases_known_fields() {
        let repo = repo();
        let first = PartialSnowReport {
            base_depth_cm: Some(45),
            lifts_open: Some(8),
            lifts_total: Some(12),
            ..Default::default()
        };
        let second = PartialSnowReport {
            base_depth_cm: Some(50),
            new_snow_24h_cm: Some(10),
            ..Default::default()
        };

        repo.upsert("Zermatt", day(5), &first, at(5, 8)).unwrap();
        repo.upsert("Zermatt", day(5), &second, at(5, 14)).unwrap();

        let stored = repo.report("Zermatt", day(5)).unwrap().unwrap();
        assert_eq!(stored.fields.base_depth_cm, Some(50));
        assert_eq!(stored.fields.new_snow_24h_cm, Some(10));
        assert_eq!(stored.fields.lifts_open, Some(8));
        assert_eq!(stored.fields.lifts_total, Some(12));
        assert_eq!(stored.scraped_at, at(5, 14));
        assert_eq!(repo.report_count().unwrap(), 1);
    }

    #[test]
    fn test_upsert_one_row_per_resort_and_date() {
        let repo = repo();
        let r = PartialSnowReport {
            base_depth_cm: Some(45),
            ..Default::default()
        };
        for _ in 0..3 {
            repo.upsert("Zermatt", day(5), &r, at(5, 8)).unwrap();
        }
        repo.upsert("Zermatt", day(6), &r, at(6, 8)).unwrap();
        repo.upsert("Verbier", day(5), &r, at(5, 8)).unwrap();
        assert_eq!(repo.report_count().unwrap(), 3);
        assert_eq!(repo.date_range().unwrap(), (Some(day(5)), Some(day(6))));
    }

    #[test]
    fn test_latest_one_per_resort_ordered() {
        let repo = repo();
        let r = |cm| PartialSnowReport {
            base_depth_cm: Some(cm),
            ..Default::default()
        };
        repo.upsert("Zermatt", day(3), &r(10), at(3, 8)).unwrap();
        repo.upsert("Zermatt", day(5), &r(20), at(5, 8)).unwrap();
        repo.upsert("Verbier", day(4), &r(30), at(4, 8)).unwrap();
        repo.upsert("Alta", day(5), &r(40), at(5, 8)).unwrap();

        let latest = repo.latest(None).unwrap();
        let keys: Vec<(&str, NaiveDate)> =
            latest.iter().map(|s| (s.resort.as_str(), s.date)).collect();
        assert_eq!(
            keys,
            vec![("Alta", day(5)), ("Zermatt", day(5)), ("Verbier", day(4))]
        );
        assert_eq!(latest[1].fields.base_depth_cm, Some(20));

        let one = repo.latest(Some("zermatt")).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].date, day(5));

        assert!(repo.latest(Some("Nowhere")).unwrap().is_empty());
    }

    #[test]
    fn test_record_is_append_only() {
        let repo = repo();
        let first = repo
            .record(&attempt("Zermatt", at(5, 8), AttemptOutcome::Success))
            .unwrap();
        let second = repo
            .record(&attempt("Zermatt", at(5, 8), AttemptOutcome::Success))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(repo.attempt_count().unwrap(), 2);
    }

    #[test]
    fn test_attempts_most_recent_first() {
        let repo = repo();
        repo.record(&attempt("Zermatt", at(3, 8), AttemptOutcome::Failure))
            .unwrap();
        repo.record(&attempt("Verbier", at(4, 8), AttemptOutcome::Partial))
            .unwrap();
        let mut ok = attempt("Zermatt", at(5, 8), AttemptOutcome::Success);
        ok.tier = Tier::SpecializedGeneric;
        repo.record(&ok).unwrap();

        let all = repo.attempts(None, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], ok);

        let zermatt = repo.attempts(Some("Zermatt"), 1).unwrap();
        assert_eq!(zermatt.len(), 1);
        assert_eq!(zermatt[0].tier, Tier::SpecializedGeneric);

        assert_eq!(
            repo.outcome_counts().unwrap(),
            vec![
                (AttemptOutcome::Success, 1),
                (AttemptOutcome::Partial, 1),
                (AttemptOutcome::Failure, 1)
            ]
        );
    }

    #[test]
    fn test_upsert_resorts() {
        let repo = repo();
        let resorts = vec![
            resort("Zermatt", "Switzerland", None),
            resort("Verbier", "Switzerland", None),
        ];
        assert_eq!(repo.upsert_resorts(&resorts).unwrap(), 2);
        assert_eq!(repo.upsert_resorts(&resorts).unwrap(), 2);
        assert_eq!(repo.resort_count().unwrap(), 2);
    }

    #[test]
    fn test_on_disk_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snow.duckdb");
        {
            let repo = Repository::open(&path).unwrap();
            repo.run_migrations().unwrap();
            let report = PartialSnowReport {
                new_snow_24h_cm: Some(30),
                ..Default::default()
            };
            repo.upsert("Alta", day(5), &report, at(5, 8)).unwrap();
        }
        let repo = Repository::open(&path).unwrap();
        assert_eq!(repo.report_count().unwrap(), 1);
    }
}
