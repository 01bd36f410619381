//! Collection orchestrator: registry → fetch → extract → record → upsert.
//!
//! One sweep visits the resorts a filter resolves to, sequentially and in
//! registry order. A resort that cannot be fetched or parsed is recorded and
//! counted, never fatal. Only a failed write to the attempt log or the report
//! store stops the sweep, and the attempts gathered so far travel with the
//! error.
//!
//! Cancellation is checked between resorts; an in-flight fetch always finishes.

use crate::error::{EngineError, Sweep, SweepError};
use crate::events::{EngineEvent, EventSink};
use crate::extract::{Extraction, ExtractionPipeline};
use crate::fetch::PageSource;
use crate::models::{
    AttemptOutcome, PartialSnowReport, Resort, ResortFilter, ScrapeAttempt, Tier,
};
use crate::registry::ResortRegistry;
use crate::storage::{AttemptRecorder, ReportStore};
use crate::utils::Timer;
use chrono::{NaiveDateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Collector {
    registry: ResortRegistry,
    source: Arc<dyn PageSource>,
    pipeline: ExtractionPipeline,
    recorder: Arc<dyn AttemptRecorder>,
    store: Arc<dyn ReportStore>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
}

impl Collector {
    /// Fails with [`EngineError::Configuration`] before any resort is touched
    /// if the registry holds an entry that could never be fetched.
    pub fn new(
        registry: ResortRegistry,
        source: Arc<dyn PageSource>,
        recorder: Arc<dyn AttemptRecorder>,
        store: Arc<dyn ReportStore>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, EngineError> {
        registry.validate()?;
        Ok(Self {
            registry,
            source,
            pipeline: ExtractionPipeline::default(),
            recorder,
            store,
            sink,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the sweep at the next resort boundary when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn collect(&self, filter: &ResortFilter) -> Result<Sweep, SweepError> {
        let targets = self.registry.resolve(filter);
        info!("=== Sweep: {} resort(s) ===", targets.len());
        let _timer = Timer::start(format!("sweep of {} resort(s)", targets.len()));

        let mut sweep = Sweep::default();
        let result = self.sweep(&targets, &mut sweep).await;

        self.sink.emit(EngineEvent::SweepFinished {
            summary: sweep.summary,
        });
        if let Err(e) = self.sink.flush() {
            warn!("Event sink flush failed: {:#}", e);
        }

        let s = &sweep.summary;
        info!(
            "=== Done: {} attempted | {} success | {} partial | {} failed{} ===",
            s.attempted,
            s.succeeded,
            s.partial,
            s.failed,
            if s.cancelled { " | cancelled" } else { "" },
        );

        match result {
            Ok(()) => Ok(sweep),
            Err(cause) => Err(SweepError { sweep, cause }),
        }
    }

    async fn sweep(&self, targets: &[&Resort], sweep: &mut Sweep) -> Result<(), EngineError> {
        for (i, resort) in targets.iter().enumerate() {
            if self.cancel.is_cancelled() {
                sweep.summary.cancelled = true;
                info!(remaining = targets.len() - i, "Sweep cancelled");
                break;
            }
            self.process(resort, sweep).await?;
        }
        Ok(())
    }

    async fn process(&self, resort: &Resort, sweep: &mut Sweep) -> Result<(), EngineError> {
        let attempted_at = Utc::now().naive_utc();
        let (attempt, report) = self.scrape(resort, attempted_at).await;

        sweep.summary.tally(attempt.outcome);
        sweep.attempts.push(attempt.clone());

        let persistence = |source: anyhow::Error| EngineError::Persistence {
            resort: resort.name.clone(),
            source,
        };

        self.recorder.record(&attempt).map_err(persistence)?;
        self.sink.emit(EngineEvent::AttemptRecorded {
            resort: resort.name.clone(),
            outcome: attempt.outcome,
            tier: attempt.tier,
            fields: attempt.fields_recovered,
        });

        if !report.is_empty() {
            self.store
                .upsert(&resort.name, attempted_at.date(), &report, attempted_at)
                .map_err(persistence)?;
        }
        Ok(())
    }

    /// Fetch and extract one resort. Never fails: an unreachable resort comes
    /// back as a `failure` attempt with an empty report.
    async fn scrape(
        &self,
        resort: &Resort,
        attempted_at: NaiveDateTime,
    ) -> (ScrapeAttempt, PartialSnowReport) {
        let candidates = resort.candidate_urls();

        match self.source.fetch_first(&candidates).await {
            Ok(page) => {
                let Extraction { report, tier } = self.pipeline.extract(resort, &page.body);
                let outcome = AttemptOutcome::classify(&report);
                let fields = report.field_count();
                info!(resort = %resort.name, %outcome, %tier, fields, "Scraped");

                let attempt = ScrapeAttempt {
                    resort: resort.name.clone(),
                    attempted_at,
                    outcome,
                    tier,
                    fields_recovered: fields,
                    url: Some(page.url),
                    error_detail: report
                        .is_empty()
                        .then(|| "no snow fields recognised".to_string()),
                };
                (attempt, report)
            }
            Err(e) => {
                warn!(resort = %resort.name, "{}", e);
                let url = (!e.url.is_empty()).then(|| e.url.clone());
                let attempt = ScrapeAttempt {
                    resort: resort.name.clone(),
                    attempted_at,
                    outcome: AttemptOutcome::Failure,
                    tier: Tier::None,
                    fields_recovered: 0,
                    url,
                    error_detail: Some(EngineError::from(e).to_string()),
                };
                (attempt, PartialSnowReport::default())
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
