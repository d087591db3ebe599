use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use dotenvy::dotenv;
use metrics::{counter, gauge, histogram};
use pm_common::db::{DbPoolError, MigrationError, create_pool_from_url, run_migrations};
use pm_common::engine::{EngineConfig, EngineError, MatchingEngine};
use pm_common::insights::InsightsReport;
use pm_common::logging::{self, LoggingConfig};
use pm_common::matching::RetrainTrigger;
use pm_common::retraining::{RetrainOutcome, RetrainSummary};
use pm_common::run_id;
use pm_common::store::{MatchStore, MemoryStore, PgStore};
use pm_metrics::{
    ACCEPTANCE_RATE, ACTIVE_WEIGHT_ACCURACY, RECOMMENDATIONS, RETRAIN_DURATION_SECONDS,
    RETRAIN_FAILURES_TOTAL, RETRAIN_RUNS_TOTAL, init_metrics,
};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "pm-retrainer",
    about = "Scheduled weight retraining and insights reporting"
)]
struct Cli {
    /// PostgreSQL connection string; without it the run uses an empty in-memory store
    #[arg(long, env = "DATABASE_URL")]
    db_url: Option<String>,

    /// Run one cycle and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Seconds between cycles
    #[arg(long, env = "PM_RETRAIN_INTERVAL_SECONDS", default_value_t = 86_400)]
    interval_secs: u64,

    /// Feedback window in days (1-365); PM_RETRAIN_WINDOW_DAYS or 30 when unset
    #[arg(long, env = "PM_RETRAIN_WINDOW_DAYS")]
    window_days: Option<u32>,

    /// Skip schema migrations on startup
    #[arg(long, default_value_t = false)]
    skip_migrations: bool,
}

#[derive(Debug, thiserror::Error)]
enum RetrainerError {
    #[error(transparent)]
    Pool(#[from] DbPoolError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

#[derive(Debug)]
struct CycleReport {
    retrain: Option<RetrainSummary>,
    insights: Option<InsightsReport>,
}

fn record_retrain_metrics(summary: &RetrainSummary) {
    counter!(
        RETRAIN_RUNS_TOTAL,
        "outcome" => summary.outcome.as_str().to_string(),
        "trigger" => summary.trigger.as_str().to_string()
    )
    .increment(1);

    let accuracy = match summary.outcome {
        RetrainOutcome::Activated => summary.accuracy.unwrap_or(summary.previous_accuracy),
        _ => summary.previous_accuracy,
    };
    gauge!(ACTIVE_WEIGHT_ACCURACY).set(accuracy);
}

fn log_insights(report: &InsightsReport) {
    info!(
        window_days = report.window_days,
        acceptance_rate = report.acceptance_rate,
        decided = report.summary.decided(),
        pending = report.summary.pending,
        trend = report.trend.trend.as_str(),
        improvement_rate = ?report.improvement_rate,
        recommendations = report.recommendations.len(),
        "insights report"
    );
    for recommendation in &report.recommendations {
        info!(kind = recommendation.kind.as_str(), "{}", recommendation.message);
    }

    gauge!(ACCEPTANCE_RATE).set(report.acceptance_rate);
    gauge!(RECOMMENDATIONS).set(report.recommendations.len() as f64);
}

/// One scheduled retrain followed by an insights report. Failures are logged
/// and leave the corresponding half of the report empty.
async fn run_cycle(engine: &MatchingEngine, window_days: Option<u32>) -> CycleReport {
    let started = Instant::now();
    let retrain = match engine.retrain(window_days, RetrainTrigger::Scheduled).await {
        Ok(summary) => {
            info!(
                outcome = summary.outcome.as_str(),
                version = summary.version.as_deref().unwrap_or("-"),
                previous_version = %summary.previous_version,
                acceptance_rate = summary.acceptance_rate,
                decided = summary.stats.decided(),
                "scheduled retrain finished"
            );
            record_retrain_metrics(&summary);
            Some(summary)
        }
        Err(err @ EngineError::RetrainingInconsistentState { .. }) => {
            error!(error = %err, "retrain left the weight sets inconsistent; previous set stays active");
            counter!(RETRAIN_FAILURES_TOTAL).increment(1);
            None
        }
        Err(err) => {
            warn!(error = %err, "scheduled retrain failed");
            counter!(RETRAIN_FAILURES_TOTAL).increment(1);
            None
        }
    };
    histogram!(RETRAIN_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    let insights = match engine.get_insights(window_days).await {
        Ok(report) => {
            log_insights(&report);
            Some(report)
        }
        Err(err) => {
            warn!(error = %err, "insights report failed");
            None
        }
    };

    CycleReport { retrain, insights }
}

async fn build_store(cli: &Cli) -> Result<Arc<dyn MatchStore>, RetrainerError> {
    let Some(url) = cli.db_url.as_deref() else {
        warn!("DATABASE_URL not set; running against an empty in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let pool = create_pool_from_url(url)?;
    if !cli.skip_migrations {
        run_migrations(&pool).await?;
    }
    Ok(Arc::new(PgStore::new(pool)))
}

// Ctrl-C or SIGTERM. A cycle in progress finishes first.
async fn shutdown_requested() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                let _ = sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run() -> Result<(), RetrainerError> {
    dotenv().ok();
    logging::init(env!("CARGO_PKG_NAME"), &LoggingConfig::from_env());
    init_metrics("PM_RETRAINER_METRICS_PORT", 9187);

    let cli = Cli::parse();
    let store = build_store(&cli).await?;
    let engine = MatchingEngine::from_config(store, EngineConfig::from_env());

    info!(
        run_id = run_id::get(),
        once = cli.once,
        interval_secs = cli.interval_secs,
        window_days = ?cli.window_days,
        store = engine.store().backend(),
        "starting retrainer"
    );

    if cli.once {
        run_cycle(&engine, cli.window_days).await;
        return Ok(());
    }

    let mut ticker = interval(Duration::from_secs(cli.interval_secs.max(60)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = shutdown_requested();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_cycle(&engine, cli.window_days).await;
            }
            _ = &mut shutdown => {
                info!("shutdown requested; stopping retrainer");
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = %err, "pm-retrainer failed");
        eprintln!("pm-retrainer failed: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pm_common::encoder::ProfileEncoder;
    use pm_common::feedback::{FeedbackEvent, FeedbackInput, FeedbackKind};
    use pm_common::insights::RecommendationKind;

    use super::*;

    fn engine(store: Arc<MemoryStore>) -> MatchingEngine {
        MatchingEngine::new(store, ProfileEncoder::fallback_only(), EngineConfig::default())
    }

    async fn seed(store: &MemoryStore, accepted: usize, rejected: usize) {
        for n in 0..accepted + rejected {
            let kind = if n < accepted {
                FeedbackKind::Accepted
            } else {
                FeedbackKind::Rejected
            };
            let event = FeedbackEvent::from_input(
                FeedbackInput {
                    user_id: format!("u-{n}"),
                    match_id: format!("co-1:lab-{n}"),
                    match_score: 0.6,
                    kind,
                    rejection_reason: None,
                    counterpart_name: None,
                    counterpart_category: None,
                },
                Utc::now(),
            )
            .unwrap();
            store.upsert_feedback(event).await.unwrap();
        }
    }

    #[tokio::test]
    async fn cycle_activates_and_reports() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 8, 2).await;

        let report = run_cycle(&engine(store.clone()), None).await;

        let retrain = report.retrain.unwrap();
        assert_eq!(retrain.outcome, RetrainOutcome::Activated);
        assert_eq!(retrain.trigger, RetrainTrigger::Scheduled);
        assert_eq!(store.active_versions().await.unwrap().len(), 1);

        let insights = report.insights.unwrap();
        assert!((insights.acceptance_rate - 0.8).abs() < 1e-12);
        assert!(insights.improvement_rate.is_some());
    }

    #[tokio::test]
    async fn empty_store_skips_and_asks_for_feedback() {
        let report = run_cycle(&engine(Arc::new(MemoryStore::new())), Some(7)).await;

        assert_eq!(report.retrain.unwrap().outcome, RetrainOutcome::Skipped);
        let kinds: Vec<_> = report
            .insights
            .unwrap()
            .recommendations
            .iter()
            .map(|r| r.kind)
            .collect();
        assert!(kinds.contains(&RecommendationKind::CollectMoreFeedback));
    }

    #[tokio::test]
    async fn failures_are_logged_not_returned() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);

        let report = run_cycle(&engine(store), None).await;
        assert!(report.retrain.is_none());
        assert!(report.insights.is_none());
    }

    #[test]
    fn cli_defaults_to_daily_loop() {
        let cli = Cli::parse_from(["pm-retrainer"]);
        assert!(!cli.once);
        assert_eq!(cli.interval_secs, 86_400);
    }
}
