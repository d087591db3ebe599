#![allow(async_fn_in_trait)]

use std::future::Future;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use deadpool_postgres::GenericClient;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Error, Row};
use tracing::warn;

/// Unset, unparsable and zero all disable slow-query logging.
fn parse_threshold(raw: Option<&str>) -> Option<Duration> {
    raw?.trim()
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

fn slow_query_threshold() -> Option<Duration> {
    static THRESHOLD: OnceLock<Option<Duration>> = OnceLock::new();

    *THRESHOLD.get_or_init(|| {
        parse_threshold(std::env::var("PM_DB_LOG_MIN_DURATION_MS").ok().as_deref())
    })
}

async fn timed<T, F>(label: &str, query: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    let started = Instant::now();
    let result = query.await;
    let elapsed = started.elapsed();

    if slow_query_threshold().is_some_and(|threshold| elapsed >= threshold) {
        warn!(
            query = label,
            elapsed_ms = elapsed.as_millis() as u64,
            failed = result.is_err(),
            "slow_query_detected"
        );
    }
    result
}

/// Prepared-statement helpers over any pooled client or transaction. Each
/// call is labelled and timed; calls slower than
/// `PM_DB_LOG_MIN_DURATION_MS` are logged at warn.
pub trait TimedClientExt: GenericClient {
    async fn timed_query_cached(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
        label: &str,
    ) -> Result<Vec<Row>, Error> {
        timed(label, async {
            let prepared = self.prepare_cached(statement).await?;
            self.query(&prepared, params).await
        })
        .await
    }

    async fn timed_query_opt_cached(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
        label: &str,
    ) -> Result<Option<Row>, Error> {
        timed(label, async {
            let prepared = self.prepare_cached(statement).await?;
            self.query_opt(&prepared, params).await
        })
        .await
    }

    async fn timed_query_one_cached(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
        label: &str,
    ) -> Result<Row, Error> {
        timed(label, async {
            let prepared = self.prepare_cached(statement).await?;
            self.query_one(&prepared, params).await
        })
        .await
    }

    async fn timed_execute_cached(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
        label: &str,
    ) -> Result<u64, Error> {
        timed(label, async {
            let prepared = self.prepare_cached(statement).await?;
            self.execute(&prepared, params).await
        })
        .await
    }
}

impl<T: GenericClient + ?Sized> TimedClientExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_parsing() {
        assert_eq!(parse_threshold(Some("250")), Some(Duration::from_millis(250)));
        assert_eq!(parse_threshold(Some(" 40 ")), Some(Duration::from_millis(40)));
        assert_eq!(parse_threshold(Some("0")), None);
        assert_eq!(parse_threshold(Some("-5")), None);
        assert_eq!(parse_threshold(Some("fast")), None);
        assert_eq!(parse_threshold(None), None);
    }

    #[tokio::test]
    async fn timed_passes_the_result_through() {
        let value = timed("noop", async { Ok::<_, Error>(7u64) }).await;
        assert_eq!(value.ok(), Some(7));
    }
}
