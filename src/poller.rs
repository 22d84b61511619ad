//! Bounded polling for a run's report.
//!
//! The report endpoint answers with an error until the run finishes, so
//! the poller retries on a fixed interval up to a fixed attempt budget.
//! It never decides that a run failed; an exhausted budget only means
//! the report was not there yet.

use crate::api;
use crate::model::Report;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 120;

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    Completed(Box<Report>),
    TimedOut { attempts: u32 },
}

/// Poll until `fetch` yields a report, the attempt budget runs out, or
/// `cancel` fires. Returns `None` only on cancellation. The first
/// attempt runs immediately; the interval sleeps sit between attempts.
pub async fn poll_report<F, Fut>(
    mut fetch: F,
    settings: PollSettings,
    cancel: CancellationToken,
) -> Option<PollOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = api::Result<Report>>,
{
    for attempt in 1..=settings.max_attempts {
        if attempt > 1 {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(settings.interval) => {}
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            result = fetch() => match result {
                Ok(report) => {
                    debug!(attempt, report = %report.id, "report ready");
                    return Some(PollOutcome::Completed(Box::new(report)));
                }
                Err(e) => debug!(attempt, "report not ready: {e}"),
            }
        }
    }
    Some(PollOutcome::TimedOut {
        attempts: settings.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn not_ready() -> api::ApiError {
        api::ApiError::Status {
            status: reqwest::StatusCode::NOT_FOUND,
            body: "report not ready".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_ready_on_fifth_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let fetch = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n >= 5 {
                    Ok(Report {
                        id: "r-1".to_string(),
                        ..Default::default()
                    })
                } else {
                    Err(not_ready())
                }
            }
        };

        let start = tokio::time::Instant::now();
        let outcome = poll_report(fetch, PollSettings::default(), CancellationToken::new()).await;

        match outcome {
            Some(PollOutcome::Completed(report)) => assert_eq!(report.id, "r-1"),
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_on_final_attempt_still_completes() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let settings = PollSettings {
            interval: Duration::from_secs(2),
            max_attempts: 3,
        };
        let fetch = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 3 {
                    Ok(Report::default())
                } else {
                    Err(not_ready())
                }
            }
        };

        let outcome = poll_report(fetch, settings, CancellationToken::new()).await;

        assert!(matches!(outcome, Some(PollOutcome::Completed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted_reports_timeout() {
        let fetch = || async { Err(not_ready()) };

        let start = tokio::time::Instant::now();
        let outcome = poll_report(fetch, PollSettings::default(), CancellationToken::new()).await;

        match outcome {
            Some(PollOutcome::TimedOut { attempts }) => assert_eq!(attempts, 120),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(238));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            poll_report(|| async { Err(not_ready()) }, PollSettings::default(), token).await
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        assert!(handle.await.unwrap().is_none());
    }
}
