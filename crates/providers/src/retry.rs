//! Retry/backoff policy shared by every adapter (§4.2 Retry policy).
//!
//! Connection and parse errors, 5xx, and 429 are retried; any other 4xx
//! fails immediately. Backoff is 15s/30s/60s then holds at 60s, each plus
//! uniform jitter in `[0, 1s)`. Ten attempts is a hard cap; cancellation
//! aborts between attempts and mid-request.

use std::future::Future;
use std::time::Duration;

use ac_domain::error::{Error, Result};
use tokio_util::sync::CancellationToken;

pub const MAX_ATTEMPTS: u32 = 10;

fn backoff_for_attempt(attempt: u32) -> Duration {
    let base_secs = match attempt {
        1 => 15,
        2 => 30,
        _ => 60,
    };
    let jitter_ms = rand::random::<u64>() % 1000;
    Duration::from_secs(base_secs) + Duration::from_millis(jitter_ms)
}

/// Whether an error is worth retrying, per §4.2's HTTP status rules.
/// `status` is `None` for connection/parse errors, which are always
/// retried.
pub fn is_retryable(status: Option<u16>) -> bool {
    match status {
        None => true,
        Some(s) => s == 429 || (500..600).contains(&s),
    }
}

/// Run `attempt_fn` until it succeeds, exhausts [`MAX_ATTEMPTS`], hits a
/// non-retryable error, or the context is cancelled. `attempt_fn` returns
/// `Err((error, status))`, where `status` is the HTTP status code if the
/// failure came from a non-2xx response (used to decide retryability).
pub async fn with_retry<T, F, Fut>(
    ctx: &CancellationToken,
    provider: &str,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, (Error, Option<u16>)>>,
{
    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        if ctx.is_cancelled() {
            return Err(Error::Other(format!(
                "{provider}: cancelled before attempt {attempt}"
            )));
        }

        let outcome = tokio::select! {
            _ = ctx.cancelled() => {
                return Err(Error::Other(format!("{provider}: cancelled during attempt {attempt}")));
            }
            outcome = attempt_fn(attempt) => outcome,
        };

        match outcome {
            Ok(usage) => return Ok(usage),
            Err((err, status)) => {
                if !is_retryable(status) {
                    return Err(err);
                }
                ac_domain::trace::TraceEvent::ProviderRetry {
                    provider: provider.to_owned(),
                    attempt,
                    backoff_ms: 0,
                    reason: err.to_string(),
                }
                .emit();
                last_err = Some(err);
                if attempt == MAX_ATTEMPTS {
                    break;
                }
                let backoff = backoff_for_attempt(attempt);
                tokio::select! {
                    _ = ctx.cancelled() => {
                        return Err(Error::Other(format!("{provider}: cancelled during backoff")));
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Provider {
        provider: provider.to_owned(),
        message: "retry attempts exhausted".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_always_retryable() {
        assert!(is_retryable(None));
    }

    #[test]
    fn server_errors_and_429_are_retryable() {
        assert!(is_retryable(Some(500)));
        assert!(is_retryable(Some(503)));
        assert!(is_retryable(Some(429)));
    }

    #[test]
    fn other_4xx_are_not_retryable() {
        assert!(!is_retryable(Some(400)));
        assert!(!is_retryable(Some(401)));
        assert!(!is_retryable(Some(404)));
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_retrying() {
        let ctx = CancellationToken::new();
        let mut calls = 0;
        let result = with_retry(&ctx, "test", |_attempt| {
            calls += 1;
            async { Ok(ac_domain::message::Usage::default()) }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let ctx = CancellationToken::new();
        let mut calls = 0;
        let result = with_retry(&ctx, "test", |_attempt| {
            calls += 1;
            async {
                Err((
                    Error::Provider {
                        provider: "test".into(),
                        message: "bad request".into(),
                    },
                    Some(400),
                ))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_error_eventually_succeeds() {
        let ctx = CancellationToken::new();
        let mut calls = 0;
        let fut = with_retry(&ctx, "test", |attempt| {
            calls += 1;
            async move {
                if attempt < 3 {
                    Err((
                        Error::Provider {
                            provider: "test".into(),
                            message: "server error".into(),
                        },
                        Some(503),
                    ))
                } else {
                    Ok(ac_domain::message::Usage::default())
                }
            }
        });
        tokio::time::timeout(Duration::from_secs(200), fut)
            .await
            .expect("should resolve within the paused clock budget")
            .unwrap();
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn cancellation_aborts_between_attempts() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let result = with_retry(&ctx, "test", |_attempt| async {
            Err((
                Error::Provider {
                    provider: "test".into(),
                    message: "server error".into(),
                },
                Some(503),
            ))
        })
        .await;
        assert!(result.is_err());
    }
}
