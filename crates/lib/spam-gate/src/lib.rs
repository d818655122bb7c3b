//! Spam gating for inbound messages.

/// Outcome of a spam check.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Verdict {
    /// The message may be processed.
    Pass,

    /// The message is rejected as spam.
    Reject(Reason),
}

/// Why a message was rejected.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Reason {
    /// A configured auto-reply header is present.
    AutoHeader(String),

    /// The author created too many issues within the look-back window.
    TooManyIssues {
        /// Issues counted within the window.
        count: u64,

        /// Configured maximum.
        max: u64,
    },
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutoHeader(header) => write!(f, "auto-reply header {header} present"),
            Self::TooManyIssues { count, max } => {
                write!(f, "{count} issues within the window (max {max})")
            }
        }
    }
}

/// Run the spam gate for an author.
///
/// Checks short-circuit in order: exempt authors pass without any query;
/// a configured spam header rejects; otherwise the recent-issue count is
/// fetched through `count_recent_issues` and compared against the limit.
/// A failing count query passes the message — the gate fails open.
pub async fn check<CountFut, CountErr>(
    policy: &config_core::SpamConfig,
    person_id: &str,
    headers: &[(String, String)],
    count_recent_issues: impl FnOnce() -> CountFut,
) -> Verdict
where
    CountFut: std::future::Future<Output = Result<u64, CountErr>>,
    CountErr: std::fmt::Display,
{
    if policy
        .exempt_authors
        .iter()
        .any(|exempt| exempt == person_id)
    {
        return Verdict::Pass;
    }

    for header in &policy.headers {
        let present = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(header));
        if present {
            return Verdict::Reject(Reason::AutoHeader(header.clone()));
        }
    }

    match count_recent_issues().await {
        Ok(count) if count > policy.max_issues => Verdict::Reject(Reason::TooManyIssues {
            count,
            max: policy.max_issues,
        }),
        Ok(_) => Verdict::Pass,
        Err(err) => {
            tracing::error!(
                person_id = %person_id,
                error = %err,
                "spam count query failed, passing the message through"
            );
            Verdict::Pass
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};

    /// Count query failure used by the fail-open test.
    #[derive(Debug, thiserror::Error)]
    #[error("count query unavailable")]
    struct CountUnavailable;

    fn policy() -> config_core::SpamConfig {
        config_core::SpamConfig {
            time_span_mins: 60,
            max_issues: 5,
            headers: vec!["Auto-Submitted".to_string()],
            exempt_authors: vec!["PRS000000000001".to_string()],
        }
    }

    fn no_headers() -> Vec<(String, String)> {
        Vec::new()
    }

    #[tokio::test]
    async fn exempt_author_passes_without_count_query() {
        let queried = AtomicBool::new(false);

        let verdict = check(&policy(), "PRS000000000001", &no_headers(), || {
            queried.store(true, Ordering::SeqCst);
            async { Ok::<u64, CountUnavailable>(100) }
        })
        .await;

        assert_eq!(verdict, Verdict::Pass);
        assert!(!queried.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn auto_header_rejects_without_count_query() {
        let queried = AtomicBool::new(false);
        let headers = vec![(
            "auto-submitted".to_string(),
            "auto-generated".to_string(),
        )];

        let verdict = check(&policy(), "PRS000000000042", &headers, || {
            queried.store(true, Ordering::SeqCst);
            async { Ok::<u64, CountUnavailable>(0) }
        })
        .await;

        assert_eq!(
            verdict,
            Verdict::Reject(Reason::AutoHeader("Auto-Submitted".to_string()))
        );
        assert!(!queried.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn count_over_limit_rejects() {
        let verdict = check(&policy(), "PRS000000000042", &no_headers(), || async {
            Ok::<u64, CountUnavailable>(7)
        })
        .await;

        assert_eq!(
            verdict,
            Verdict::Reject(Reason::TooManyIssues { count: 7, max: 5 })
        );
    }

    #[tokio::test]
    async fn count_at_limit_passes() {
        let verdict = check(&policy(), "PRS000000000042", &no_headers(), || async {
            Ok::<u64, CountUnavailable>(5)
        })
        .await;

        assert_eq!(verdict, Verdict::Pass);
    }

    #[tokio::test]
    async fn failing_count_query_fails_open() {
        let verdict = check(&policy(), "PRS000000000042", &no_headers(), || async {
            Err::<u64, _>(CountUnavailable)
        })
        .await;

        assert_eq!(verdict, Verdict::Pass);
    }
}
