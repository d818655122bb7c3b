//! Per-poll mailbox work: structure check, UNSEEN scan, dispatch, moves.

use futures::TryStreamExt as _;

pub mod utf7;

/// The mailbox hierarchy as reported by the server.
#[derive(Debug, Clone)]
pub struct MailboxTree {
    /// Decoded mailbox names.
    pub names: std::collections::HashSet<String>,

    /// Hierarchy delimiter.
    pub delimiter: String,
}

/// Fetch the mailbox hierarchy and its delimiter.
pub async fn fetch_mailbox_tree<T>(
    session: &mut async_imap::Session<T>,
) -> Result<MailboxTree, async_imap::error::Error>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + std::fmt::Debug,
{
    let names: Vec<async_imap::types::Name> = session
        .list(Some(""), Some("*"))
        .await?
        .try_collect()
        .await?;

    let mut delimiter = "/".to_string();
    let mut decoded = std::collections::HashSet::new();
    for name in &names {
        if let Some(found) = name.delimiter() {
            delimiter = found.to_string();
        }
        decoded.insert(utf7::decode(name.name()));
    }

    Ok(MailboxTree {
        names: decoded,
        delimiter,
    })
}

/// Routes split by the mailbox structure check.
#[derive(Debug)]
pub struct RoutePartition<'a> {
    /// Routes whose mailbox and both children exist, in configuration order.
    pub passed: Vec<&'a config_core::MailboxRoute>,

    /// Routes with a missing mailbox or child.
    pub failed: Vec<&'a config_core::MailboxRoute>,
}

/// Check each configured route against the server's hierarchy.
///
/// A route passes when its mailbox exists at the root and both the success
/// and failure children exist directly under it.
pub fn partition_routes<'a>(
    routes: &'a [config_core::MailboxRoute],
    tree: &MailboxTree,
) -> RoutePartition<'a> {
    let mut passed = Vec::new();
    let mut failed = Vec::new();

    for route in routes {
        let success_child = format!("{}{}{}", route.name, tree.delimiter, route.success);
        let failure_child = format!("{}{}{}", route.name, tree.delimiter, route.failure);

        let complete = tree.names.contains(&route.name)
            && tree.names.contains(&success_child)
            && tree.names.contains(&failure_child);

        if complete {
            passed.push(route);
        } else {
            failed.push(route);
        }
    }

    RoutePartition { passed, failed }
}

/// Counters for one processed mailbox.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ProcessSummary {
    /// Messages dispatched this poll.
    pub dispatched: usize,

    /// Messages moved to the success child.
    pub accepted: usize,

    /// Messages moved to the failure child.
    pub rejected: usize,
}

/// Run one full poll cycle over the configured routes.
///
/// Structure-check failures are logged and skipped; an empty pass list
/// fails the cycle without touching any mailbox. IMAP errors bubble up so
/// the supervisor can reconnect.
pub async fn poll_cycle<T, G>(
    session: &mut async_imap::Session<T>,
    routes: &[config_core::MailboxRoute],
    pipeline: &message_dispatch::Pipeline<G>,
    host: &str,
) -> Result<(), async_imap::error::Error>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + std::fmt::Debug,
    G: message_dispatch::TicketGateway,
{
    let tree = fetch_mailbox_tree(session).await?;
    let partition = partition_routes(routes, &tree);

    for route in &partition.failed {
        tracing::error!(
            imap_host = %host,
            imap_mailbox = %route.name,
            success_child = %route.success,
            failure_child = %route.failure,
            "mailbox or its children are missing, skipping"
        );
    }

    if partition.passed.is_empty() {
        tracing::error!(
            imap_host = %host,
            "no configured mailbox passed the structure check, skipping this poll"
        );
        return Ok(());
    }

    for route in partition.passed {
        let summary = process_mailbox(session, route, &tree.delimiter, pipeline, host).await?;
        tracing::info!(
            imap_host = %host,
            imap_mailbox = %route.name,
            dispatched = summary.dispatched,
            accepted = summary.accepted,
            rejected = summary.rejected,
            "mailbox poll finished"
        );
    }

    Ok(())
}

/// Process one mailbox: scan UNSEEN, dispatch each message in UID order,
/// and move every dispatched message to the success or failure child.
pub async fn process_mailbox<T, G>(
    session: &mut async_imap::Session<T>,
    route: &config_core::MailboxRoute,
    delimiter: &str,
    pipeline: &message_dispatch::Pipeline<G>,
    host: &str,
) -> Result<ProcessSummary, async_imap::error::Error>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + std::fmt::Debug,
    G: message_dispatch::TicketGateway,
{
    let mut summary = ProcessSummary::default();

    session.select(utf7::encode(&route.name)).await?;

    let unseen = session.uid_search("UNSEEN").await?;
    if unseen.is_empty() {
        return Ok(summary);
    }

    let mut uids: Vec<u32> = unseen.into_iter().collect();
    uids.sort_unstable();
    uids.truncate(pipeline.runtime().max_query_messages);

    // Prefetch headers and structure; this also marks the batch seen.
    let uid_set = uids
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let prefetched: Vec<async_imap::types::Fetch> = session
        .uid_fetch(&uid_set, "(UID BODY[HEADER] BODYSTRUCTURE)")
        .await?
        .try_collect()
        .await?;

    let mut ordered: Vec<u32> = prefetched.iter().filter_map(|fetch| fetch.uid).collect();
    ordered.sort_unstable();

    for uid in ordered {
        let outcome = fetch_and_dispatch(session, uid, pipeline, host).await?;

        summary.dispatched += 1;
        let child = match &outcome {
            message_dispatch::Outcome::Accepted => {
                summary.accepted += 1;
                &route.success
            }
            message_dispatch::Outcome::Rejected(_) => {
                summary.rejected += 1;
                &route.failure
            }
        };

        let destination = utf7::encode(&format!("{}{}{}", route.name, delimiter, child));
        match session.uid_mv(uid.to_string(), &destination).await {
            Ok(_) => {
                tracing::info!(
                    imap_host = %host,
                    imap_mailbox = %route.name,
                    uid,
                    outcome = %outcome,
                    child = %child,
                    "message settled"
                );
            }
            Err(err) => {
                // Best effort: the outcome stands even when the move fails.
                tracing::error!(
                    imap_host = %host,
                    imap_mailbox = %route.name,
                    uid,
                    outcome = %outcome,
                    error = %err,
                    "message move failed"
                );
            }
        }
    }

    Ok(summary)
}

/// Fetch the full body of one message and run it through the pipeline.
///
/// Unreadable messages settle as rejected; only IMAP errors bubble up.
async fn fetch_and_dispatch<T, G>(
    session: &mut async_imap::Session<T>,
    uid: u32,
    pipeline: &message_dispatch::Pipeline<G>,
    host: &str,
) -> Result<message_dispatch::Outcome, async_imap::error::Error>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + std::fmt::Debug,
    G: message_dispatch::TicketGateway,
{
    let fetches: Vec<async_imap::types::Fetch> = session
        .uid_fetch(uid.to_string(), "(UID BODY[])")
        .await?
        .try_collect()
        .await?;

    let raw = fetches
        .iter()
        .find(|fetch| fetch.uid == Some(uid))
        .and_then(|fetch| fetch.body());

    let Some(raw) = raw else {
        tracing::error!(imap_host = %host, uid, "full fetch returned no body");
        return Ok(message_dispatch::Outcome::Rejected(
            message_dispatch::Rejection::UnreadableMessage,
        ));
    };

    match message_parse::parse(uid, raw) {
        Ok(message) => Ok(pipeline.dispatch(&message).await),
        Err(err) => {
            tracing::error!(imap_host = %host, uid, error = %err, "message parse failed");
            Ok(message_dispatch::Outcome::Rejected(
                message_dispatch::Rejection::UnreadableMessage,
            ))
        }
    }
}
