//! Segment runner.
//!
//! Runs a job's segments in waves no wider than the live parallel-chunk
//! limit, retries a failed segment once, and returns results keyed by
//! segment position regardless of completion order.

use std::future::Future;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{debug, warn};

use super::processors::ProcessorContext;
use super::progress::ProgressReporter;
use super::segment::Segment;
use crate::policy::ResourceDecision;
use crate::{Error, Result};

/// Process `segments` with `work` and return one result per segment, in
/// segment order.
///
/// The resource budget is consulted before every wave, so a job may narrow
/// its parallelism while running but never exceed its admission snapshot.
/// Cancellation is observed only between segments. Progress is reported
/// through `progress` after each segment finishes.
pub async fn run_segments<T, F, Fut>(
    ctx: &ProcessorContext,
    segments: &[Segment],
    progress: &ProgressReporter,
    work: F,
) -> Result<Vec<T>>
where
    F: Fn(Segment, ResourceDecision) -> Fut + Sync,
    Fut: Future<Output = Result<T>> + Send,
    T: Send,
{
    let total = segments.len();
    let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
    let mut done = 0;
    let mut next = 0;

    while next < total {
        if ctx.cancel.is_cancelled() {
            debug!(job_id = %ctx.job_id, done, total, "Cancellation observed at segment boundary");
            return Err(Error::Cancelled);
        }

        let decision = ctx.budget.current().await;
        let width = decision.parallel_chunks.max(1).min(total - next);
        debug!(
            job_id = %ctx.job_id,
            first = next,
            width,
            tier = %decision.quality_tier,
            "Starting segment wave"
        );

        let mut running: FuturesUnordered<_> = (next..next + width)
            .map(|position| {
                let segment = segments[position];
                let decision = decision.clone();
                let work = &work;
                let job_id = ctx.job_id.as_str();
                async move {
                    let outcome = run_with_retry(job_id, segment, decision, work).await;
                    (position, outcome)
                }
            })
            .collect();
        next += width;

        while let Some((position, outcome)) = running.next().await {
            results[position] = Some(outcome?);
            done += 1;
            progress
                .report(done, total, Some(format!("Segment {done}/{total} done")))
                .await;
        }
    }

    results
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| Error::Other(format!("segment {index} produced no result")))
        })
        .collect()
}

/// Run one segment, retrying a recoverable failure once with the same input.
async fn run_with_retry<T, F, Fut>(
    job_id: &str,
    segment: Segment,
    decision: ResourceDecision,
    work: &F,
) -> Result<T>
where
    F: Fn(Segment, ResourceDecision) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match work(segment, decision.clone()).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_recoverable() => {
            warn!(job_id, segment = segment.index, error = %e, "Segment failed, retrying once");
            work(segment, decision).await.map_err(|retry| {
                if retry.is_recoverable() {
                    Error::SegmentProcessing {
                        index: segment.index,
                        message: retry.to_string(),
                    }
                } else {
                    retry
                }
            })
        }
        Err(e) => Err(e),
    }
}
