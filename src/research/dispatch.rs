//! Fan-out / fan-in of independent units of work.
//!
//! Every round and the resolution pass go through [`fan_out`]: each unit runs
//! as its own task with its own timeout, a semaphore bounds concurrency, and
//! the batch as a whole is bounded by a deadline. Whatever finishes is kept;
//! whatever does not becomes a failure with a reason. Results come back in
//! input order so they stay attributable to their unit.
//!
//! [`coordinated_fan_out`] adds the coordinating exchange in front: the model
//! is asked to call `analyze_agent` once per pending unit, each acknowledgement
//! starts that unit, and only acknowledgements flow back into the exchange.

use crate::llm::{prompts, Reasoner, ToolDefinition};
use crate::types::{AppError, Result, Round};
use futures::future::BoxFuture;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const ANALYZE_TOOL: &str = "analyze_agent";

/// A labelled unit of work.
pub type Unit<T> = (String, BoxFuture<'static, Result<T>>);

#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    pub max_concurrency: usize,
    pub unit_timeout: Duration,
    pub batch_timeout: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            unit_timeout: Duration::from_secs(180),
            batch_timeout: Duration::from_secs(600),
        }
    }
}

/// Partial result set of one batch.
#[derive(Debug)]
pub struct Dispatched<T> {
    /// Completed units, in input order
    pub successes: Vec<(String, T)>,
    /// Failed, timed-out or abandoned units with a reason, in input order
    pub failures: Vec<(String, String)>,
    /// True when the batch was cut short by cancellation
    pub cancelled: bool,
}

impl<T> Default for Dispatched<T> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
            cancelled: false,
        }
    }
}

enum Next<T> {
    Joined(Option<std::result::Result<(usize, Result<T>), tokio::task::JoinError>>),
    Deadline,
    Cancelled,
}

type Slots<T> = Vec<Option<Result<T>>>;

/// Units of one batch: spawned tasks plus a result slot per input position.
struct Batch<T> {
    labels: Vec<String>,
    set: JoinSet<(usize, Result<T>)>,
    semaphore: Arc<Semaphore>,
    unit_timeout: Duration,
}

impl<T: Send + 'static> Batch<T> {
    fn new(labels: Vec<String>, policy: &DispatchPolicy) -> Self {
        Self {
            labels,
            set: JoinSet::new(),
            semaphore: Arc::new(Semaphore::new(policy.max_concurrency.max(1))),
            unit_timeout: policy.unit_timeout,
        }
    }

    fn spawn(&mut self, i: usize, future: BoxFuture<'static, Result<T>>) {
        let semaphore = self.semaphore.clone();
        let unit_timeout = self.unit_timeout;
        self.set.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => match tokio::time::timeout(unit_timeout, future).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Timeout(format!(
                        "no result within {:?}",
                        unit_timeout
                    ))),
                },
                Err(e) => Err(AppError::Internal(format!("dispatch semaphore closed: {}", e))),
            };
            (i, result)
        });
    }

    /// Joins spawned tasks until all finish, the deadline passes or the token
    /// fires. `unstarted` names the reason for slots that never got a task.
    async fn collect(
        mut self,
        started: &[bool],
        deadline: Instant,
        cancel: &CancellationToken,
        unstarted: &str,
    ) -> Dispatched<T> {
        let mut results: Slots<T> = self.labels.iter().map(|_| None).collect();
        let mut abandoned: Option<&'static str> = None;
        let mut cancelled = cancel.is_cancelled();
        if cancelled {
            abandoned = Some("cancelled");
        }

        while !cancelled {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Next::Cancelled,
                joined = tokio::time::timeout_at(deadline, self.set.join_next()) => match joined {
                    Ok(joined) => Next::Joined(joined),
                    Err(_) => Next::Deadline,
                },
            };

            match next {
                Next::Joined(None) => break,
                Next::Joined(Some(Ok((i, result)))) => results[i] = Some(result),
                Next::Joined(Some(Err(e))) => {
                    tracing::error!(error = %e, "Dispatched task panicked or was aborted");
                }
                Next::Deadline => {
                    tracing::warn!("Batch deadline reached, abandoning unfinished units");
                    abandoned = Some("abandoned at batch deadline");
                    break;
                }
                Next::Cancelled => {
                    abandoned = Some("cancelled");
                    cancelled = true;
                }
            }
        }
        self.set.abort_all();

        let mut dispatched = Dispatched {
            cancelled,
            ..Default::default()
        };
        for (i, (label, result)) in self.labels.into_iter().zip(results).enumerate() {
            match result {
                Some(Ok(value)) => dispatched.successes.push((label, value)),
                Some(Err(e)) => {
                    tracing::warn!(unit = %label, error = %e, "Unit failed");
                    dispatched.failures.push((label, e.to_string()));
                }
                None if !started[i] && !cancelled => {
                    dispatched.failures.push((label, unstarted.to_string()))
                }
                None => dispatched.failures.push((
                    label,
                    abandoned.unwrap_or("task panicked").to_string(),
                )),
            }
        }
        dispatched
    }
}

/// Runs every unit concurrently and collects whatever completes.
pub async fn fan_out<T>(
    units: Vec<Unit<T>>,
    policy: &DispatchPolicy,
    cancel: &CancellationToken,
) -> Dispatched<T>
where
    T: Send + 'static,
{
    let deadline = Instant::now() + policy.batch_timeout;
    let (labels, bodies): (Vec<String>, Vec<_>) = units.into_iter().unzip();
    let mut batch = Batch::new(labels, policy);
    for (i, future) in bodies.into_iter().enumerate() {
        batch.spawn(i, future);
    }
    let started = vec![true; batch.labels.len()];
    batch
        .collect(&started, deadline, cancel, "abandoned at batch deadline")
        .await
}

/// Tool offered to the coordinating exchange, restricted to pending names.
pub fn analyze_tool(pending: &[String]) -> ToolDefinition {
    ToolDefinition {
        name: ANALYZE_TOOL.to_string(),
        description: "Run one analyst's analysis for the current round. Returns an acknowledgement only."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "enum": pending,
                    "description": "Name of the analyst to run"
                }
            },
            "required": ["agent"]
        }),
    }
}

/// Coordinating realization of the same contract as [`fan_out`].
///
/// A unit starts only once the coordinator acknowledges it with an
/// `analyze_agent` call. The coordinating call is re-issued for the pending
/// set until every unit is acknowledged or the batch deadline passes; units
/// still pending at the deadline fail as unacknowledged.
///
/// A coordinator that acknowledges nothing new for `max_stalled_passes`
/// consecutive passes (a model without tool calling, typically) stops being
/// asked, and the pending units are dispatched directly.
pub async fn coordinated_fan_out<T>(
    reasoner: &Reasoner,
    problem: &str,
    round: Round,
    units: Vec<Unit<T>>,
    policy: &DispatchPolicy,
    max_stalled_passes: usize,
    cancel: &CancellationToken,
) -> Dispatched<T>
where
    T: Send + 'static,
{
    let deadline = Instant::now() + policy.batch_timeout;
    let (labels, bodies): (Vec<String>, Vec<_>) = units.into_iter().unzip();
    let mut bodies: Vec<Option<BoxFuture<'static, Result<T>>>> =
        bodies.into_iter().map(Some).collect();
    let mut batch = Batch::new(labels.clone(), policy);
    let mut started = vec![false; labels.len()];

    let mut pass = 0usize;
    let mut stalled = 0usize;
    let mut reached_deadline = false;

    while started.iter().any(|s| !s) && !cancel.is_cancelled() {
        if Instant::now() >= deadline {
            reached_deadline = true;
            break;
        }
        if stalled >= max_stalled_passes.max(1) {
            break;
        }
        pass += 1;

        let pending: Vec<String> = labels
            .iter()
            .zip(&started)
            .filter(|(_, s)| !**s)
            .map(|(l, _)| l.clone())
            .collect();
        let prompt = prompts::coordinator(problem, round, &pending);
        let tools = [analyze_tool(&pending)];

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = tokio::time::timeout_at(deadline, reasoner.coordinate(&prompt, &tools)) => r,
        };

        let response = match response {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(pass, error = %e, "Coordinating call failed");
                stalled += 1;
                continue;
            }
            Err(_) => {
                tracing::warn!(pass, "Coordinating exchange hit the batch deadline");
                reached_deadline = true;
                break;
            }
        };

        let mut newly = 0usize;
        for call in response.tool_calls.iter().filter(|c| c.name == ANALYZE_TOOL) {
            let Some(agent) = call.arguments.get("agent").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(i) = labels.iter().position(|l| l == agent) else {
                continue;
            };
            if let Some(future) = bodies[i].take() {
                batch.spawn(i, future);
                started[i] = true;
                newly += 1;
            }
        }
        stalled = if newly == 0 { stalled + 1 } else { 0 };
        tracing::info!(
            %round,
            pass,
            newly_acknowledged = newly,
            pending = started.iter().filter(|s| !**s).count(),
            "Coordination pass complete"
        );
    }

    if !reached_deadline && !cancel.is_cancelled() {
        let unacknowledged: Vec<&str> = labels
            .iter()
            .zip(&started)
            .filter(|(_, s)| !**s)
            .map(|(l, _)| l.as_str())
            .collect();
        if !unacknowledged.is_empty() {
            tracing::warn!(
                %round,
                ?unacknowledged,
                "Coordinator stopped acknowledging, dispatching the rest directly"
            );
        }
        for (i, slot) in bodies.iter_mut().enumerate() {
            if let Some(future) = slot.take() {
                batch.spawn(i, future);
                started[i] = true;
            }
        }
    }

    batch
        .collect(
            &started,
            deadline,
            cancel,
            "not acknowledged by the coordinator before the batch deadline",
        )
        .await
}
