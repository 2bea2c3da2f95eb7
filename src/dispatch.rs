//! Parallel fan-out of plan todos to independent sub-workers.
//!
//! Each request gets its own task, permit and timeout. A failing, panicking or
//! slow sub-worker becomes a blocked result; it never takes siblings down.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::findings::{Finding, Todo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubworkerRequest {
    pub todo_id: String,
    pub title: String,
    pub scope: String,
    pub risk_category: String,
    pub acceptance_criteria: Vec<String>,
}

impl From<&Todo> for SubworkerRequest {
    fn from(todo: &Todo) -> Self {
        Self {
            todo_id: todo.id.clone(),
            title: todo.title.clone(),
            scope: todo.scope.clone(),
            risk_category: todo.risk_category.clone(),
            acceptance_criteria: todo.acceptance_criteria.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubworkerStatus {
    Done,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubworkerResult {
    pub todo_id: String,
    pub status: SubworkerStatus,
    pub findings: Vec<Finding>,
    pub error: Option<String>,
}

impl SubworkerResult {
    pub fn done(todo_id: impl Into<String>, findings: Vec<Finding>) -> Self {
        Self {
            todo_id: todo_id.into(),
            status: SubworkerStatus::Done,
            findings,
            error: None,
        }
    }

    pub fn blocked(todo_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            todo_id: todo_id.into(),
            status: SubworkerStatus::Blocked,
            findings: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Works one todo to completion.
pub trait Subworker: Send + Sync + 'static {
    fn run(&self, request: SubworkerRequest) -> impl Future<Output = Result<Vec<Finding>>> + Send;
}

/// Run every request, at most `max_concurrency` at a time. Returns exactly one
/// result per request, in request order.
pub async fn dispatch<W: Subworker>(
    worker: Arc<W>,
    requests: Vec<SubworkerRequest>,
    max_concurrency: usize,
    timeout: Duration,
) -> Vec<SubworkerResult> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut join_set = tokio::task::JoinSet::new();
    let mut task_slots: HashMap<tokio::task::Id, usize> = HashMap::new();
    let mut results: Vec<Option<SubworkerResult>> = vec![None; requests.len()];

    for (slot, request) in requests.iter().cloned().enumerate() {
        let worker = Arc::clone(&worker);
        let semaphore = Arc::clone(&semaphore);
        let abort_handle = join_set.spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("dispatch semaphore closed unexpectedly");
            let todo_id = request.todo_id.clone();
            info!(todo_id = %todo_id, "sub-worker started");
            let result = match tokio::time::timeout(timeout, worker.run(request)).await {
                Ok(Ok(findings)) => {
                    info!(todo_id = %todo_id, findings = findings.len(), "sub-worker done");
                    SubworkerResult::done(todo_id, findings)
                }
                Ok(Err(e)) => {
                    warn!(todo_id = %todo_id, error = %e, "sub-worker blocked");
                    SubworkerResult::blocked(todo_id, e.to_string())
                }
                Err(_) => {
                    warn!(todo_id = %todo_id, ?timeout, "sub-worker timed out");
                    SubworkerResult::blocked(todo_id, Error::Timeout(timeout).to_string())
                }
            };
            (slot, result)
        });
        task_slots.insert(abort_handle.id(), slot);
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((slot, result)) => results[slot] = Some(result),
            Err(e) => {
                let Some(slot) = task_slots.remove(&e.id()) else {
                    warn!(error = %e, "sub-worker task failed (unknown slot)");
                    continue;
                };
                let todo_id = &requests[slot].todo_id;
                let message = join_failure_message(e);
                warn!(todo_id = %todo_id, error = %message, "sub-worker task failed");
                results[slot] = Some(SubworkerResult::blocked(todo_id.clone(), message));
            }
        }
    }

    results
        .into_iter()
        .zip(&requests)
        .map(|(result, request)| {
            result.unwrap_or_else(|| {
                SubworkerResult::blocked(request.todo_id.clone(), "sub-worker produced no result")
            })
        })
        .collect()
}

fn join_failure_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return format!("sub-worker task cancelled: {err}");
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("sub-worker panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::Severity;
    use crate::test_helpers::{make_finding, make_request};

    struct EchoWorker;

    impl Subworker for EchoWorker {
        async fn run(&self, request: SubworkerRequest) -> Result<Vec<Finding>> {
            match request.todo_id.as_str() {
                "fail" => Err(Error::Subworker("stopped_budget: out of iterations".to_string())),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Vec::new())
                }
                id => Ok(vec![make_finding(id, &request.title, Severity::Warning)]),
            }
        }
    }

    #[test]
    fn test_request_from_todo() {
        let todo = Todo {
            id: "t1".to_string(),
            title: "Check auth".to_string(),
            scope: "src/auth.rs".to_string(),
            risk_category: "security".to_string(),
            priority: 1,
            acceptance_criteria: vec!["tokens validated".to_string()],
            evidence_required: vec![],
        };
        let request = SubworkerRequest::from(&todo);
        assert_eq!(request.todo_id, "t1");
        assert_eq!(request.risk_category, "security");
        assert_eq!(request.acceptance_criteria, vec!["tokens validated"]);
    }

    #[tokio::test]
    async fn test_results_in_request_order() {
        let requests = vec![make_request("b"), make_request("a"), make_request("c")];
        let results = dispatch(Arc::new(EchoWorker), requests, 2, Duration::from_secs(5)).await;
        let ids: Vec<&str> = results.iter().map(|r| r.todo_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert!(results.iter().all(|r| r.status == SubworkerStatus::Done));
    }

    #[tokio::test]
    async fn test_error_becomes_blocked() {
        let results = dispatch(
            Arc::new(EchoWorker),
            vec![make_request("ok"), make_request("fail")],
            4,
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(results[0].status, SubworkerStatus::Done);
        assert_eq!(results[1].status, SubworkerStatus::Blocked);
        assert!(results[1].error.as_deref().unwrap().contains("stopped_budget"));
        assert!(results[1].findings.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_becomes_blocked() {
        let results = dispatch(
            Arc::new(EchoWorker),
            vec![make_request("slow"), make_request("quick")],
            4,
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(results[0].status, SubworkerStatus::Blocked);
        assert!(results[0].error.as_deref().unwrap().starts_with("timed out after"));
        assert_eq!(results[1].status, SubworkerStatus::Done);
    }

    #[tokio::test]
    async fn test_empty_request_list() {
        let results = dispatch(Arc::new(EchoWorker), Vec::new(), 4, Duration::from_secs(1)).await;
        assert!(results.is_empty());
    }
}
