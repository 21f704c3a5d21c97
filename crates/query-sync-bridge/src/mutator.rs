//! Optimistic local mutations.

use crate::{Query, QueryCache, SyncError, SyncResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one optimistic mutation.
#[derive(Debug)]
pub enum MutationOutcome {
    /// The control plane accepted it; the speculative value stays until the
    /// next re-fetch.
    Committed,
    /// Rejected; this call's snapshot was restored.
    RolledBack(SyncError),
    /// Rejected, but a newer write owns the entry, so nothing was restored.
    Superseded(SyncError),
}

impl MutationOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, MutationOutcome::Committed)
    }
}

/// Applies speculative writes to a [`QueryCache`].
///
/// The snapshot is taken per call, so overlapping mutations on one entry
/// each roll back to the state they replaced, and only while their own
/// write is still the latest.
#[derive(Clone)]
pub struct OptimisticMutator {
    cache: Arc<QueryCache>,
}

impl OptimisticMutator {
    pub fn new(cache: Arc<QueryCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Write `update(current)` to `query` now, then await `request`.
    ///
    /// Failures are not retried. Either way the entry is marked stale once
    /// the request settles so the next read reconciles with the server.
    pub async fn apply<F, Fut, T>(&self, query: &Query, update: F, request: Fut) -> MutationOutcome
    where
        F: FnOnce(Option<&Value>) -> Value,
        Fut: Future<Output = SyncResult<T>>,
    {
        let (snapshot, written) = self.cache.replace_with(query, update);

        let outcome = match request.await {
            Ok(_) => MutationOutcome::Committed,
            Err(e) => {
                if self.cache.restore_if(query, written, snapshot) {
                    warn!(query = %query, error = %e, "Mutation rejected, rolled back");
                    MutationOutcome::RolledBack(e)
                } else {
                    warn!(query = %query, error = %e, "Mutation rejected after a newer write");
                    MutationOutcome::Superseded(e)
                }
            }
        };

        self.cache.invalidate(query);
        outcome
    }
}

/// Kanban column of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Archived,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::Done,
        TaskStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| SyncError::InvalidStatus(s.to_string()))
    }
}

/// Sends a task status change to the control plane.
#[async_trait]
pub trait TaskStatusUpdater: Send + Sync {
    async fn update_task_status(&self, task_id: i64, status: TaskStatus) -> SyncResult<Value>;
}

/// Board view of one project's tasks.
pub struct TaskBoard {
    mutator: OptimisticMutator,
    updater: Arc<dyn TaskStatusUpdater>,
}

impl TaskBoard {
    pub fn new(cache: Arc<QueryCache>, updater: Arc<dyn TaskStatusUpdater>) -> Self {
        Self {
            mutator: OptimisticMutator::new(cache),
            updater,
        }
    }

    /// Move a task to another column.
    ///
    /// The cached task list of `project_id` shows the new status before the
    /// request is sent.
    pub async fn move_task(
        &self,
        project_id: i64,
        task_id: i64,
        status: TaskStatus,
    ) -> MutationOutcome {
        let query = Query::Tasks {
            project_id: Some(project_id),
        };

        let outcome = self
            .mutator
            .apply(
                &query,
                |tasks| with_status(tasks, task_id, status),
                self.updater.update_task_status(task_id, status),
            )
            .await;

        info!(
            project_id = project_id,
            task_id = task_id,
            status = %status,
            committed = outcome.is_committed(),
            "Task move settled"
        );
        outcome
    }
}

/// Copy of a task list with one task's status replaced. A missing or
/// non-array list becomes empty.
fn with_status(tasks: Option<&Value>, task_id: i64, status: TaskStatus) -> Value {
    let Some(Value::Array(tasks)) = tasks else {
        return Value::Array(Vec::new());
    };

    let tasks = tasks
        .iter()
        .map(|task| {
            let mut task = task.clone();
            if task.get("id").and_then(Value::as_i64) == Some(task_id) {
                if let Some(fields) = task.as_object_mut() {
                    fields.insert("status".into(), Value::String(status.as_str().into()));
                }
            }
            task
        })
        .collect();
    Value::Array(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::oneshot;

    fn rejected() -> SyncError {
        SyncError::Rejected {
            status: 500,
            body: "boom".into(),
        }
    }

    fn board_query() -> Query {
        Query::Tasks { project_id: Some(7) }
    }

    fn s0() -> Value {
        json!([
            {"id": 1, "title": "write parser", "status": "todo"},
            {"id": 2, "title": "ship", "status": "in_progress"}
        ])
    }

    /// Updater whose responses are released by the test.
    struct GatedUpdater {
        gates: parking_lot::Mutex<Vec<oneshot::Receiver<SyncResult<Value>>>>,
    }

    impl GatedUpdater {
        fn new() -> (Arc<Self>, Vec<oneshot::Sender<SyncResult<Value>>>) {
            let mut senders = Vec::new();
            let mut receivers = Vec::new();
            for _ in 0..4 {
                let (tx, rx) = oneshot::channel();
                senders.push(tx);
                receivers.push(rx);
            }
            receivers.reverse();
            (
                Arc::new(Self {
                    gates: parking_lot::Mutex::new(receivers),
                }),
                senders,
            )
        }
    }

    #[async_trait]
    impl TaskStatusUpdater for GatedUpdater {
        async fn update_task_status(&self, _task_id: i64, _status: TaskStatus) -> SyncResult<Value> {
            let gate = self.gates.lock().pop().unwrap();
            gate.await.unwrap()
        }
    }

    #[test]
    fn test_task_status_names() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                Value::String(status.to_string())
            );
        }
        assert!(matches!(
            "blocked".parse::<TaskStatus>(),
            Err(SyncError::InvalidStatus(s)) if s == "blocked"
        ));
    }

    #[test]
    fn test_with_status_replaces_only_matching_task() {
        let moved = with_status(Some(&s0()), 1, TaskStatus::Done);
        assert_eq!(moved[0]["status"], "done");
        assert_eq!(moved[0]["title"], "write parser");
        assert_eq!(moved[1]["status"], "in_progress");

        assert_eq!(with_status(None, 1, TaskStatus::Done), json!([]));
        assert_eq!(with_status(Some(&json!({"id": 1})), 1, TaskStatus::Done), json!([]));
    }

    #[tokio::test]
    async fn test_failed_mutation_restores_exact_snapshot() {
        let cache = Arc::new(QueryCache::new());
        cache.set(board_query(), s0());
        let mutator = OptimisticMutator::new(cache.clone());

        let outcome = mutator
            .apply(
                &board_query(),
                |tasks| with_status(tasks, 1, TaskStatus::Done),
                async { Err::<Value, _>(rejected()) },
            )
            .await;

        assert!(matches!(outcome, MutationOutcome::RolledBack(_)));
        let entry = cache.get(&board_query()).unwrap();
        assert_eq!(entry.value, s0());
        assert!(entry.stale);
    }

    #[tokio::test]
    async fn test_successful_mutation_keeps_speculative_state() {
        let cache = Arc::new(QueryCache::new());
        cache.set(board_query(), s0());
        let mutator = OptimisticMutator::new(cache.clone());

        let outcome = mutator
            .apply(
                &board_query(),
                |tasks| with_status(tasks, 2, TaskStatus::Done),
                async { Ok::<_, SyncError>(json!({"id": 2, "status": "done"})) },
            )
            .await;

        assert!(outcome.is_committed());
        let entry = cache.get(&board_query()).unwrap();
        assert_eq!(entry.value[1]["status"], "done");
        assert!(entry.stale);
    }

    #[tokio::test]
    async fn test_speculative_state_visible_before_response() {
        let cache = Arc::new(QueryCache::new());
        cache.set(board_query(), s0());
        let (updater, mut gates) = GatedUpdater::new();
        let board = Arc::new(TaskBoard::new(cache.clone(), updater));

        let task = {
            let board = board.clone();
            tokio::spawn(async move { board.move_task(7, 1, TaskStatus::Archived).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(cache.get(&board_query()).unwrap().value[0]["status"], "archived");

        gates.remove(0).send(Err(rejected())).unwrap();
        assert!(matches!(task.await.unwrap(), MutationOutcome::RolledBack(_)));
        assert_eq!(cache.get(&board_query()).unwrap().value, s0());
    }

    #[tokio::test]
    async fn test_overlapping_mutations_roll_back_per_call() {
        let cache = Arc::new(QueryCache::new());
        cache.set(board_query(), s0());
        let (updater, mut gates) = GatedUpdater::new();
        let board = Arc::new(TaskBoard::new(cache.clone(), updater));

        // First move: task 1 to done (snapshot S0).
        let first = {
            let board = board.clone();
            tokio::spawn(async move { board.move_task(7, 1, TaskStatus::Done).await })
        };
        tokio::task::yield_now().await;

        // Second move on the same task before the first resolves (snapshot S1).
        let second = {
            let board = board.clone();
            tokio::spawn(async move { board.move_task(7, 1, TaskStatus::Archived).await })
        };
        tokio::task::yield_now().await;
        let s2 = cache.get(&board_query()).unwrap().value;
        assert_eq!(s2[0]["status"], "archived");

        // The first fails: its S0 snapshot must not clobber the newer write.
        gates.remove(0).send(Err(rejected())).unwrap();
        assert!(matches!(first.await.unwrap(), MutationOutcome::Superseded(_)));
        assert_eq!(cache.get(&board_query()).unwrap().value, s2);

        // The second succeeds and its state stands.
        gates.remove(0).send(Ok(json!({}))).unwrap();
        assert!(second.await.unwrap().is_committed());
        assert_eq!(cache.get(&board_query()).unwrap().value, s2);
    }

    #[tokio::test]
    async fn test_second_failure_restores_immediately_prior_state() {
        let cache = Arc::new(QueryCache::new());
        cache.set(board_query(), s0());
        let (updater, mut gates) = GatedUpdater::new();
        let board = Arc::new(TaskBoard::new(cache.clone(), updater));

        let first = {
            let board = board.clone();
            tokio::spawn(async move { board.move_task(7, 1, TaskStatus::Done).await })
        };
        tokio::task::yield_now().await;
        let s1 = cache.get(&board_query()).unwrap().value;

        let second = {
            let board = board.clone();
            tokio::spawn(async move { board.move_task(7, 2, TaskStatus::Todo).await })
        };
        tokio::task::yield_now().await;

        gates.remove(0).send(Ok(json!({}))).unwrap();
        assert!(first.await.unwrap().is_committed());

        gates.remove(0).send(Err(rejected())).unwrap();
        assert!(matches!(second.await.unwrap(), MutationOutcome::RolledBack(_)));
        assert_eq!(cache.get(&board_query()).unwrap().value, s1);
    }

    #[tokio::test]
    async fn test_refetch_during_mutation_wins_over_rollback() {
        let cache = Arc::new(QueryCache::new());
        cache.set(board_query(), s0());
        let (updater, mut gates) = GatedUpdater::new();
        let board = Arc::new(TaskBoard::new(cache.clone(), updater));

        let task = {
            let board = board.clone();
            tokio::spawn(async move { board.move_task(7, 1, TaskStatus::Done).await })
        };
        tokio::task::yield_now().await;

        let server = json!([{"id": 1, "status": "in_progress"}]);
        cache.set(board_query(), server.clone());

        gates.remove(0).send(Err(rejected())).unwrap();
        assert!(matches!(task.await.unwrap(), MutationOutcome::Superseded(_)));
        assert_eq!(cache.get(&board_query()).unwrap().value, server);
    }
}
