//! Board commands.

use pm_config_and_utils::Config;
use query_sync_bridge::{
    ControlPlaneClient, MutationOutcome, Query, QueryCache, TaskBoard, TaskStatus,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Task count per column, in board order.
pub fn column_counts(tasks: &Value) -> Vec<(TaskStatus, usize)> {
    let tasks = tasks.as_array().map(Vec::as_slice).unwrap_or_default();
    TaskStatus::ALL
        .into_iter()
        .map(|status| {
            let count = tasks
                .iter()
                .filter(|task| task.get("status").and_then(Value::as_str) == Some(status.as_str()))
                .count();
            (status, count)
        })
        .collect()
}

fn print_board(tasks: &Value) {
    let columns: Vec<String> = column_counts(tasks)
        .into_iter()
        .map(|(status, count)| format!("{}={}", status, count))
        .collect();
    println!("{}", columns.join(" "));
}

/// Move one task and print the board before and after.
pub async fn move_task(
    config: &Config,
    project_id: i64,
    task_id: i64,
    status: TaskStatus,
) -> anyhow::Result<()> {
    let client = Arc::new(ControlPlaneClient::new(
        &config.api_url,
        Duration::from_millis(config.batch.request_timeout_ms),
    )?);
    let cache = Arc::new(QueryCache::new());
    let query = Query::Tasks {
        project_id: Some(project_id),
    };

    print_board(&cache.read(&query, client.as_ref()).await?);

    let board = TaskBoard::new(cache.clone(), client.clone());
    let outcome = board.move_task(project_id, task_id, status).await;
    match &outcome {
        MutationOutcome::Committed => println!("task {} moved to {}", task_id, status),
        MutationOutcome::RolledBack(e) | MutationOutcome::Superseded(e) => {
            println!("task {} not moved: {}", task_id, e)
        }
    }

    print_board(&cache.read(&query, client.as_ref()).await?);

    if !outcome.is_committed() {
        anyhow::bail!("task {} was not moved to {}", task_id, status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_counts() {
        let tasks = json!([
            {"id": 1, "status": "todo"},
            {"id": 2, "status": "todo"},
            {"id": 3, "status": "done"},
            {"id": 4}
        ]);

        assert_eq!(
            column_counts(&tasks),
            vec![
                (TaskStatus::Todo, 2),
                (TaskStatus::InProgress, 0),
                (TaskStatus::Done, 1),
                (TaskStatus::Archived, 0),
            ]
        );
    }

    #[test]
    fn test_column_counts_of_non_list() {
        assert!(column_counts(&json!({})).iter().all(|(_, count)| *count == 0));
    }
}
