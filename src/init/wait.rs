// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::error;

use crate::error::{Error, Result};

pub async fn wait_for_any_task(tasks: &mut JoinSet<Result<()>>) -> Result<()> {
    match tasks.join_next().await {
        None => Ok(()),
        Some(res) => res.map_err(|e| Error::Task(e.to_string()))?,
    }
}

pub async fn wait_for_tasks_with_timeout(
    tasks: &mut JoinSet<Result<()>>,
    timeout: Duration,
) -> Result<()> {
    wait_for_tasks_with_deadline(tasks, Instant::now() + timeout).await
}

pub async fn wait_for_tasks_with_deadline(
    tasks: &mut JoinSet<Result<()>>,
    stop_at: Instant,
) -> Result<()> {
    let mut result = Ok(());
    loop {
        match timeout_at(stop_at, tasks.join_next()).await {
            Err(_) => {
                result = Err(Error::Task(
                    "timed out waiting for tasks to complete".to_string(),
                ));
                break;
            }
            Ok(None) => break,
            Ok(Some(v)) => match v {
                Ok(Ok(())) => {}
                Ok(Err(e)) => result = Err(e),
                Err(e) => error!("Failed to join with task: {:?}", e),
            },
        }
    }

    result
}
