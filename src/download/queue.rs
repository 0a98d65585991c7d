// RipStream Core - Music Streaming Download Engine
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Priority queue of download tasks with dependency ordering
//!
//! Tasks are handed out highest priority first, FIFO within a priority,
//! and only once every task they depend on has completed. A failed task is
//! requeued at the back of its priority until it runs out of retries.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{Result, RipstreamError};
use crate::models::DownloadableContent;

/// Times a failed task is put back on the queue
pub const MAX_TASK_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// One unit of work in the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub task_id: Uuid,
    pub content: DownloadableContent,
    pub directory: PathBuf,
    pub priority: TaskPriority,
    /// Tasks that must complete before this one is handed out
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Insertion order, bumped on requeue
    #[serde(skip)]
    sequence: u64,
}

impl DownloadTask {
    pub fn new(content: DownloadableContent, directory: impl Into<PathBuf>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            content,
            directory: directory.into(),
            priority: TaskPriority::default(),
            dependencies: Vec::new(),
            status: TaskStatus::Queued,
            retry_count: 0,
            error: None,
            created_at: Utc::now(),
            sequence: 0,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, task_id: Uuid) -> Self {
        self.dependencies.push(task_id);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Default)]
struct QueueInner {
    tasks: HashMap<Uuid, DownloadTask>,
    next_sequence: u64,
}

impl QueueInner {
    fn sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    fn dependencies_met(&self, task: &DownloadTask) -> bool {
        task.dependencies.iter().all(|dep| {
            self.tasks
                .get(dep)
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }

    fn get_mut(&mut self, task_id: Uuid) -> Result<&mut DownloadTask> {
        self.tasks
            .get_mut(&task_id)
            .ok_or_else(|| RipstreamError::RecordNotFound(format!("Download task {}", task_id)))
    }
}

/// Thread-safe download queue
#[derive(Debug)]
pub struct DownloadQueue {
    max_size: usize,
    inner: Mutex<QueueInner>,
}

impl DownloadQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Enqueue a task, returning its id
    ///
    /// Fails when the number of unfinished tasks has reached `max_size` or
    /// when a dependency is not known to the queue.
    pub fn add(&self, mut task: DownloadTask) -> Result<Uuid> {
        let mut inner = self.inner.lock();

        let pending = inner
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .count();
        if pending >= self.max_size {
            return Err(RipstreamError::invalid_input(format!(
                "Download queue is full ({} tasks)",
                self.max_size
            )));
        }

        if let Some(missing) = task
            .dependencies
            .iter()
            .find(|dep| !inner.tasks.contains_key(dep))
        {
            return Err(RipstreamError::invalid_input(format!(
                "Unknown dependency {} for task {}",
                missing, task.task_id
            )));
        }

        task.status = TaskStatus::Queued;
        task.sequence = inner.sequence();
        let task_id = task.task_id;
        log::debug!(
            "Queued {} ({:?} priority)",
            task.content.display_name(),
            task.priority
        );
        inner.tasks.insert(task_id, task);
        Ok(task_id)
    }

    /// Take the next runnable task and mark it running
    pub fn next_task(&self) -> Option<DownloadTask> {
        let mut inner = self.inner.lock();

        let task_id = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued && inner.dependencies_met(t))
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.sequence.cmp(&a.sequence))
            })
            .map(|t| t.task_id)?;

        let task = inner.tasks.get_mut(&task_id)?;
        task.status = TaskStatus::Running;
        Some(task.clone())
    }

    pub fn complete(&self, task_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock();
        let task = inner.get_mut(task_id)?;
        task.status = TaskStatus::Completed;
        task.error = None;
        Ok(())
    }

    /// Record a failure; returns true when the task was requeued
    pub fn fail(&self, task_id: Uuid, error: impl Into<String>) -> Result<bool> {
        let mut inner = self.inner.lock();
        let sequence = inner.sequence();
        let task = inner.get_mut(task_id)?;
        task.error = Some(error.into());

        if task.retry_count < MAX_TASK_RETRIES {
            task.retry_count += 1;
            task.status = TaskStatus::Queued;
            task.sequence = sequence;
            log::info!(
                "Requeued {} (retry {}/{})",
                task.content.display_name(),
                task.retry_count,
                MAX_TASK_RETRIES
            );
            Ok(true)
        } else {
            task.status = TaskStatus::Failed;
            Ok(false)
        }
    }

    /// Cancel an unfinished task; returns false if it had already finished
    pub fn cancel(&self, task_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock();
        let task = inner.get_mut(task_id)?;
        if task.status.is_terminal() {
            return Ok(false);
        }
        task.status = TaskStatus::Cancelled;
        Ok(true)
    }

    pub fn remove(&self, task_id: Uuid) -> Option<DownloadTask> {
        self.inner.lock().tasks.remove(&task_id)
    }

    pub fn get(&self, task_id: Uuid) -> Option<DownloadTask> {
        self.inner.lock().tasks.get(&task_id).cloned()
    }

    pub fn clear(&self) {
        self.inner.lock().tasks.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().tasks.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        let mut stats = QueueStats {
            total: inner.tasks.len(),
            ..QueueStats::default()
        };
        for task in inner.tasks.values() {
            match task.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}
