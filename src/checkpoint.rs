//! Durable checkpoints of agent state at step boundaries.
//!
//! A checkpoint is taken before each model call and after each batch of tool
//! calls; resuming replays from the latest one. Concrete drivers (sqlite,
//! Redis, ...) implement [Checkpointer]; [InMemorySaver] ships for defaults
//! and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent::{AgentState, InterruptDescriptor};
use crate::error::AgentError;

/// Terminal or in-flight status of a checkpoint.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Running,
    Interrupted,
    Cancelled,
    Failed,
    Complete,
}

/// A durable snapshot of [AgentState] at a step boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    /// Step counter; checkpoints are totally ordered per thread.
    pub step: usize,
    pub state: AgentState,
    /// Set when the run suspended awaiting a human decision.
    pub pending_interrupt: Option<InterruptDescriptor>,
    pub status: CheckpointStatus,
    pub checkpoint_id: String,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(thread_id: impl Into<String>, step: usize, state: AgentState) -> Self {
        Self {
            thread_id: thread_id.into(),
            step,
            state,
            pending_interrupt: None,
            status: CheckpointStatus::Running,
            checkpoint_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: CheckpointStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_pending_interrupt(mut self, interrupt: InterruptDescriptor) -> Self {
        self.pending_interrupt = Some(interrupt);
        self.status = CheckpointStatus::Interrupted;
        self
    }
}

/// Saves and retrieves checkpoints per thread.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist a checkpoint; returns its id.
    async fn put(&self, checkpoint: &Checkpoint) -> Result<String, AgentError>;

    /// Fetch a checkpoint; `None` id means the latest for the thread.
    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<Option<Checkpoint>, AgentError>;

    /// Checkpoints for a thread, oldest first.
    async fn list(&self, thread_id: &str, limit: Option<usize>)
        -> Result<Vec<Checkpoint>, AgentError>;
}

/// In-memory checkpointer; checkpoints are lost when the process exits.
#[derive(Default)]
pub struct InMemorySaver {
    checkpoints: Arc<RwLock<HashMap<String, Vec<Checkpoint>>>>,
}

impl InMemorySaver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemorySaver {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<String, AgentError> {
        let mut checkpoints = self.checkpoints.write().await;
        let thread = checkpoints
            .entry(checkpoint.thread_id.clone())
            .or_insert_with(Vec::new);
        thread.push(checkpoint.clone());
        Ok(checkpoint.checkpoint_id.clone())
    }

    async fn get(
        &self,
        thread_id: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<Option<Checkpoint>, AgentError> {
        let checkpoints = self.checkpoints.read().await;
        let thread = match checkpoints.get(thread_id) {
            Some(t) => t,
            None => return Ok(None),
        };
        let found = match checkpoint_id {
            Some(id) => thread.iter().find(|c| c.checkpoint_id == id).cloned(),
            None => thread.last().cloned(),
        };
        Ok(found)
    }

    async fn list(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>, AgentError> {
        let checkpoints = self.checkpoints.read().await;
        let mut thread = checkpoints.get(thread_id).cloned().unwrap_or_default();
        if let Some(limit) = limit {
            let len = thread.len();
            if len > limit {
                thread.drain(0..len - limit);
            }
        }
        Ok(thread)
    }
}
