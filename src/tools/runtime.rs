//! Runtime handle injected into tools by the executor.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentState;
use crate::backend::FileBackend;

use super::store::KeyValueStore;

/// Everything a tool may need while executing: the shared state, the active
/// filesystem backend, the persistent store, its own call id, and the run's
/// cancellation signal. Never exposed in the model-facing schema.
pub struct ToolRuntime {
    /// Mutable agent state; single-writer per step.
    pub state: Arc<Mutex<AgentState>>,
    /// Active filesystem backend for this run.
    pub backend: Arc<dyn FileBackend>,
    /// Persistent store for cross-run data.
    pub store: Arc<dyn KeyValueStore>,
    /// Id of the tool call being answered.
    pub tool_call_id: String,
    /// Cooperative cancellation for long-running tools.
    pub cancellation: CancellationToken,
}

impl ToolRuntime {
    pub fn new(
        state: Arc<Mutex<AgentState>>,
        backend: Arc<dyn FileBackend>,
        store: Arc<dyn KeyValueStore>,
        tool_call_id: impl Into<String>,
    ) -> Self {
        Self {
            state,
            backend,
            store,
            tool_call_id: tool_call_id.into(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub async fn state(&self) -> tokio::sync::MutexGuard<'_, AgentState> {
        self.state.lock().await
    }

    pub fn backend(&self) -> &dyn FileBackend {
        self.backend.as_ref()
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }
}
