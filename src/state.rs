//! Shared application state.

use std::sync::Arc;

use crate::agent::AgentRunner;
use crate::lifecycle::SandboxLifecycle;

/// State injected into every request handler.
///
/// The lifecycle manager is the process-wide owner of the sandbox handle and
/// its timers; cloning the state clones only the `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: SandboxLifecycle,
    pub agent: Arc<AgentRunner>,
    /// False until an LLM API key is configured; prompt requests fail fast.
    pub llm_configured: bool,
}

impl AppState {
    pub fn new(
        lifecycle: SandboxLifecycle,
        agent: Arc<AgentRunner>,
        llm_configured: bool,
    ) -> Self {
        Self {
            lifecycle,
            agent,
            llm_configured,
        }
    }
}
