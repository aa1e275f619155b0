//! Server configuration.
//!
//! Every tunable is a flag with an environment fallback so deployments can
//! configure the service without wrapper scripts. Nothing here is
//! hard-coded elsewhere; the lifecycle manager receives its timings from
//! this struct.

use std::time::Duration;

use clap::Args;

use crate::lifecycle::LifecycleConfig;

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Base URL of the sandbox provider API
    #[arg(long, env = "SANDBOX_PROVIDER_URL", default_value = "https://api.sandbox.example.dev")]
    pub provider_url: String,

    /// API key for the sandbox provider
    #[arg(long, env = "SANDBOX_API_KEY", default_value = "", hide_env_values = true)]
    pub provider_api_key: String,

    /// Template the provider builds sandboxes from
    #[arg(long, env = "SANDBOX_TEMPLATE_ID", default_value = "vite-react")]
    pub template_id: String,

    /// Port the template's dev server listens on inside the sandbox
    #[arg(long, default_value_t = 5173)]
    pub preview_port: u16,

    /// Base URL of the LLM chat-completions API
    #[arg(long, env = "LLM_API_URL", default_value = "https://api.openai.com/v1")]
    pub llm_url: String,

    /// API key for the LLM provider; prompt requests fail fast without one
    #[arg(long, env = "LLM_API_KEY", default_value = "", hide_env_values = true)]
    pub llm_api_key: String,

    /// Model the agent talks to
    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o")]
    pub llm_model: String,

    /// Seconds of inactivity before the sandbox is recycled
    #[arg(long, default_value_t = 120)]
    pub inactivity_window_secs: u64,

    /// Seconds before the single retry when a restart's create fails
    #[arg(long, default_value_t = 5)]
    pub restart_retry_delay_secs: u64,

    /// Milliseconds between destroying the old sandbox and creating the new one
    #[arg(long, default_value_t = 1000)]
    pub settle_delay_ms: u64,

    /// Seconds a request waits for an in-flight restart to settle
    #[arg(long, default_value_t = 30)]
    pub restart_wait_timeout_secs: u64,

    /// Directory the agent's file tools are confined to
    #[arg(long, default_value = "src")]
    pub project_root: String,

    /// Maximum tool rounds per prompt before the agent gives up
    #[arg(long, default_value_t = 16)]
    pub max_tool_rounds: usize,
}

impl ServeArgs {
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            template_id: self.template_id.clone(),
            inactivity_window: Duration::from_secs(self.inactivity_window_secs),
            restart_retry_delay: Duration::from_secs(self.restart_retry_delay_secs),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            restart_wait_timeout: Duration::from_secs(self.restart_wait_timeout_secs),
        }
    }

    pub fn llm_configured(&self) -> bool {
        !self.llm_api_key.is_empty()
    }
}
