//! Tether - playground sandbox lifecycle service.
//!
//! Usage:
//!   tether serve [--port 8080]

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tether::agent::{AgentRunner, OpenAiChatClient};
use tether::config::ServeArgs;
use tether::http_server;
use tether::lifecycle::SandboxLifecycle;
use tether::provisioner::HttpProvisioner;
use tether::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Keeps a remote cloud sandbox alive while a playground session is active")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve(ServeArgs),
}

#[tokio::main]
async fn main() {
    use std::process::exit;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Serve(serve) => {
            let provisioner = match HttpProvisioner::new(
                &serve.provider_url,
                &serve.provider_api_key,
                serve.preview_port,
            ) {
                Ok(provisioner) => Arc::new(provisioner),
                Err(e) => {
                    eprintln!("Error: invalid provider url: {}", e);
                    exit(1);
                }
            };
            let llm = match OpenAiChatClient::new(&serve.llm_url, &serve.llm_api_key, &serve.llm_model)
            {
                Ok(llm) => Arc::new(llm),
                Err(e) => {
                    eprintln!("Error: invalid llm url: {}", e);
                    exit(1);
                }
            };

            let lifecycle = SandboxLifecycle::new(provisioner, serve.lifecycle_config());
            let agent = Arc::new(AgentRunner::new(
                llm,
                &serve.project_root,
                serve.max_tool_rounds,
            ));
            let state = AppState::new(lifecycle, agent, serve.llm_configured());

            http_server::run_server(serve.port, state).await;
        }
    }
}
