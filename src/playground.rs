//! Shared playground state for the client shell.
//!
//! Chat, file explorer, editor, and preview panels render independently but
//! react to the same session flags. The store is the single writer; panels
//! subscribe to a watch channel and re-render on change, so no field is ever
//! written from two places.

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

/// UI-visible session flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaygroundState {
    /// Preview URL of the live sandbox, once known.
    pub sandbox_url: Option<String>,
    /// True only between a project-start signal and creation success or error.
    pub is_project_creating: bool,
    pub is_files_loading: bool,
    pub is_llm_generating: bool,
    /// Strictly increasing; panels refetch when it changes and drop stale
    /// responses from earlier values.
    pub files_refresh_trigger: u64,
}

/// Single-writer store driving the playground panels.
pub struct PlaygroundStore {
    state_tx: watch::Sender<PlaygroundState>,
    client: reqwest::Client,
    files_endpoint: String,
}

impl PlaygroundStore {
    pub fn new(files_endpoint: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(PlaygroundState::default());
        Self {
            state_tx,
            client: reqwest::Client::new(),
            files_endpoint: files_endpoint.into(),
        }
    }

    /// Panels subscribe here and observe every state change.
    pub fn subscribe(&self) -> watch::Receiver<PlaygroundState> {
        self.state_tx.subscribe()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> PlaygroundState {
        self.state_tx.borrow().clone()
    }

    /// The user submitted a product request; generation begins.
    pub fn handle_project_start(&self) {
        self.state_tx.send_modify(|state| {
            state.is_project_creating = true;
            state.is_llm_generating = true;
        });
    }

    /// The sandbox came up with a preview URL; the explorer should refetch.
    pub fn handle_project_created(&self, url: &str) {
        self.state_tx.send_modify(|state| {
            state.sandbox_url = Some(url.to_string());
            state.is_project_creating = false;
            state.is_files_loading = true;
            state.files_refresh_trigger += 1;
        });
    }

    /// Creation failed; clear the in-flight flags so the UI can fall back
    /// to "no preview available".
    pub fn handle_project_error(&self) {
        self.state_tx.send_modify(|state| {
            state.is_project_creating = false;
            state.is_llm_generating = false;
        });
    }

    /// The agent finished responding.
    pub fn handle_generation_complete(&self) {
        self.state_tx.send_modify(|state| {
            state.is_llm_generating = false;
        });
    }

    /// Force the explorer to refetch without fetching here.
    pub fn trigger_files_refresh(&self) {
        self.state_tx.send_modify(|state| {
            state.files_refresh_trigger += 1;
        });
    }

    /// Refetches the file tree, toggling the loading flag around the call.
    /// Failures are logged; the state never ends up stuck loading.
    pub async fn refresh_files_and_preview(&self) {
        self.state_tx
            .send_modify(|state| state.is_files_loading = true);
        match self.fetch_files().await {
            Ok(()) => {
                debug!("file tree refreshed");
                self.state_tx
                    .send_modify(|state| state.files_refresh_trigger += 1);
            }
            Err(err) => warn!(error = %err, "file refresh failed"),
        }
        self.state_tx
            .send_modify(|state| state.is_files_loading = false);
    }

    async fn fetch_files(&self) -> crate::error::Result<()> {
        self.client
            .get(&self.files_endpoint)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::{Json, Router};

    use super::*;

    #[tokio::test]
    async fn project_start_then_created_sets_the_expected_flags() {
        let store = PlaygroundStore::new("http://unused/api/files");
        let before = store.state().files_refresh_trigger;

        store.handle_project_start();
        let state = store.state();
        assert!(state.is_project_creating);
        assert!(state.is_llm_generating);

        store.handle_project_created("https://x");
        let state = store.state();
        assert_eq!(state.sandbox_url.as_deref(), Some("https://x"));
        assert!(!state.is_project_creating);
        assert!(state.is_files_loading);
        assert_eq!(state.files_refresh_trigger, before + 1);
    }

    #[tokio::test]
    async fn project_error_clears_the_in_flight_flags() {
        let store = PlaygroundStore::new("http://unused/api/files");
        store.handle_project_start();
        store.handle_project_error();

        let state = store.state();
        assert!(!state.is_project_creating);
        assert!(!state.is_llm_generating);
        assert_eq!(state.sandbox_url, None);
    }

    #[tokio::test]
    async fn refresh_trigger_strictly_increases() {
        let store = PlaygroundStore::new("http://unused/api/files");
        let mut last = store.state().files_refresh_trigger;
        for _ in 0..3 {
            store.trigger_files_refresh();
            let next = store.state().files_refresh_trigger;
            assert!(next > last);
            last = next;
        }
    }

    #[tokio::test]
    async fn subscribers_observe_every_change() {
        let store = PlaygroundStore::new("http://unused/api/files");
        let mut rx = store.subscribe();

        store.handle_project_created("https://preview.example");
        rx.changed().await.unwrap();
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.sandbox_url.as_deref(), Some("https://preview.example"));
    }

    #[tokio::test]
    async fn successful_refresh_bumps_the_trigger_and_clears_loading() {
        let app = Router::new().route(
            "/api/files",
            get(|| async { Json(serde_json::json!({ "success": true, "files": [] })) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let store = PlaygroundStore::new(format!("http://{addr}/api/files"));
        let before = store.state().files_refresh_trigger;
        store.refresh_files_and_preview().await;

        let state = store.state();
        assert_eq!(state.files_refresh_trigger, before + 1);
        assert!(!state.is_files_loading);
    }

    #[tokio::test]
    async fn failed_refresh_leaves_the_trigger_and_clears_loading() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = format!("http://{}/api/files", listener.local_addr().unwrap());
        drop(listener);

        let store = PlaygroundStore::new(dead);
        let before = store.state().files_refresh_trigger;
        store.refresh_files_and_preview().await;

        let state = store.state();
        assert_eq!(state.files_refresh_trigger, before);
        assert!(!state.is_files_loading);
    }
}
