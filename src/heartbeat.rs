//! Client-side heartbeat emitter.
//!
//! Embedded by the playground frontend shell: sends a ping when the session
//! starts, on a fixed cadence while it runs, and whenever the user interacts,
//! so the server keeps the sandbox alive. Ping failures are logged and
//! published to subscribers; they never stop the schedule and never surface
//! as errors to the caller.
//!
//! The final `heartbeat_stop` ping on teardown is best effort: if the host
//! process is killed before the request leaves, the server only notices via
//! the inactivity window. Known limitation, not solved here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Tunables for the emitter.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Heartbeat endpoint, e.g. `http://host/api/sandbox/heartbeat`.
    pub endpoint: String,
    /// Cadence of the periodic ping.
    pub interval: Duration,
}

impl HeartbeatConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            interval: Duration::from_secs(30),
        }
    }
}

/// What happened to the most recent ping. Published on a watch channel so
/// any number of UI panels can observe without coupling to the emitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// No ping attempted yet.
    Idle,
    /// A ping was delivered.
    Sent { action: String },
    /// A ping failed; the schedule continues.
    Failed { action: String, reason: String },
}

#[derive(Serialize)]
struct PingBody<'a> {
    action: &'a str,
}

struct Inner {
    client: reqwest::Client,
    config: HeartbeatConfig,
    visible: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    events_tx: watch::Sender<HeartbeatEvent>,
}

impl Inner {
    fn timer_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One network call per ping; never fails to the caller.
    async fn send_ping(&self, action: &str) {
        let result = self
            .client
            .post(&self.config.endpoint)
            .json(&PingBody { action })
            .send()
            .await;
        let event = match result {
            Ok(response) if response.status().is_success() => {
                debug!(action, "heartbeat sent");
                HeartbeatEvent::Sent {
                    action: action.to_string(),
                }
            }
            Ok(response) => {
                warn!(action, status = %response.status(), "heartbeat rejected");
                HeartbeatEvent::Failed {
                    action: action.to_string(),
                    reason: format!("status {}", response.status()),
                }
            }
            Err(err) => {
                warn!(action, error = %err, "heartbeat failed");
                HeartbeatEvent::Failed {
                    action: action.to_string(),
                    reason: err.to_string(),
                }
            }
        };
        let _ = self.events_tx.send(event);
    }
}

/// Periodic and interaction-triggered heartbeat sender.
#[derive(Clone)]
pub struct HeartbeatEmitter {
    inner: Arc<Inner>,
}

impl HeartbeatEmitter {
    pub fn new(config: HeartbeatConfig) -> Self {
        let (events_tx, _) = watch::channel(HeartbeatEvent::Idle);
        Self {
            inner: Arc::new(Inner {
                client: reqwest::Client::new(),
                config,
                visible: AtomicBool::new(true),
                timer: Mutex::new(None),
                events_tx,
            }),
        }
    }

    /// Observe ping outcomes.
    pub fn subscribe(&self) -> watch::Receiver<HeartbeatEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Whether the periodic task is running.
    pub fn is_running(&self) -> bool {
        self.inner
            .timer_slot()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Sends one immediate start ping and arms the periodic ping.
    ///
    /// Idempotent: calling while running cancels the old task and arms a
    /// fresh one rather than stacking timers. The periodic task keeps
    /// ticking while the page is hidden, but its pings are suppressed until
    /// visibility returns.
    pub fn start(&self) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            inner.send_ping("heartbeat_start").await;
            let mut ticker = tokio::time::interval(inner.config.interval);
            ticker.tick().await; // the first tick completes immediately
            loop {
                ticker.tick().await;
                if inner.visible.load(Ordering::SeqCst) {
                    inner.send_ping("heartbeat_ping").await;
                }
            }
        });
        if let Some(old) = self.inner.timer_slot().replace(task) {
            old.abort();
        }
    }

    /// Cancels the periodic ping and sends one final stop ping. Safe to
    /// call when not running: the timer part is a no-op, the ping is still
    /// attempted.
    pub async fn stop(&self) {
        if let Some(task) = self.inner.timer_slot().take() {
            task.abort();
        }
        self.inner.send_ping("heartbeat_stop").await;
    }

    /// Sends an immediate ping tagged with `action`, outside the periodic
    /// schedule, unless the page is hidden.
    pub fn record_activity(&self, action: &str) {
        if !self.inner.visible.load(Ordering::SeqCst) {
            debug!(action, "page hidden, interaction ping suppressed");
            return;
        }
        let inner = Arc::clone(&self.inner);
        let action = action.to_string();
        tokio::spawn(async move {
            inner.send_ping(&action).await;
        });
    }

    /// Visibility change from the embedding shell. Hiding suppresses
    /// interaction pings; both transitions are announced to the server.
    pub fn set_visible(&self, visible: bool) {
        self.inner.visible.store(visible, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let action = if visible { "page_visible" } else { "page_hidden" };
            inner.send_ping(action).await;
        });
    }
}
