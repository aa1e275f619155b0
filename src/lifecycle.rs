//! Sandbox lifecycle management.
//!
//! Owns the single shared sandbox handle: creates it lazily, recycles it
//! after a window of inactivity, and tears it down on explicit cleanup.
//! Heartbeats from the client reset the inactivity timer; when the timer
//! fires the sandbox is destroyed and a fresh one is provisioned.
//!
//! All state lives behind one owned struct (no module globals) and is
//! injected into request handlers, so single-instance-per-process semantics
//! are explicit. The timer/handle state is process-local; running more than
//! one instance behind a load balancer would race and is out of scope.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::provisioner::{SandboxHandle, SandboxProvisioner};

/// Where the manager currently is in the sandbox's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStatus {
    /// No sandbox exists; the next demand provisions one.
    Absent,
    /// A sandbox is live and usable.
    Live,
    /// A destroy-then-recreate cycle is in flight.
    Restarting,
}

/// Tunables for the lifecycle manager.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Template the provider builds sandboxes from.
    pub template_id: String,
    /// How long with no recorded activity before the sandbox is recycled.
    pub inactivity_window: Duration,
    /// Delay before the single retry when a restart's create fails.
    pub restart_retry_delay: Duration,
    /// Pause between destroying the old sandbox and creating the new one.
    pub settle_delay: Duration,
    /// How long `get_or_create` waits for an in-flight restart to settle.
    pub restart_wait_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            template_id: "vite-react".to_string(),
            inactivity_window: Duration::from_secs(120),
            restart_retry_delay: Duration::from_secs(5),
            settle_delay: Duration::from_secs(1),
            restart_wait_timeout: Duration::from_secs(30),
        }
    }
}

/// Last recorded activity, in both clocks: the monotonic instant drives the
/// inactivity logic, the wall time is what the status API reports.
struct ActivityRecord {
    instant: Instant,
    wall: SystemTime,
}

impl ActivityRecord {
    fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: SystemTime::now(),
        }
    }

    fn unix_ms(&self) -> u64 {
        self.wall
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

struct Inner {
    provisioner: Arc<dyn SandboxProvisioner>,
    config: LifecycleConfig,
    handle: RwLock<Option<SandboxHandle>>,
    last_activity: Mutex<ActivityRecord>,
    restart_timer: Mutex<Option<JoinHandle<()>>>,
    restarting: AtomicBool,
    status_tx: watch::Sender<LifecycleStatus>,
}

impl Inner {
    fn activity_slot(&self) -> MutexGuard<'_, ActivityRecord> {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.restart_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide manager for the single remote sandbox. Clones share state.
#[derive(Clone)]
pub struct SandboxLifecycle {
    inner: Arc<Inner>,
}

impl SandboxLifecycle {
    pub fn new(provisioner: Arc<dyn SandboxProvisioner>, config: LifecycleConfig) -> Self {
        let (status_tx, _) = watch::channel(LifecycleStatus::Absent);
        Self {
            inner: Arc::new(Inner {
                provisioner,
                config,
                handle: RwLock::new(None),
                last_activity: Mutex::new(ActivityRecord::now()),
                restart_timer: Mutex::new(None),
                restarting: AtomicBool::new(false),
                status_tx,
            }),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.inner.config
    }

    pub fn provisioner(&self) -> &Arc<dyn SandboxProvisioner> {
        &self.inner.provisioner
    }

    pub fn status(&self) -> LifecycleStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn is_restarting(&self) -> bool {
        self.inner.restarting.load(Ordering::SeqCst)
    }

    /// Last recorded activity as unix milliseconds.
    pub fn last_activity_ms(&self) -> u64 {
        self.inner.activity_slot().unix_ms()
    }

    /// How long since the last recorded activity.
    pub fn time_since_last_activity(&self) -> Duration {
        self.inner.activity_slot().instant.elapsed()
    }

    /// Whether the last activity falls inside the inactivity window.
    pub fn is_active(&self) -> bool {
        self.time_since_last_activity() < self.inner.config.inactivity_window
    }

    /// Records that a recognized action happened now. Never fails; the
    /// timestamp never decreases. Returns the updated unix-millisecond stamp.
    pub fn record_activity(&self, action: &str) -> u64 {
        let instant = Instant::now();
        let wall = SystemTime::now();
        let mut slot = self.inner.activity_slot();
        if instant > slot.instant {
            slot.instant = instant;
        }
        if wall > slot.wall {
            slot.wall = wall;
        }
        debug!(action, "activity recorded");
        slot.unix_ms()
    }

    /// Records activity and re-arms the inactivity timer: the old pending
    /// timer (if any) is canceled and exactly one new timer is armed for a
    /// full window from now.
    pub fn record_heartbeat(&self, action: &str) -> u64 {
        let stamp = self.record_activity(action);
        self.arm_restart_timer();
        stamp
    }

    /// Arms the restart timer, canceling any pending one first. At most one
    /// timer is ever pending, by construction.
    pub fn arm_restart_timer(&self) {
        let this = self.clone();
        // Deadline is fixed here, at arm time, not when the task first polls.
        let deadline = tokio::time::sleep(self.inner.config.inactivity_window);
        let task = tokio::spawn(async move {
            deadline.await;
            // The cycle runs detached: canceling a later re-arm must only
            // cancel the pending sleep, never an in-flight destroy/create.
            tokio::spawn(async move {
                this.run_restart_cycle().await;
            });
        });
        if let Some(old) = self.inner.timer_slot().replace(task) {
            old.abort();
        }
    }

    /// Cancels the pending restart timer without touching the handle.
    pub fn clear_timer(&self) {
        if let Some(task) = self.inner.timer_slot().take() {
            task.abort();
        }
    }

    /// Whether a restart timer is currently pending.
    pub fn timer_armed(&self) -> bool {
        self.inner
            .timer_slot()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Returns the live handle, provisioning one if absent.
    ///
    /// When a restart is in flight the call waits (bounded by
    /// `restart_wait_timeout`) for it to settle, then returns the fresh
    /// handle rather than racing a second create against the cycle.
    pub async fn get_or_create(&self) -> Result<SandboxHandle> {
        if self.is_restarting() {
            self.wait_for_restart().await?;
        }
        if let Some(handle) = self.inner.handle.read().await.as_ref() {
            return Ok(handle.clone());
        }
        let mut guard = self.inner.handle.write().await;
        // A restart or a concurrent demand may have filled the slot while we
        // waited for the write lock.
        if let Some(handle) = guard.as_ref() {
            return Ok(handle.clone());
        }
        let handle = self
            .inner
            .provisioner
            .create(&self.inner.config.template_id)
            .await?;
        info!(sandbox_id = %handle.id, host = %handle.host, "sandbox provisioned");
        *guard = Some(handle.clone());
        drop(guard);
        let _ = self.inner.status_tx.send(LifecycleStatus::Live);
        self.record_activity("sandbox_created");
        Ok(handle)
    }

    /// Preview URL of the live sandbox, provisioning one if needed.
    pub async fn host_url(&self) -> Result<String> {
        Ok(self.get_or_create().await?.preview_url())
    }

    /// Destroys the current sandbox and provisions a replacement.
    ///
    /// Exactly one cycle runs at a time; a firing that observes one already
    /// in flight returns without doing anything. Destroy failures are logged
    /// and the recreate proceeds anyway. A failed create is retried once
    /// after `restart_retry_delay`, then the manager gives up and goes
    /// Absent until the next demand.
    pub(crate) async fn run_restart_cycle(&self) {
        if self
            .inner
            .restarting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("restart already in progress, skipping");
            return;
        }
        let _ = self.inner.status_tx.send(LifecycleStatus::Restarting);
        info!("restarting sandbox after inactivity");

        // The write lock is held across the whole cycle so a concurrent
        // demand blocks until the fresh handle is in place instead of
        // provisioning a second sandbox.
        let mut guard = self.inner.handle.write().await;
        if let Some(old) = guard.take() {
            if let Err(err) = self.inner.provisioner.destroy(&old).await {
                warn!(sandbox_id = %old.id, error = %err, "destroy failed, recreating anyway");
            }
        }
        tokio::time::sleep(self.inner.config.settle_delay).await;

        let created = match self
            .inner
            .provisioner
            .create(&self.inner.config.template_id)
            .await
        {
            Ok(handle) => Ok(handle),
            Err(err) => {
                warn!(
                    error = %err,
                    retry_delay = ?self.inner.config.restart_retry_delay,
                    "sandbox create failed during restart, retrying once"
                );
                tokio::time::sleep(self.inner.config.restart_retry_delay).await;
                self.inner
                    .provisioner
                    .create(&self.inner.config.template_id)
                    .await
            }
        };

        match created {
            Ok(handle) => {
                info!(sandbox_id = %handle.id, "sandbox restarted");
                *guard = Some(handle);
                drop(guard);
                let _ = self.inner.status_tx.send(LifecycleStatus::Live);
                self.inner.restarting.store(false, Ordering::SeqCst);
                self.record_activity("sandbox_restarted");
                self.arm_restart_timer();
            }
            Err(err) => {
                error!(error = %err, "sandbox restart failed after retry, giving up");
                drop(guard);
                let _ = self.inner.status_tx.send(LifecycleStatus::Absent);
                self.inner.restarting.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Cancels the timer and destroys the live sandbox, if any. Idempotent.
    pub async fn cleanup(&self) {
        self.clear_timer();
        let taken = self.inner.handle.write().await.take();
        if let Some(handle) = taken {
            info!(sandbox_id = %handle.id, "cleaning up sandbox");
            if let Err(err) = self.inner.provisioner.destroy(&handle).await {
                warn!(sandbox_id = %handle.id, error = %err, "destroy during cleanup failed");
            }
        }
        let _ = self.inner.status_tx.send(LifecycleStatus::Absent);
    }

    async fn wait_for_restart(&self) -> Result<()> {
        let mut rx = self.inner.status_tx.subscribe();
        tokio::time::timeout(
            self.inner.config.restart_wait_timeout,
            rx.wait_for(|status| *status != LifecycleStatus::Restarting),
        )
        .await
        .map_err(|_| Error::RestartTimeout)?
        .map_err(|_| Error::RestartTimeout)?;
        Ok(())
    }
}
