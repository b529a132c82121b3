//! The polling core: one self-rescheduling task per mounted monitor.
//!
//! Each tick fetches the job list, applies it, picks the next delay from
//! observed activity, and conditionally spawns a detail fetch for the
//! selected job. The loop never dies on a failed poll; unmounting is the
//! only way to stop it. Late responses (list or detail) that arrive after
//! unmount, or for a superseded selection, are discarded rather than
//! applied.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::time::{sleep, Duration};

use crate::config::Config;
use crate::job::{has_active_job, Job, JobKind};
use crate::logging::{log, obj, v_str, v_u64, Domain, Level};
use crate::registry::{JobRegistry, RegistryError};

/// Page-local monitor state. One writer timeline (the tick) plus detail
/// handlers, all gated on the mounted flag.
#[derive(Debug, Clone, Default)]
pub struct MonitorState {
    /// Last successfully fetched list snapshot; replaced wholesale, never
    /// diffed. A failed poll leaves it untouched.
    pub jobs: Vec<Job>,
    /// Transient banner text from the most recent failed poll; cleared on
    /// the next successful one.
    pub poll_error: Option<String>,
    /// Id of the job whose detail panel is open, if any.
    pub selected: Option<String>,
    /// Most recently fetched detail record for the selected id.
    pub detail: Option<Job>,
}

pub struct JobMonitor {
    registry: Arc<dyn JobRegistry>,
    cfg: Config,
    state: Mutex<MonitorState>,
    mounted: AtomicBool,
    shutdown: Notify,
}

/// Next poll delay in seconds: aggressive while any job is doing work,
/// relaxed when idle.
pub fn poll_delay_secs(cfg: &Config, has_active: bool) -> u64 {
    if has_active {
        cfg.poll_active_secs
    } else {
        cfg.poll_idle_secs
    }
}

impl JobMonitor {
    /// Mount the monitor: spawns the polling task with an immediate first
    /// tick. The returned handle is the only way to observe or stop it.
    pub fn mount(registry: Arc<dyn JobRegistry>, cfg: Config) -> Arc<Self> {
        let monitor = Arc::new(Self {
            registry,
            cfg,
            state: Mutex::new(MonitorState::default()),
            mounted: AtomicBool::new(true),
            shutdown: Notify::new(),
        });
        log(Level::Info, Domain::System, "mount", obj(&[]));
        let task = Arc::clone(&monitor);
        tokio::spawn(task.run());
        monitor
    }

    /// Stop polling. After this returns no further registry call is issued,
    /// and any response already in flight is discarded on arrival.
    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
        self.shutdown.notify_waiters();
        log(Level::Info, Domain::System, "unmount", obj(&[]));
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    /// Clone of the current state, for rendering.
    pub fn snapshot(&self) -> MonitorState {
        self.with_state(|st| st.clone()).unwrap_or_default()
    }

    /// Open the detail panel on `id`: drops any previously held detail and
    /// fetches the new job's record immediately.
    pub fn select(self: &Arc<Self>, id: &str) {
        self.with_state(|st| {
            st.selected = Some(id.to_string());
            st.detail = None;
        });
        log(
            Level::Info,
            Domain::Selection,
            "select",
            obj(&[("job_id", v_str(id))]),
        );
        if self.is_mounted() {
            self.spawn_detail_fetch(id.to_string());
        }
    }

    /// Close the detail panel. An in-flight fetch for the old id completes
    /// but its result is dropped by the stale guard.
    pub fn deselect(&self) {
        self.with_state(|st| {
            st.selected = None;
            st.detail = None;
        });
        log(Level::Info, Domain::Selection, "deselect", obj(&[]));
    }

    /// Launch a job. Errors propagate to the caller; the polling loop is
    /// unaffected either way.
    pub async fn start_job(
        &self,
        kind: JobKind,
        params: serde_json::Value,
    ) -> Result<String, RegistryError> {
        self.registry.start_job(kind, params).await
    }

    /// Request cancellation of a job. Pure data mutation: the polled list
    /// eventually reflects CANCELLED, nothing here touches the schedule.
    pub async fn cancel_job(&self, id: &str) -> Result<(), RegistryError> {
        self.registry.cancel_job(id).await
    }

    async fn run(self: Arc<Self>) {
        loop {
            // Read the flag fresh at the top of every tick; it is never
            // captured into the loop at spawn time.
            if !self.is_mounted() {
                break;
            }
            let delay_secs = match self.registry.list_jobs().await {
                Ok(jobs) => {
                    if !self.is_mounted() {
                        break;
                    }
                    let has_active = has_active_job(&jobs);
                    let refetch = self.apply_snapshot(jobs);
                    if let Some(id) = refetch {
                        self.spawn_detail_fetch(id);
                    }
                    let delay = poll_delay_secs(&self.cfg, has_active);
                    log(
                        Level::Debug,
                        Domain::Poll,
                        "poll_tick",
                        obj(&[
                            ("has_active", serde_json::Value::Bool(has_active)),
                            ("next_delay_secs", v_u64(delay)),
                        ]),
                    );
                    delay
                }
                Err(err) => {
                    if !self.is_mounted() {
                        break;
                    }
                    self.with_state(|st| st.poll_error = Some(err.to_string()));
                    log(
                        Level::Warn,
                        Domain::Poll,
                        "poll_error",
                        obj(&[
                            ("error", v_str(&err.to_string())),
                            ("next_delay_secs", v_u64(self.cfg.poll_error_secs)),
                        ]),
                    );
                    self.cfg.poll_error_secs
                }
            };
            tokio::select! {
                _ = sleep(Duration::from_secs(delay_secs)) => {}
                _ = self.shutdown.notified() => break,
            }
        }
        log(Level::Debug, Domain::System, "poll_loop_stopped", obj(&[]));
    }

    /// Replace the snapshot and clear the error banner. Returns the selected
    /// id when its status in the new snapshot warrants a detail refetch
    /// (still PENDING/RUNNING). Once the selected job is seen terminal the
    /// last fetched detail stands and no further fetch is issued.
    fn apply_snapshot(&self, jobs: Vec<Job>) -> Option<String> {
        self.with_state(|st| {
            st.jobs = jobs;
            st.poll_error = None;
            let sel = st.selected.as_deref()?;
            let job = st.jobs.iter().find(|j| j.id == sel)?;
            job.status.is_active().then(|| sel.to_string())
        })
        .flatten()
    }

    fn spawn_detail_fetch(self: &Arc<Self>, id: String) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let result = monitor.registry.job_detail(&id).await;
            monitor.apply_detail(&id, result);
        });
    }

    /// Stale guard for detail responses: the fetch was tagged with the id it
    /// was issued for, and only a response still matching the live selection
    /// (on a still-mounted monitor) may apply. Last selection wins.
    fn apply_detail(&self, id: &str, result: Result<Job, RegistryError>) {
        if !self.is_mounted() {
            return;
        }
        self.with_state(|st| {
            if st.selected.as_deref() != Some(id) {
                log(
                    Level::Debug,
                    Domain::Selection,
                    "detail_stale_drop",
                    obj(&[("job_id", v_str(id))]),
                );
                return;
            }
            match result {
                Ok(job) => st.detail = Some(job),
                Err(RegistryError::NotFound(_)) => {
                    // Job purged while being viewed: empty panel, no error.
                    st.detail = None;
                    log(
                        Level::Debug,
                        Domain::Selection,
                        "detail_purged",
                        obj(&[("job_id", v_str(id))]),
                    );
                }
                Err(err) => {
                    log(
                        Level::Warn,
                        Domain::Selection,
                        "detail_error",
                        obj(&[("job_id", v_str(id)), ("error", v_str(&err.to_string()))]),
                    );
                }
            }
        });
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MonitorState) -> T) -> Option<T> {
        match self.state.lock() {
            Ok(mut st) => Some(f(&mut st)),
            Err(e) => {
                log(
                    Level::Error,
                    Domain::System,
                    "state_lock_poisoned",
                    obj(&[("error", v_str(&e.to_string()))]),
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct NullRegistry;

    #[async_trait]
    impl JobRegistry for NullRegistry {
        async fn list_jobs(&self) -> Result<Vec<Job>, RegistryError> {
            Ok(Vec::new())
        }
        async fn job_detail(&self, id: &str) -> Result<Job, RegistryError> {
            Err(RegistryError::NotFound(id.to_string()))
        }
        async fn start_job(
            &self,
            _kind: JobKind,
            _params: serde_json::Value,
        ) -> Result<String, RegistryError> {
            Err(RegistryError::Transport("not wired".to_string()))
        }
        async fn cancel_job(&self, _id: &str) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    fn bare_monitor() -> Arc<JobMonitor> {
        Arc::new(JobMonitor {
            registry: Arc::new(NullRegistry),
            cfg: Config::default(),
            state: Mutex::new(MonitorState::default()),
            mounted: AtomicBool::new(true),
            shutdown: Notify::new(),
        })
    }

    fn job(id: &str, status: JobStatus) -> Job {
        Job {
            id: id.to_string(),
            kind: JobKind::NewsBackfill,
            status,
            progress: BTreeMap::new(),
            created_at: 1_700_000_000,
            started_at: None,
            completed_at: None,
            error_message: None,
            params: serde_json::Value::Null,
        }
    }

    #[test]
    fn delay_is_3s_active_10s_idle() {
        let cfg = Config::default();
        assert_eq!(poll_delay_secs(&cfg, true), 3);
        assert_eq!(poll_delay_secs(&cfg, false), 10);
    }

    #[test]
    fn snapshot_refetch_only_while_selected_job_active() {
        let monitor = bare_monitor();
        monitor.with_state(|st| st.selected = Some("a".to_string()));

        let refetch = monitor.apply_snapshot(vec![job("a", JobStatus::Pending)]);
        assert_eq!(refetch.as_deref(), Some("a"));

        let refetch = monitor.apply_snapshot(vec![job("a", JobStatus::Running)]);
        assert_eq!(refetch.as_deref(), Some("a"));

        let refetch = monitor.apply_snapshot(vec![job("a", JobStatus::Completed)]);
        assert_eq!(refetch, None);
    }

    #[test]
    fn snapshot_refetch_skips_unselected_and_missing() {
        let monitor = bare_monitor();
        assert_eq!(monitor.apply_snapshot(vec![job("a", JobStatus::Running)]), None);

        monitor.with_state(|st| st.selected = Some("ghost".to_string()));
        assert_eq!(monitor.apply_snapshot(vec![job("a", JobStatus::Running)]), None);
    }

    #[test]
    fn snapshot_clears_error_banner() {
        let monitor = bare_monitor();
        monitor.with_state(|st| st.poll_error = Some("503".to_string()));
        monitor.apply_snapshot(vec![]);
        assert_eq!(monitor.snapshot().poll_error, None);
    }

    #[test]
    fn stale_detail_response_is_dropped() {
        let monitor = bare_monitor();
        monitor.with_state(|st| st.selected = Some("b".to_string()));

        // Response tagged for "a" arrives while "b" is selected.
        monitor.apply_detail("a", Ok(job("a", JobStatus::Running)));
        assert!(monitor.snapshot().detail.is_none());

        monitor.apply_detail("b", Ok(job("b", JobStatus::Running)));
        assert_eq!(monitor.snapshot().detail.unwrap().id, "b");
    }

    #[test]
    fn detail_not_found_clears_panel_silently() {
        let monitor = bare_monitor();
        monitor.with_state(|st| {
            st.selected = Some("a".to_string());
            st.detail = Some(job("a", JobStatus::Running));
        });
        monitor.apply_detail("a", Err(RegistryError::NotFound("a".to_string())));
        let st = monitor.snapshot();
        assert!(st.detail.is_none());
        assert_eq!(st.selected.as_deref(), Some("a"));
    }

    #[test]
    fn detail_transport_error_keeps_last_detail() {
        let monitor = bare_monitor();
        monitor.with_state(|st| {
            st.selected = Some("a".to_string());
            st.detail = Some(job("a", JobStatus::Running));
        });
        monitor.apply_detail("a", Err(RegistryError::Transport("timeout".to_string())));
        assert_eq!(monitor.snapshot().detail.unwrap().id, "a");
    }

    #[test]
    fn detail_response_after_unmount_is_discarded() {
        let monitor = bare_monitor();
        monitor.with_state(|st| st.selected = Some("a".to_string()));
        monitor.unmount();
        monitor.apply_detail("a", Ok(job("a", JobStatus::Running)));
        assert!(monitor.snapshot().detail.is_none());
    }

    #[test]
    fn deselect_clears_selection_and_detail() {
        let monitor = bare_monitor();
        monitor.with_state(|st| {
            st.selected = Some("a".to_string());
            st.detail = Some(job("a", JobStatus::Running));
        });
        monitor.deselect();
        let st = monitor.snapshot();
        assert!(st.selected.is_none());
        assert!(st.detail.is_none());
    }
}
