use std::sync::Arc;

use anyhow::Result;
use tokio::time::{sleep, Duration};

use jobwatch::config::Config;
use jobwatch::job::has_active_job;
use jobwatch::monitor::JobMonitor;
use jobwatch::registry::HttpRegistry;

/// Headless monitor: mounts the polling core against REGISTRY_BASE and
/// prints a one-line snapshot summary until ctrl-c.
#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let registry = Arc::new(HttpRegistry::new(&cfg)?);

    eprintln!("[monitor_loop] polling {}", cfg.registry_base);

    // Optional: open a detail view on one job for the whole session.
    let selected = std::env::var("SELECT_JOB").ok();

    let monitor = JobMonitor::mount(registry, cfg);
    if let Some(id) = &selected {
        monitor.select(id);
    }

    loop {
        tokio::select! {
            _ = sleep(Duration::from_secs(5)) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
        let st = monitor.snapshot();
        let active = st.jobs.iter().filter(|j| j.status.is_active()).count();
        eprintln!(
            "[monitor_loop] jobs={} active={} busy={} banner={:?} detail={:?}",
            st.jobs.len(),
            active,
            has_active_job(&st.jobs),
            st.poll_error,
            st.detail.as_ref().map(|j| (j.id.as_str(), j.status.as_str())),
        );
    }

    monitor.unmount();
    eprintln!("[monitor_loop] stopped");
    Ok(())
}
