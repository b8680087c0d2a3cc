//! Periodic background tasks (retention sweeps, gauge sampling).

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// How often a periodic task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFrequency {
    Seconds(u64),
    Minutes(u64),
}

impl JobFrequency {
    /// Interval between runs. Never shorter than one second.
    pub fn duration(&self) -> Duration {
        let secs = match self {
            JobFrequency::Seconds(secs) => *secs,
            JobFrequency::Minutes(mins) => mins.saturating_mul(60),
        };
        Duration::from_secs(secs.max(1))
    }
}

/// A task run on a fixed interval by [`JobScheduler`].
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    fn frequency(&self) -> JobFrequency;

    /// One run. An error is logged and the next tick runs as usual.
    async fn execute(&self) -> Result<(), String>;
}

/// Owns the periodic tasks and stops them on shutdown.
pub struct JobScheduler {
    jobs: Vec<Arc<dyn Job>>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            jobs: Vec::new(),
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    pub fn register<J: Job + 'static>(&mut self, job: J) {
        self.jobs.push(Arc::new(job));
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Spawn one loop per registered job. The first run happens one interval after start.
    pub fn start(&mut self) {
        info!(jobs = ?self.job_names(), "Starting background jobs");

        for job in &self.jobs {
            let job = Arc::clone(job);
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.handles.push(tokio::spawn(run_loop(job, shutdown_rx)));
        }
    }

    /// Signal every loop to stop after its current run.
    pub fn shutdown(&self) {
        info!("Stopping background jobs");
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn wait_for_shutdown(self, timeout: Duration) {
        let handles = self.handles;
        let joined = async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("Background job task ended abnormally: {}", e);
                }
            }
        };

        if tokio::time::timeout(timeout, joined).await.is_err() {
            warn!("Background jobs did not stop within {:?}", timeout);
        } else {
            info!("Background jobs stopped");
        }
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_loop(job: Arc<dyn Job>, mut shutdown_rx: watch::Receiver<bool>) {
    let name = job.name();
    let mut interval = tokio::time::interval(job.frequency().duration());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    debug!(job = name, frequency = ?job.frequency(), "Job scheduled");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let started = Instant::now();
                match job.execute().await {
                    Ok(()) => debug!(
                        job = name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Job run finished"
                    ),
                    Err(e) => error!(
                        job = name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %e,
                        "Job run failed"
                    ),
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!(job = name, "Job stopped");
                    break;
                }
            }
        }
    }
}
