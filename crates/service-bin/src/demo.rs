//! Heartbeat program hosted by `nativesvc run`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tracing::info;

use service_core::Program;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Heartbeat {
    name: String,
    interval: Duration,
    beats: Arc<AtomicU64>,
    runtime: Option<Runtime>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Heartbeat {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval: DEFAULT_INTERVAL,
            beats: Arc::new(AtomicU64::new(0)),
            runtime: None,
            shutdown: None,
        }
    }

    #[cfg(test)]
    fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }
}

impl Program for Heartbeat {
    fn start(&mut self) -> Result<()> {
        if self.runtime.is_some() {
            anyhow::bail!("heartbeat for {} is already running", self.name);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("nativesvc-heartbeat")
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;

        let (tx, rx) = oneshot::channel();
        runtime.spawn(beat(
            self.name.clone(),
            self.interval,
            Arc::clone(&self.beats),
            rx,
        ));

        info!("heartbeat for {} started (every {:?})", self.name, self.interval);
        self.runtime = Some(runtime);
        self.shutdown = Some(tx);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let runtime = self
            .runtime
            .take()
            .with_context(|| format!("heartbeat for {} was never started", self.name))?;
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
        info!("heartbeat for {} stopped after {} beats", self.name, self.beats());
        Ok(())
    }
}

async fn beat(
    name: String,
    period: Duration,
    beats: Arc<AtomicU64>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let n = beats.fetch_add(1, Ordering::Relaxed) + 1;
                info!("{} heartbeat #{}", name, n);
            }
            _ = &mut shutdown => break,
        }
    }
}
