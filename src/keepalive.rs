//! Periodic self-ping that keeps sleep-on-idle hosts from suspending the process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Issues a single keepalive request.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &Url) -> Result<StatusCode>;
}

/// GET over reqwest, bounded by the client timeout.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build keepalive HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &Url) -> Result<StatusCode> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .context("Keepalive request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Keepalive target answered {}", status);
        }
        Ok(status)
    }
}

/// Result of one tick, mostly for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// No target configured
    Skipped,
    Sent(StatusCode),
    Failed,
}

pub struct Pinger {
    target: Option<Url>,
    interval: Duration,
    probe: Arc<dyn Probe>,
}

impl Pinger {
    pub fn new(target: Option<Url>, interval: Duration, probe: Arc<dyn Probe>) -> Self {
        Self {
            target,
            interval,
            probe,
        }
    }

    /// Ping once. Failures are logged and swallowed.
    pub async fn tick(&self) -> PingOutcome {
        let Some(url) = &self.target else {
            debug!("Keepalive tick: no target configured");
            return PingOutcome::Skipped;
        };
        match self.probe.probe(url).await {
            Ok(status) => {
                info!("Keepalive ping sent to {} ({})", url, status);
                PingOutcome::Sent(status)
            }
            Err(e) => {
                error!("Keepalive ping failed: {:#}", e);
                PingOutcome::Failed
            }
        }
    }

    /// Tick every interval, starting immediately, until `cancel` fires.
    ///
    /// A ping still in flight when `cancel` fires is abandoned.
    pub async fn run(self, cancel: CancellationToken) {
        match &self.target {
            Some(url) => info!("Keepalive pinging {} every {:?}", url, self.interval),
            None => info!("Keepalive target not configured; ticks will be no-ops"),
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.tick() => {}
            }
        }

        info!("Keepalive stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every call; fails the calls whose index is listed.
    #[derive(Default)]
    struct RecordingProbe {
        calls: Mutex<Vec<String>>,
        fail_on: Vec<usize>,
    }

    #[async_trait]
    impl Probe for RecordingProbe {
        async fn probe(&self, url: &Url) -> Result<StatusCode> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push(url.to_string());
            if self.fail_on.contains(&index) {
                anyhow::bail!("connection refused");
            }
            Ok(StatusCode::OK)
        }
    }

    const INTERVAL: Duration = Duration::from_secs(300);

    fn target() -> Option<Url> {
        Some(Url::parse("https://relay.example.com/ping").unwrap())
    }

    /// Run the pinger across `intervals` full intervals, then cancel it.
    async fn run_for(pinger: Pinger, intervals: u32) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(pinger.run(cancel.clone()));
        tokio::time::sleep(INTERVAL * intervals + Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_call_per_interval() {
        let probe = Arc::new(RecordingProbe::default());
        let pinger = Pinger::new(target(), INTERVAL, probe.clone());

        // Ticks at 0, 300, 600, 900, 1200.
        run_for(pinger, 4).await;

        let calls = probe.calls.lock().unwrap();
        assert_eq!(calls.len(), 5);
        assert!(calls.iter().all(|c| c == "https://relay.example.com/ping"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_stop_ticks() {
        let probe = Arc::new(RecordingProbe {
            fail_on: vec![1],
            ..Default::default()
        });
        let pinger = Pinger::new(target(), INTERVAL, probe.clone());

        run_for(pinger, 4).await;

        assert_eq!(probe.calls.lock().unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_target_makes_no_calls() {
        let probe = Arc::new(RecordingProbe::default());
        let pinger = Pinger::new(None, INTERVAL, probe.clone());

        run_for(pinger, 10).await;

        assert!(probe.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tick_outcomes() {
        let probe = Arc::new(RecordingProbe {
            fail_on: vec![0],
            ..Default::default()
        });
        let pinger = Pinger::new(target(), INTERVAL, probe.clone());
        assert_eq!(pinger.tick().await, PingOutcome::Failed);
        assert_eq!(pinger.tick().await, PingOutcome::Sent(StatusCode::OK));

        let idle = Pinger::new(None, INTERVAL, probe);
        assert_eq!(idle.tick().await, PingOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_exits() {
        let probe = Arc::new(RecordingProbe::default());
        let pinger = Pinger::new(target(), INTERVAL, probe.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        pinger.run(cancel).await;
        assert!(probe.calls.lock().unwrap().is_empty());
    }
}
