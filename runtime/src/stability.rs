//! Decides when a loaded page is safe to read.
//!
//! A tick is stable when the result container saw no mutations since the
//! previous tick, no relevant request is in flight, the network has been idle
//! for `network_idle`, and one animation frame has passed after both checks.
//! The detector only observes: it never scrolls or clicks.

use crate::binding::PageBinding;
use crate::config::StabilityConfig;
use crate::error::{HarvestError, HarvestResult};
use serde::Serialize;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One tick's observations. Timestamps are milliseconds since the wait began;
/// `None` means nothing was seen during this wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilitySignal {
    /// Container mutations since the previous tick.
    pub mutation_count: u64,
    pub last_mutation_at: Option<u64>,
    pub pending_network_requests: usize,
    pub last_network_activity_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilityReport {
    pub ticks: u32,
    pub stable_ticks: u32,
    pub elapsed_ms: u64,
    pub last_signal: Option<StabilitySignal>,
}

enum Interrupt {
    Ceiling,
    Cancelled,
}

pub struct StabilityDetector {
    config: StabilityConfig,
}

impl StabilityDetector {
    pub fn new(config: StabilityConfig) -> Self {
        Self { config }
    }

    /// Poll until `required_stable_ticks` consecutive stable ticks.
    ///
    /// The wait ends with [`HarvestError::StabilityTimeout`] at the configured
    /// ceiling (clamped to `budget` when given) or when `cancel` fires.
    /// Fatal binding errors propagate; other binding errors count as an
    /// unstable tick.
    pub async fn until_stable(
        &self,
        binding: &dyn PageBinding,
        container: &str,
        budget: Option<Duration>,
        cancel: &CancellationToken,
    ) -> HarvestResult<StabilityReport> {
        let started = Instant::now();
        let ceiling = match budget {
            Some(b) => self.config.ceiling().min(b),
            None => self.config.ceiling(),
        };
        let deadline = tokio::time::sleep_until(started + ceiling);
        tokio::pin!(deadline);

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Arming tick: completes immediately and starts the mutation observer.
        interval.tick().await;
        binding.observe_mutations(container).await?;

        let mut report = StabilityReport {
            ticks: 0,
            stable_ticks: 0,
            elapsed_ms: 0,
            last_signal: None,
        };

        loop {
            let interrupt = tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(Interrupt::Cancelled),
                _ = &mut deadline => Some(Interrupt::Ceiling),
                _ = interval.tick() => None,
            };
            if let Some(interrupt) = interrupt {
                return Err(self.interrupted(interrupt, &report, started));
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Interrupt::Cancelled),
                _ = &mut deadline => Err(Interrupt::Ceiling),
                sampled = self.tick(binding, container, started, report.last_signal) => Ok(sampled),
            };
            report.ticks += 1;

            match outcome {
                Err(interrupt) => return Err(self.interrupted(interrupt, &report, started)),
                Ok(Err(e)) if e.is_fatal() => return Err(e),
                Ok(Err(e)) => {
                    warn!(error = %e, "stability sample failed; tick counted unstable");
                    report.stable_ticks = 0;
                }
                Ok(Ok((signal, quiet))) => {
                    report.last_signal = Some(signal);
                    report.stable_ticks = if quiet { report.stable_ticks + 1 } else { 0 };
                }
            }

            debug!(
                tick = report.ticks,
                stable_ticks = report.stable_ticks,
                signal = ?report.last_signal,
                "stability tick"
            );

            if report.stable_ticks >= self.config.required_stable_ticks {
                report.elapsed_ms = started.elapsed().as_millis() as u64;
                return Ok(report);
            }
        }
    }

    /// Sample the page once; on a quiet sample wait one animation frame.
    async fn tick(
        &self,
        binding: &dyn PageBinding,
        container: &str,
        started: Instant,
        previous: Option<StabilitySignal>,
    ) -> HarvestResult<(StabilitySignal, bool)> {
        let mutations = binding.observe_mutations(container).await?;
        let network = binding.network_activity().await?;
        let now = started.elapsed();
        let last_mutation_at = if mutations > 0 {
            Some(now.as_millis() as u64)
        } else {
            previous.and_then(|p| p.last_mutation_at)
        };
        let last_network_activity_at = now
            .checked_sub(network.idle_for)
            .map(|at| at.as_millis() as u64);
        let signal = StabilitySignal {
            mutation_count: mutations,
            last_mutation_at,
            pending_network_requests: network.in_flight,
            last_network_activity_at,
        };

        let quiet = signal.mutation_count == 0
            && signal.pending_network_requests == 0
            && network.idle_for >= self.config.network_idle();
        if quiet {
            binding.animation_frame().await?;
        }
        Ok((signal, quiet))
    }

    fn interrupted(&self, why: Interrupt, report: &StabilityReport, started: Instant) -> HarvestError {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match why {
            Interrupt::Cancelled => debug!(elapsed_ms, "stability wait cancelled"),
            Interrupt::Ceiling => warn!(
                elapsed_ms,
                stable_ticks = report.stable_ticks,
                "page did not stabilise before ceiling"
            ),
        }
        HarvestError::StabilityTimeout {
            elapsed_ms,
            stable_ticks: report.stable_ticks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::fixture::{FixturePage, FRAME};
    use crate::binding::{NetworkActivity, NoopBinding};

    fn detector() -> StabilityDetector {
        StabilityDetector::new(StabilityConfig::default())
    }

    fn page() -> FixturePage {
        FixturePage::new("https://x.test/", "<body><ul id='r'><li>a</li></ul></body>")
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_page_stable_after_ticks_plus_frame() {
        let started = Instant::now();
        let report = detector()
            .until_stable(&page(), "#r", None, &CancellationToken::new())
            .await
            .unwrap();
        let config = StabilityConfig::default();
        let bound = config.poll_interval() * config.required_stable_ticks + FRAME;
        assert!(started.elapsed() <= bound, "took {:?}", started.elapsed());
        assert_eq!(report.stable_ticks, 3);
        assert_eq!(report.ticks, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_reset_the_count() {
        let page = page().with_mutations([5, 0, 0, 0]);
        let report = detector()
            .until_stable(&page, "#r", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.ticks, 4);
        assert_eq!(report.stable_ticks, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_network_is_unstable() {
        let busy = NetworkActivity {
            in_flight: 1,
            idle_for: Duration::ZERO,
        };
        let recent = NetworkActivity::idle(Duration::from_millis(200));
        let page = page().with_network([busy, recent]);
        let report = detector()
            .until_stable(&page, "#r", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.ticks, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_tracks_last_activity() {
        let busy = NetworkActivity {
            in_flight: 1,
            idle_for: Duration::ZERO,
        };
        let page = page()
            .with_mutations([2, 0, 0, 0, 0, 0])
            .with_network([busy, NetworkActivity::idle(Duration::from_secs(60))]);
        let report = detector()
            .until_stable(&page, "#r", None, &CancellationToken::new())
            .await
            .unwrap();
        let signal = report.last_signal.unwrap();
        assert_eq!(signal.mutation_count, 0);
        assert_eq!(signal.pending_network_requests, 0);
        assert!(signal.last_mutation_at.is_some());
        assert_eq!(signal.last_network_activity_at, None);

        let json = serde_json::to_value(signal).unwrap();
        for key in ["mutationCount", "lastMutationAt", "pendingNetworkRequests", "lastNetworkActivityAt"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_times_out() {
        let page = page().with_mutations(std::iter::repeat(1).take(100));
        let started = Instant::now();
        let err = detector()
            .until_stable(&page, "#r", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::StabilityTimeout { stable_ticks: 0, .. }));
        assert_eq!(started.elapsed(), StabilityConfig::default().ceiling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_clamps_ceiling() {
        let page = page().with_mutations(std::iter::repeat(1).take(100));
        let started = Instant::now();
        let err = detector()
            .until_stable(
                &page,
                "#r",
                Some(Duration::from_millis(2500)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "stability_timeout");
        assert_eq!(started.elapsed(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_ends_like_timeout() {
        let token = CancellationToken::new();
        token.cancel();
        let err = detector()
            .until_stable(&page(), "#r", None, &token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "stability_timeout");
    }

    #[tokio::test]
    async fn test_unavailable_binding_is_fatal() {
        let err = detector()
            .until_stable(&NoopBinding, "body", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
