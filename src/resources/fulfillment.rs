// resources/fulfillment.rs - Bounded gather/craft/check loop

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Bom, Holdings, Materials, ResourceCoordinator, Shortfall};
use crate::observability::record_fulfillment_attempt;

/// Gather rounds before the fallback takes over
pub const DEFAULT_MAX_FULFILLMENT_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct FulfillmentPolicy {
    pub max_attempts: u32,
    /// Pause between unsuccessful rounds
    pub attempt_delay: Duration,
}

impl Default for FulfillmentPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_FULFILLMENT_ATTEMPTS,
            attempt_delay: Duration::from_millis(100),
        }
    }
}

/// Source of new materials for the fulfillment loop
#[async_trait]
pub trait Gatherer: Send {
    /// Run one gathering round aimed at `shortfall`; returns what was obtained
    ///
    /// An error costs the round but does not end the loop.
    async fn gather(&mut self, shortfall: &Shortfall, attempt: u32) -> anyhow::Result<Holdings>;

    /// Called with the running holdings after every completed round
    fn record_progress(&mut self, _holdings: &Holdings) {}
}

#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error("Fulfillment cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FulfillmentOutcome {
    /// Gather rounds run
    pub attempts: u32,
    /// Rounds whose gather returned an error
    pub failed_rounds: u32,
    pub crafted: Materials,
    /// Materials added by the fallback, empty if gathering sufficed
    pub fallback_injected: Materials,
}

impl FulfillmentOutcome {
    pub fn used_fallback(&self) -> bool {
        !self.fallback_injected.is_empty()
    }
}

impl ResourceCoordinator {
    /// Gather and craft until `holdings` satisfy `bom`
    ///
    /// Runs at most `max_attempts` rounds, then injects whatever is still
    /// missing, so a successful return always leaves `bom` satisfied. A round
    /// whose gather fails counts as an unsuccessful attempt. Cancellation is
    /// checked between rounds.
    pub async fn fulfill<G>(
        &self,
        actor: &str,
        bom: &Bom,
        holdings: &mut Holdings,
        gatherer: &mut G,
        cancel: &CancellationToken,
    ) -> Result<FulfillmentOutcome, FulfillmentError>
    where
        G: Gatherer + ?Sized,
    {
        let mut outcome = FulfillmentOutcome::default();
        let max_attempts = self.policy().max_attempts;

        while outcome.attempts < max_attempts {
            if cancel.is_cancelled() {
                return Err(FulfillmentError::Cancelled);
            }

            let Some(shortfall) = self.first_shortfall(bom, holdings) else {
                debug!(actor, attempts = outcome.attempts, "Requirements satisfied");
                return Ok(outcome);
            };

            outcome.attempts += 1;
            let attempt = outcome.attempts;
            record_fulfillment_attempt(actor);

            match gatherer.gather(&shortfall, attempt).await {
                Ok(gathered) => holdings.merge(&gathered),
                Err(_) if cancel.is_cancelled() => return Err(FulfillmentError::Cancelled),
                Err(error) => {
                    outcome.failed_rounds += 1;
                    warn!(actor, attempt, max_attempts, error = %error, "Gathering round failed");
                }
            }
            outcome.crafted.merge(&self.attempt_craft(bom, holdings));
            gatherer.record_progress(holdings);

            if self.is_satisfied(bom, holdings) {
                debug!(actor, attempts = attempt, "Requirements satisfied");
                return Ok(outcome);
            }

            info!(
                actor,
                attempt,
                max_attempts,
                held = %holdings,
                required = %bom,
                "Requirements not yet met"
            );

            if attempt < max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(FulfillmentError::Cancelled),
                    _ = tokio::time::sleep(self.policy().attempt_delay) => {}
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(FulfillmentError::Cancelled);
        }
        outcome.fallback_injected = self.inject_fallback(actor, bom, holdings);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ConversionTable;
    use std::sync::Arc;

    struct FixedYield {
        material: &'static str,
        per_round: u64,
        rounds: u32,
    }

    #[async_trait]
    impl Gatherer for FixedYield {
        async fn gather(&mut self, _shortfall: &Shortfall, _attempt: u32) -> anyhow::Result<Holdings> {
            self.rounds += 1;
            Ok([(self.material, self.per_round)].into_iter().collect())
        }
    }

    /// Fails its first `failures` rounds, then yields `per_round` WOOD
    struct Flaky {
        failures: u32,
        per_round: u64,
        progress: Vec<Holdings>,
    }

    #[async_trait]
    impl Gatherer for Flaky {
        async fn gather(&mut self, _shortfall: &Shortfall, attempt: u32) -> anyhow::Result<Holdings> {
            if attempt <= self.failures {
                anyhow::bail!("pickaxe broke");
            }
            Ok([("WOOD", self.per_round)].into_iter().collect())
        }

        fn record_progress(&mut self, holdings: &Holdings) {
            self.progress.push(holdings.clone());
        }
    }

    fn coordinator(max_attempts: u32) -> ResourceCoordinator {
        ResourceCoordinator::new(
            Arc::new(ConversionTable::standard()),
            FulfillmentPolicy {
                max_attempts,
                attempt_delay: Duration::from_millis(1),
            },
        )
    }

    fn planks(quantity: u64) -> Bom {
        [("WOOD_PLANKS", quantity)].into_iter().collect()
    }

    #[tokio::test]
    async fn test_gathers_and_crafts_until_satisfied() {
        let rc = coordinator(10);
        let mut held = Holdings::new();
        let mut gatherer = FixedYield { material: "WOOD", per_round: 5, rounds: 0 };

        let outcome = rc
            .fulfill("miner", &planks(40), &mut held, &mut gatherer, &CancellationToken::new())
            .await
            .unwrap();

        // 5 WOOD is only 20 planks; the second round crafts all 40
        assert_eq!(outcome.attempts, 2);
        assert!(!outcome.used_fallback());
        assert_eq!(outcome.crafted.get("WOOD_PLANKS"), 40);
        assert_eq!(held.get("WOOD_PLANKS"), 40);
        assert_eq!(held.get("WOOD"), 0);
    }

    #[tokio::test]
    async fn test_already_satisfied_runs_no_rounds() {
        let rc = coordinator(10);
        let mut held: Holdings = [("WOOD", 10)].into_iter().collect();
        let mut gatherer = FixedYield { material: "WOOD", per_round: 1, rounds: 0 };

        let outcome = rc
            .fulfill("miner", &planks(40), &mut held, &mut gatherer, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 0);
        assert_eq!(gatherer.rounds, 0);
    }

    #[tokio::test]
    async fn test_fallback_termination() {
        let rc = coordinator(10);
        let mut held = Holdings::new();
        let mut gatherer = FixedYield { material: "DIRT", per_round: 3, rounds: 0 };
        let bom: Bom = [("STONE", 80), ("TORCH", 4)].into_iter().collect();

        let outcome = rc
            .fulfill("miner", &bom, &mut held, &mut gatherer, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 10);
        assert_eq!(gatherer.rounds, 10);
        assert_eq!(outcome.fallback_injected.get("STONE"), 80);
        assert_eq!(outcome.fallback_injected.get("TORCH"), 4);
        assert!(rc.is_satisfied(&bom, &held));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let rc = coordinator(10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = rc
            .fulfill(
                "miner",
                &planks(4),
                &mut Holdings::new(),
                &mut FixedYield { material: "WOOD", per_round: 0, rounds: 0 },
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(FulfillmentError::Cancelled)));
    }

    #[tokio::test]
    async fn test_gather_error_is_a_failed_round() {
        let rc = coordinator(10);
        let mut held = Holdings::new();
        let mut gatherer = Flaky { failures: 1, per_round: 10, progress: Vec::new() };

        let outcome = rc
            .fulfill("miner", &planks(40), &mut held, &mut gatherer, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.failed_rounds, 1);
        assert!(!outcome.used_fallback());
        assert_eq!(held.get("WOOD_PLANKS"), 40);
    }

    #[tokio::test]
    async fn test_persistent_gather_errors_end_in_fallback() {
        let rc = coordinator(3);
        let mut held = Holdings::new();
        let mut gatherer = Flaky { failures: u32::MAX, per_round: 0, progress: Vec::new() };

        let bom: Bom = [("STONE", 4)].into_iter().collect();

        let outcome = rc
            .fulfill("miner", &bom, &mut held, &mut gatherer, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.failed_rounds, 3);
        assert_eq!(outcome.fallback_injected.get("STONE"), 4);
        assert!(rc.is_satisfied(&bom, &held));
    }

    #[tokio::test]
    async fn test_progress_reported_after_each_round() {
        let rc = coordinator(10);
        let mut held = Holdings::new();
        let mut gatherer = Flaky { failures: 1, per_round: 3, progress: Vec::new() };
        let bom: Bom = [("WOOD", 9)].into_iter().collect();

        rc.fulfill("miner", &bom, &mut held, &mut gatherer, &CancellationToken::new())
            .await
            .unwrap();

        let wood: Vec<u64> = gatherer.progress.iter().map(|h| h.get("WOOD")).collect();
        assert_eq!(wood, vec![0, 3, 6, 9]);
    }
}
