use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;

use super::{OpenWager, Placement, WagerProvider, WagerRequest};
use crate::session::models::Strategy;

/// How the paper exchange decides a settled order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperOutcome {
    Random,
    AlwaysWin,
    AlwaysLose,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    market_id: String,
    strategy: Strategy,
    stake: f64,
}

/// Simulated exchange. Orders clear `settle_after` their recorded placement
/// time; a repeated customer ref returns the existing order.
///
/// The book lives in memory. Settlement is keyed on the wager the caller
/// recorded, so an order placed by an earlier process still settles, and
/// an outcome, once decided, stays fixed for the life of the process.
pub struct PaperExchange {
    orders: DashMap<String, PaperOrder>,
    outcomes: DashMap<String, bool>,
    settle_after: Duration,
    outcome: PaperOutcome,
}

impl PaperExchange {
    pub fn new(settle_after: Duration) -> Self {
        Self {
            orders: DashMap::new(),
            outcomes: DashMap::new(),
            settle_after,
            outcome: PaperOutcome::Random,
        }
    }

    pub fn with_outcome(mut self, outcome: PaperOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn open_orders(&self) -> usize {
        self.orders
            .iter()
            .filter(|o| !self.outcomes.contains_key(o.key()))
            .count()
    }

    fn decide(&self) -> bool {
        match self.outcome {
            PaperOutcome::Random => rand::thread_rng().gen_bool(0.5),
            PaperOutcome::AlwaysWin => true,
            PaperOutcome::AlwaysLose => false,
        }
    }
}

#[async_trait]
impl WagerProvider for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn place_wager(&self, request: &WagerRequest) -> Result<Placement> {
        if request.stake <= 0.0 {
            return Ok(Placement::Incomplete {
                reason: format!("stake must be positive, got {}", request.stake),
            });
        }
        let order = self
            .orders
            .entry(request.customer_ref.clone())
            .or_insert_with(|| PaperOrder {
                market_id: format!("paper.{}", request.customer_ref),
                strategy: request.strategy,
                stake: request.stake,
            });
        tracing::debug!(
            customer_ref = %request.customer_ref,
            market_id = %order.market_id,
            strategy = %order.strategy,
            stake = order.stake,
            "paper order on book"
        );
        Ok(Placement::Placed {
            market_id: order.market_id.clone(),
        })
    }

    async fn settlement(&self, wager: &OpenWager) -> Result<Option<bool>> {
        if let Some(won) = self.outcomes.get(&wager.customer_ref) {
            return Ok(Some(*won));
        }
        let elapsed = (chrono::Utc::now() - wager.placed_at).to_std().unwrap_or_default();
        if elapsed < self.settle_after {
            return Ok(None);
        }
        let won = *self
            .outcomes
            .entry(wager.customer_ref.clone())
            .or_insert_with(|| self.decide());
        tracing::debug!(customer_ref = %wager.customer_ref, market_id = %wager.market_id, won, "paper order settled");
        Ok(Some(won))
    }
}
