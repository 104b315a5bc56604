//! Investment gateway: places and settles the wager that fixes a session's target.
//!
//! Three phases mirror the session statuses:
//!
//! | Phase | Session status | Gateway effect |
//! |-------|----------------|----------------|
//! | `invest` | Judged → Investing | pending `InvestmentRecord`, strategy chosen |
//! | `execute_investment` | Investing → Invested | wager placed under a stable customer ref |
//! | `resolve_investment` | Invested → InvestmentResolved | settlement read, target derived |
//!
//! The gateway owns the `investments` collection. It never writes sessions;
//! it returns `data` patches that the orchestrator merges and persists.
//! Record writes are compare-and-set, so processes sharing one store agree
//! on a single order and a single settled outcome per session.

pub mod paper;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use super::models::{ImageIdx, InvestmentRecord, InvestmentStatus, Session, Strategy};
use super::store::{Repository, Versioned};
use crate::errors::SessionError;

pub use paper::{PaperExchange, PaperOutcome};

/// What the backend is asked to place.
#[derive(Debug, Clone, PartialEq)]
pub struct WagerRequest {
    /// Stable per session; backends treat a repeated ref as the same order.
    pub customer_ref: String,
    pub strategy: Strategy,
    pub stake: f64,
}

/// A placed wager, as the gateway recorded it.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenWager {
    pub customer_ref: String,
    pub market_id: String,
    pub placed_at: DateTime<Utc>,
}

/// Outcome of a placement attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// Every leg of the wager is on the book.
    Placed { market_id: String },
    /// Some or all legs were not matched; try again later.
    Incomplete { reason: String },
}

#[async_trait]
pub trait WagerProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn place_wager(&self, request: &WagerRequest) -> anyhow::Result<Placement>;

    /// `Some(won)` once the order has cleared, `None` while it is still open.
    async fn settlement(&self, wager: &OpenWager) -> anyhow::Result<Option<bool>>;
}

/// Result of `execute_investment`.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Placed { data: Map<String, Value> },
    NotPlaced { reason: String },
}

/// Result of `resolve_investment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Unsettled,
    Settled { won: bool, target: ImageIdx },
}

/// Target image for a settled wager: the chosen image on a win, the other one on a loss.
pub fn target_for(chosen: ImageIdx, won: bool) -> ImageIdx {
    if won { chosen } else { chosen.other() }
}

pub struct InvestmentGateway {
    provider: Arc<dyn WagerProvider>,
    repo: Repository,
    stake: f64,
    timeout: Duration,
}

impl InvestmentGateway {
    pub fn new(provider: Arc<dyn WagerProvider>, repo: Repository, stake: f64, timeout: Duration) -> Self {
        Self {
            provider,
            repo,
            stake,
            timeout,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Record the intent to wager and pick the strategy from the chosen image.
    pub async fn invest(&self, session: &Session) -> Result<Map<String, Value>, SessionError> {
        let chosen = chosen_idx(session)?;
        let record = match self.repo.get::<InvestmentRecord>(&session.id).await? {
            Some(record) => record,
            None => {
                let record = InvestmentRecord {
                    id: session.id.clone(),
                    provider: self.provider.name().to_string(),
                    strategy_idx: chosen,
                    strategy: Strategy::from(chosen),
                    status: InvestmentStatus::Pending,
                    customer_ref: Some(customer_ref_for(&session.id)),
                    market_id: None,
                    won: None,
                    target_idx: None,
                    created_at: Utc::now(),
                    placed_at: None,
                    resolved_at: None,
                };
                // Another process may have created it first; keep theirs.
                match self.repo.save_if_version(&record, 0).await? {
                    Some(_) => record,
                    None => self.record_for(session).await?.record,
                }
            }
        };

        tracing::debug!(session_id = %session.id, strategy = %record.strategy, "investment recorded");
        let mut patch = Map::new();
        patch.insert("strategyIdx".into(), json!(record.strategy_idx));
        Ok(patch)
    }

    /// Place the wager, unless this session's wager is already on the book.
    ///
    /// The customer ref is derived from the session id, so every caller in
    /// every process sends the same ref and the backend sees one order.
    pub async fn execute_investment(&self, session: &Session) -> Result<Execution, SessionError> {
        let Versioned { record, version } = self.record_for(session).await?;
        if let Some(placed) = already_placed(&record) {
            tracing::info!(session_id = %session.id, "wager already placed, reusing");
            return Ok(placed);
        }

        let customer_ref = record
            .customer_ref
            .clone()
            .unwrap_or_else(|| customer_ref_for(&session.id));
        let request = WagerRequest {
            customer_ref: customer_ref.clone(),
            strategy: record.strategy,
            stake: self.stake,
        };
        let placement = self
            .call("place_wager", self.provider.place_wager(&request))
            .await?;

        let market_id = match placement {
            Placement::Placed { market_id } => market_id,
            Placement::Incomplete { reason } => {
                tracing::info!(session_id = %session.id, %customer_ref, %reason, "wager not fully placed");
                return Ok(Execution::NotPlaced { reason });
            }
        };

        let mut record = record;
        record.status = InvestmentStatus::Active;
        record.customer_ref = Some(customer_ref.clone());
        record.market_id = Some(market_id.clone());
        record.placed_at = Some(Utc::now());
        if self.repo.save_if_version(&record, version).await?.is_none() {
            // A concurrent caller recorded the same order first.
            let current = self.record_for(session).await?.record;
            return already_placed(&current).ok_or_else(|| SessionError::Conflict {
                id: session.id.clone(),
            });
        }
        tracing::info!(session_id = %session.id, %customer_ref, %market_id, "wager placed");
        Ok(Execution::Placed {
            data: placement_patch(&customer_ref, &market_id),
        })
    }

    /// Check settlement; the first settled read to reach the store fixes the
    /// outcome, and every later read returns that outcome.
    pub async fn resolve_investment(&self, session: &Session) -> Result<Settlement, SessionError> {
        let chosen = chosen_idx(session)?;
        let Versioned { mut record, version } = self.record_for(session).await?;

        if let Some(settled) = recorded_settlement(&record) {
            return Ok(settled);
        }

        let wager = match (&record.customer_ref, &record.market_id, record.placed_at) {
            (Some(customer_ref), Some(market_id), Some(placed_at)) => OpenWager {
                customer_ref: customer_ref.clone(),
                market_id: market_id.clone(),
                placed_at,
            },
            _ => {
                return Err(SessionError::InvestmentProvider(format!(
                    "session {} has no placed wager",
                    session.id
                )));
            }
        };

        let outcome = self
            .call("settlement", self.provider.settlement(&wager))
            .await?;
        let Some(won) = outcome else {
            tracing::debug!(session_id = %session.id, customer_ref = %wager.customer_ref, "wager not settled yet");
            return Ok(Settlement::Unsettled);
        };

        let target = target_for(chosen, won);
        record.status = InvestmentStatus::Completed;
        record.won = Some(won);
        record.target_idx = Some(target);
        record.resolved_at = Some(Utc::now());
        if self.repo.save_if_version(&record, version).await?.is_none() {
            let current = self.record_for(session).await?.record;
            return recorded_settlement(&current).ok_or_else(|| SessionError::Conflict {
                id: session.id.clone(),
            });
        }
        tracing::info!(session_id = %session.id, won, target = %target, "wager settled");
        Ok(Settlement::Settled { won, target })
    }

    async fn record_for(&self, session: &Session) -> Result<Versioned<InvestmentRecord>, SessionError> {
        self.repo
            .get_versioned::<InvestmentRecord>(&session.id)
            .await?
            .ok_or_else(|| {
                SessionError::InvestmentProvider(format!(
                    "no investment recorded for session {}",
                    session.id
                ))
            })
    }

    async fn call<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, SessionError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(SessionError::InvestmentProvider(format!(
                "{} {} failed: {:#}",
                self.provider.name(),
                operation,
                e
            ))),
            Err(_) => Err(SessionError::InvestmentProvider(format!(
                "{} {} timed out after {:?}",
                self.provider.name(),
                operation,
                self.timeout
            ))),
        }
    }
}

fn chosen_idx(session: &Session) -> Result<ImageIdx, SessionError> {
    session.chosen_image_idx.ok_or_else(|| {
        SessionError::BadRequest(format!("session {} has no judged image", session.id))
    })
}

/// The customer ref every backend sees for a session's wager.
pub fn customer_ref_for(session_id: &str) -> String {
    format!("arv-{}", session_id)
}

fn placement_patch(customer_ref: &str, market_id: &str) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("customerRef".into(), json!(customer_ref));
    patch.insert("marketId".into(), json!(market_id));
    patch
}

fn already_placed(record: &InvestmentRecord) -> Option<Execution> {
    if record.status == InvestmentStatus::Pending {
        return None;
    }
    match (&record.customer_ref, &record.market_id) {
        (Some(customer_ref), Some(market_id)) => Some(Execution::Placed {
            data: placement_patch(customer_ref, market_id),
        }),
        _ => None,
    }
}

fn recorded_settlement(record: &InvestmentRecord) -> Option<Settlement> {
    if record.status != InvestmentStatus::Completed {
        return None;
    }
    match (record.won, record.target_idx) {
        (Some(won), Some(target)) => Some(Settlement::Settled { won, target }),
        _ => None,
    }
}
