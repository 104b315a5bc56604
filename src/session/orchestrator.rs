//! Session state machine.
//!
//! Every transition follows the same shape: claim the session in the
//! in-flight registry, load it fresh with its store version, check the
//! precondition status, call at most one gateway, then write the whole
//! record back with compare-and-set. Gateway failures return before the
//! write, so the stored session is always entirely old or entirely new.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};

use super::images::ImageSource;
use super::investment::{Execution, InvestmentGateway, Settlement};
use super::judge::JudgeGateway;
use super::models::{Session, SessionStats, SessionStatus};
use super::stats::compute_stats;
use super::store::{Filter, Repository, Versioned, filter_eq};
use crate::errors::SessionError;

/// Outcome of one transition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The session moved to its next status.
    Advanced(Session),
    /// Preconditions held but the outside world is not ready yet
    /// (wager not fully placed, or not yet settled). Nothing was written.
    Waiting(Session),
}

impl Step {
    pub fn session(&self) -> &Session {
        match self {
            Self::Advanced(s) | Self::Waiting(s) => s,
        }
    }

    pub fn into_session(self) -> Session {
        match self {
            Self::Advanced(s) | Self::Waiting(s) => s,
        }
    }

    pub fn advanced(&self) -> bool {
        matches!(self, Self::Advanced(_))
    }
}

/// Releases a session's in-flight claim on drop.
struct InFlight {
    registry: Arc<DashMap<String, ()>>,
    id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

#[derive(Clone)]
pub struct SessionOrchestrator {
    repo: Repository,
    images: Arc<dyn ImageSource>,
    judge: Arc<JudgeGateway>,
    investment: Arc<InvestmentGateway>,
    in_flight: Arc<DashMap<String, ()>>,
}

impl SessionOrchestrator {
    pub fn new(
        repo: Repository,
        images: Arc<dyn ImageSource>,
        judge: JudgeGateway,
        investment: InvestmentGateway,
    ) -> Self {
        Self {
            repo,
            images,
            judge: Arc::new(judge),
            investment: Arc::new(investment),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub async fn get_session(&self, id: &str) -> Result<Session, SessionError> {
        Ok(self.load(id).await?.record)
    }

    pub async fn get_sessions(&self) -> Result<Vec<Session>, SessionError> {
        Ok(self.repo.all::<Session>().await?)
    }

    pub async fn query(&self, filter: &Filter) -> Result<Vec<Session>, SessionError> {
        Ok(self.repo.query::<Session>(filter).await?)
    }

    pub async fn sessions_with_status(&self, status: SessionStatus) -> Result<Vec<Session>, SessionError> {
        self.query(&filter_eq("status", status.as_str())).await
    }

    pub async fn stats(&self) -> Result<SessionStats, SessionError> {
        Ok(compute_stats(&self.get_sessions().await?))
    }

    // ── Creation and activation ───────────────────────────────────────

    pub async fn create_session(&self) -> Result<Session, SessionError> {
        let images = self
            .images
            .pick_two_distinct()
            .await
            .map_err(|e| SessionError::ImagesUnavailable(format!("{:#}", e)))?;
        let session = Session::new(uuid::Uuid::new_v4().to_string(), images);
        let session = self.commit(session, 0).await?;
        tracing::info!(session_id = %session.id, images = ?session.images, "session created");
        Ok(session)
    }

    /// New → Unjudged. Stores the impression; judging happens later.
    pub async fn record_impression(&self, id: &str, impression: &str) -> Result<Session, SessionError> {
        let impression = impression.trim();
        if impression.is_empty() {
            return Err(SessionError::BadRequest("impression text must not be empty".into()));
        }
        let (_claim, current) = self.begin(id, SessionStatus::New).await?;
        let mut session = current.record;
        session.impression_text = Some(impression.to_string());
        session.status = SessionStatus::Unjudged;
        let session = self.commit(session, current.version).await?;
        tracing::info!(session_id = %id, "impression recorded");
        Ok(session)
    }

    /// Record the impression and start the judge → invest → execute chain
    /// in the background. Returns as soon as the session is Unjudged.
    pub async fn activate_session(&self, id: &str, impression: &str) -> Result<Session, SessionError> {
        let session = self.record_impression(id, impression).await?;
        let this = self.clone();
        let id = session.id.clone();
        tokio::spawn(async move {
            if let Err(e) = this.drive(&id).await {
                log_transition_error(&id, &e);
            }
        });
        Ok(session)
    }

    /// Run transitions that need no user input until one does not advance.
    /// Settlement is left to the sweeper.
    pub async fn drive(&self, id: &str) -> Result<Session, SessionError> {
        let mut session = self.get_session(id).await?;
        loop {
            let step = match session.status {
                SessionStatus::Unjudged => self.judge_session(id).await?,
                SessionStatus::Judged => self.invest(id).await?,
                SessionStatus::Investing => self.execute_investment(id).await?,
                _ => return Ok(session),
            };
            match step {
                Step::Advanced(next) => session = next,
                Step::Waiting(current) => return Ok(current),
            }
        }
    }

    // ── Transitions ───────────────────────────────────────────────────

    /// Unjudged → Judged.
    pub async fn judge_session(&self, id: &str) -> Result<Step, SessionError> {
        let (_claim, current) = self.begin(id, SessionStatus::Unjudged).await?;
        let mut session = current.record;

        if session.chosen_image_idx.is_none() {
            let impression = session
                .impression_text
                .clone()
                .filter(|text| !text.trim().is_empty())
                .ok_or_else(|| {
                    SessionError::BadRequest(format!("session {} has no impression", id))
                })?;
            let paths = [
                self.images.path_for(&session.images[0]),
                self.images.path_for(&session.images[1]),
            ];
            let chosen = self.judge.judge(&paths, &impression).await?;
            session.chosen_image_idx = Some(chosen);
        }

        session.status = SessionStatus::Judged;
        let session = self.commit(session, current.version).await?;
        tracing::info!(session_id = %id, chosen = ?session.chosen_image_idx, "session judged");
        Ok(Step::Advanced(session))
    }

    /// Judged → Investing.
    pub async fn invest(&self, id: &str) -> Result<Step, SessionError> {
        let (_claim, current) = self.begin(id, SessionStatus::Judged).await?;
        let mut session = current.record;
        let patch = self.investment.invest(&session).await?;
        merge_data(&mut session.data, patch);
        session.status = SessionStatus::Investing;
        let session = self.commit(session, current.version).await?;
        tracing::info!(session_id = %id, "investment recorded");
        Ok(Step::Advanced(session))
    }

    /// Investing → Invested, once every leg of the wager is placed.
    pub async fn execute_investment(&self, id: &str) -> Result<Step, SessionError> {
        let (_claim, current) = self.begin(id, SessionStatus::Investing).await?;
        let mut session = current.record;
        match self.investment.execute_investment(&session).await? {
            Execution::Placed { data } => {
                merge_data(&mut session.data, data);
                session.status = SessionStatus::Invested;
                let session = self.commit(session, current.version).await?;
                tracing::info!(session_id = %id, "investment executed");
                Ok(Step::Advanced(session))
            }
            Execution::NotPlaced { reason } => {
                tracing::debug!(session_id = %id, %reason, "investment not placed, staying in investing");
                Ok(Step::Waiting(session))
            }
        }
    }

    /// Invested → InvestmentResolved, once the wager has settled.
    pub async fn resolve_investment(&self, id: &str) -> Result<Step, SessionError> {
        let (_claim, current) = self.begin(id, SessionStatus::Invested).await?;
        let mut session = current.record;
        match self.investment.resolve_investment(&session).await? {
            Settlement::Unsettled => Ok(Step::Waiting(session)),
            Settlement::Settled { won, target } => {
                let target = *session.target_image_idx.get_or_insert(target);
                session.status = SessionStatus::InvestmentResolved;
                let session = self.commit(session, current.version).await?;
                tracing::info!(session_id = %id, won, target = %target, "investment resolved");
                Ok(Step::Advanced(session))
            }
        }
    }

    /// InvestmentResolved → ShownFeedback.
    pub async fn shown_feedback(&self, id: &str) -> Result<Step, SessionError> {
        let (_claim, current) = self.begin(id, SessionStatus::InvestmentResolved).await?;
        let mut session = current.record;
        session.status = SessionStatus::ShownFeedback;
        let session = self.commit(session, current.version).await?;
        tracing::info!(session_id = %id, win = ?session.is_win(), "feedback shown");
        Ok(Step::Advanced(session))
    }

    /// Run the transition whose precondition is `from`.
    pub async fn apply(&self, id: &str, from: SessionStatus) -> Result<Step, SessionError> {
        match from {
            SessionStatus::Unjudged => self.judge_session(id).await,
            SessionStatus::Judged => self.invest(id).await,
            SessionStatus::Investing => self.execute_investment(id).await,
            SessionStatus::Invested => self.resolve_investment(id).await,
            SessionStatus::InvestmentResolved => self.shown_feedback(id).await,
            SessionStatus::New => Err(SessionError::BadRequest(format!(
                "session {} is waiting for an impression",
                id
            ))),
            SessionStatus::ShownFeedback => Err(SessionError::BadRequest(format!(
                "session {} is already complete",
                id
            ))),
        }
    }

    /// Run whichever transition the session's current status calls for.
    pub async fn advance(&self, id: &str) -> Result<Step, SessionError> {
        let status = self.get_session(id).await?.status;
        self.apply(id, status).await
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn claim(&self, id: &str) -> Result<InFlight, SessionError> {
        match self.in_flight.entry(id.to_string()) {
            Entry::Occupied(_) => Err(SessionError::Conflict { id: id.to_string() }),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(InFlight {
                    registry: self.in_flight.clone(),
                    id: id.to_string(),
                })
            }
        }
    }

    async fn load(&self, id: &str) -> Result<Versioned<Session>, SessionError> {
        self.repo
            .get_versioned::<Session>(id)
            .await?
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    async fn begin(
        &self,
        id: &str,
        expected: SessionStatus,
    ) -> Result<(InFlight, Versioned<Session>), SessionError> {
        let claim = self.claim(id)?;
        let current = self.load(id).await?;
        if current.record.status != expected {
            return Err(SessionError::InvalidState {
                id: id.to_string(),
                expected,
                actual: current.record.status,
            });
        }
        Ok((claim, current))
    }

    async fn commit(&self, session: Session, version: u64) -> Result<Session, SessionError> {
        match self.repo.save_if_version(&session, version).await? {
            Some(_) => Ok(session),
            None => Err(SessionError::Conflict {
                id: session.id.clone(),
            }),
        }
    }
}

fn merge_data(data: &mut Map<String, Value>, patch: Map<String, Value>) {
    data.extend(patch);
}

/// Log a failed transition at a level matching how much it matters.
pub fn log_transition_error(id: &str, e: &SessionError) {
    if e.is_benign() {
        tracing::debug!(session_id = %id, error = %e, "transition skipped");
    } else if e.is_retryable() {
        tracing::warn!(session_id = %id, error = %e, "transition failed, will retry");
    } else {
        tracing::error!(session_id = %id, error = %e, "transition failed");
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::orchestrator;
    use super::*;
    use crate::session::investment::Placement;
    use crate::session::investment::testing::ScriptedWagers;
    use crate::session::judge::testing::ScriptedJudge;
    use crate::session::models::{ImageIdx, InvestmentRecord};

    async fn at_status(orch: &SessionOrchestrator, status: SessionStatus) -> Session {
        let session = orch.create_session().await.unwrap();
        if status == SessionStatus::New {
            return session;
        }
        orch.record_impression(&session.id, "bright warm room").await.unwrap();
        let mut current = orch.get_session(&session.id).await.unwrap();
        while current.status < status {
            current = orch.advance(&session.id).await.unwrap().into_session();
        }
        current
    }

    #[tokio::test]
    async fn test_create_session_is_new_with_distinct_images() {
        let orch = orchestrator(Arc::new(ScriptedJudge::always(0)), Arc::new(ScriptedWagers::new()));
        let session = orch.create_session().await.unwrap();
        assert_eq!(session.status, SessionStatus::New);
        assert_ne!(session.images[0], session.images[1]);
        assert_eq!(orch.get_session(&session.id).await.unwrap(), session);
    }

    #[tokio::test]
    async fn test_record_impression_rejects_blank_text() {
        let orch = orchestrator(Arc::new(ScriptedJudge::always(0)), Arc::new(ScriptedWagers::new()));
        let session = orch.create_session().await.unwrap();
        let err = orch.record_impression(&session.id, "   ").await.unwrap_err();
        assert!(matches!(err, SessionError::BadRequest(_)));
        assert_eq!(orch.get_session(&session.id).await.unwrap().status, SessionStatus::New);
    }

    #[tokio::test]
    async fn test_second_activation_is_invalid_state() {
        let orch = orchestrator(Arc::new(ScriptedJudge::always(0)), Arc::new(ScriptedWagers::new()));
        let session = orch.create_session().await.unwrap();
        orch.record_impression(&session.id, "first").await.unwrap();
        let err = orch.record_impression(&session.id, "second").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                actual: SessionStatus::Unjudged,
                ..
            }
        ));
        let stored = orch.get_session(&session.id).await.unwrap();
        assert_eq!(stored.impression_text.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let orch = orchestrator(Arc::new(ScriptedJudge::always(0)), Arc::new(ScriptedWagers::new()));
        let err = orch.judge_session("nope").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_judge_failure_leaves_session_unjudged() {
        let orch = orchestrator(Arc::new(ScriptedJudge::new([None])), Arc::new(ScriptedWagers::new()));
        let session = at_status(&orch, SessionStatus::Unjudged).await;
        let err = orch.judge_session(&session.id).await.unwrap_err();
        assert!(matches!(err, SessionError::JudgeUnavailable(_)));
        let stored = orch.get_session(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Unjudged);
        assert_eq!(stored.chosen_image_idx, None);
    }

    #[tokio::test]
    async fn test_repeated_transition_leaves_record_unchanged() {
        let judge = Arc::new(ScriptedJudge::always(1));
        let orch = orchestrator(judge.clone(), Arc::new(ScriptedWagers::new()));
        let session = at_status(&orch, SessionStatus::Unjudged).await;

        orch.judge_session(&session.id).await.unwrap();
        let after_first = orch.repository().get_versioned::<Session>(&session.id).await.unwrap().unwrap();
        let err = orch.judge_session(&session.id).await.unwrap_err();
        assert!(err.is_benign());
        let after_second = orch.repository().get_versioned::<Session>(&session.id).await.unwrap().unwrap();
        assert_eq!(after_first, after_second);
        assert_eq!(judge.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_incomplete_placement_stays_investing() {
        let wagers = Arc::new(ScriptedWagers::new().then_place(Ok(Placement::Incomplete {
            reason: "unmatched".into(),
        })));
        let orch = orchestrator(Arc::new(ScriptedJudge::always(0)), wagers.clone());
        let session = at_status(&orch, SessionStatus::Investing).await;

        let step = orch.execute_investment(&session.id).await.unwrap();
        assert!(!step.advanced());
        assert_eq!(orch.get_session(&session.id).await.unwrap().status, SessionStatus::Investing);

        let step = orch.execute_investment(&session.id).await.unwrap();
        assert!(step.advanced());
        let invested = step.into_session();
        assert_eq!(invested.status, SessionStatus::Invested);
        assert!(invested.data.contains_key("customerRef"));
        assert_eq!(invested.data["strategyIdx"], 0);
        assert_eq!(wagers.placed_count(), 2);
    }

    #[tokio::test]
    async fn test_unsettled_wager_stays_invested() {
        let wagers = Arc::new(ScriptedWagers::new().then_settle(Ok(None)).then_settle(Ok(Some(false))));
        let orch = orchestrator(Arc::new(ScriptedJudge::always(1)), wagers);
        let session = at_status(&orch, SessionStatus::Invested).await;

        assert!(!orch.resolve_investment(&session.id).await.unwrap().advanced());
        let stored = orch.get_session(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Invested);
        assert_eq!(stored.target_image_idx, None);

        let resolved = orch.resolve_investment(&session.id).await.unwrap().into_session();
        assert_eq!(resolved.status, SessionStatus::InvestmentResolved);
        assert_eq!(resolved.chosen_image_idx, Some(ImageIdx::Second));
        assert_eq!(resolved.target_image_idx, Some(ImageIdx::First));
        assert_eq!(resolved.is_win(), Some(false));
    }

    #[tokio::test]
    async fn test_drive_stops_at_invested() {
        let orch = orchestrator(Arc::new(ScriptedJudge::always(0)), Arc::new(ScriptedWagers::new()));
        let session = at_status(&orch, SessionStatus::Unjudged).await;
        let driven = orch.drive(&session.id).await.unwrap();
        assert_eq!(driven.status, SessionStatus::Invested);
        let record = orch
            .repository()
            .get::<InvestmentRecord>(&session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.customer_ref.as_deref(), driven.data["customerRef"].as_str());
    }

    #[tokio::test]
    async fn test_activate_runs_chain_in_background() {
        let orch = orchestrator(Arc::new(ScriptedJudge::always(1)), Arc::new(ScriptedWagers::new()));
        let session = orch.create_session().await.unwrap();
        let activated = orch.activate_session(&session.id, "tall trees").await.unwrap();
        assert_eq!(activated.status, SessionStatus::Unjudged);

        let mut status = activated.status;
        for _ in 0..100 {
            status = orch.get_session(&session.id).await.unwrap().status;
            if status == SessionStatus::Invested {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(status, SessionStatus::Invested);
    }

    #[tokio::test]
    async fn test_in_flight_session_is_conflict() {
        let orch = orchestrator(Arc::new(ScriptedJudge::always(0)), Arc::new(ScriptedWagers::new()));
        let session = at_status(&orch, SessionStatus::Unjudged).await;
        let claim = orch.claim(&session.id).unwrap();
        let err = orch.judge_session(&session.id).await.unwrap_err();
        assert!(matches!(err, SessionError::Conflict { .. }));
        drop(claim);
        assert!(orch.judge_session(&session.id).await.unwrap().advanced());
    }

    #[tokio::test]
    async fn test_stale_write_is_conflict() {
        let orch = orchestrator(Arc::new(ScriptedJudge::always(0)), Arc::new(ScriptedWagers::new()));
        let session = at_status(&orch, SessionStatus::New).await;
        let stale = orch.repository().get_versioned::<Session>(&session.id).await.unwrap().unwrap();
        orch.record_impression(&session.id, "x").await.unwrap();
        let err = orch.commit(stale.record, stale.version).await.unwrap_err();
        assert!(matches!(err, SessionError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_advance_refuses_new_and_terminal() {
        let orch = orchestrator(Arc::new(ScriptedJudge::always(0)), Arc::new(ScriptedWagers::new()));
        let fresh = at_status(&orch, SessionStatus::New).await;
        assert!(matches!(
            orch.advance(&fresh.id).await.unwrap_err(),
            SessionError::BadRequest(_)
        ));

        let wagers = Arc::new(ScriptedWagers::new().then_settle(Ok(Some(true))));
        let orch = orchestrator(Arc::new(ScriptedJudge::always(0)), wagers);
        let done = at_status(&orch, SessionStatus::ShownFeedback).await;
        assert_eq!(done.target_image_idx, Some(ImageIdx::First));
        assert!(matches!(
            orch.advance(&done.id).await.unwrap_err(),
            SessionError::BadRequest(_)
        ));
        assert_eq!(orch.stats().await.unwrap().wins, 1);
    }
}
