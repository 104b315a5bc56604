//! Builds the orchestrator and its collaborators from an `ArvConfig`.
//!
//! All wiring happens here, once, at process start. Backends are chosen
//! by the `backend` field of each config section.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{ANTHROPIC_KEY_ENV, ArvConfig, InvestmentBackend, JudgeBackend, StoreBackend};
use crate::session::api::AppState;
use crate::session::db::SqliteStore;
use crate::session::images::DirectoryImages;
use crate::session::investment::{InvestmentGateway, PaperExchange, WagerProvider};
use crate::session::judge::{AnthropicJudge, JudgeGateway, JudgeProvider, RandomJudge};
use crate::session::memory::MemoryStore;
use crate::session::orchestrator::SessionOrchestrator;
use crate::session::store::{Repository, Store};
use crate::session::sweeper::Sweeper;

pub fn open_store(config: &ArvConfig) -> Result<Arc<dyn Store>> {
    match config.toml.store.backend {
        StoreBackend::Sqlite => {
            let path = config.db_path();
            let store = SqliteStore::open(&path)
                .with_context(|| format!("Failed to open database at {}", path.display()))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

pub fn judge_provider(config: &ArvConfig) -> Result<Arc<dyn JudgeProvider>> {
    match config.toml.judge.backend {
        JudgeBackend::Anthropic => {
            let api_key = config.anthropic_api_key().with_context(|| {
                format!(
                    "{} is not set; set it or use [judge] backend = \"random\"",
                    ANTHROPIC_KEY_ENV
                )
            })?;
            let mut judge =
                AnthropicJudge::new(api_key, config.toml.judge.model.clone(), config.judge_timeout())?;
            if let Some(prompt) = config.judge_prompt()? {
                judge = judge.with_prompt_template(prompt);
            }
            Ok(Arc::new(judge))
        }
        JudgeBackend::Random => Ok(Arc::new(RandomJudge)),
    }
}

pub fn wager_provider(config: &ArvConfig) -> Arc<dyn WagerProvider> {
    match config.toml.investment.backend {
        InvestmentBackend::Paper => Arc::new(PaperExchange::new(config.settle_after())),
    }
}

pub fn build_orchestrator(config: &ArvConfig) -> Result<SessionOrchestrator> {
    let repo = Repository::new(open_store(config)?);
    let images = Arc::new(DirectoryImages::new(config.images_dir())?);
    let judge = JudgeGateway::new(
        judge_provider(config)?,
        config.judge_repetitions(),
        config.judge_timeout(),
    );
    let investment = InvestmentGateway::new(
        wager_provider(config),
        repo.clone(),
        config.toml.investment.stake,
        config.investment_timeout(),
    );
    tracing::debug!(
        store = %config.toml.store.backend,
        judge = %config.toml.judge.backend,
        repetitions = judge.repetitions(),
        investment = investment.provider_name(),
        "orchestrator wired"
    );
    Ok(SessionOrchestrator::new(repo, images, judge, investment))
}

pub fn build_state(config: &ArvConfig) -> Result<Arc<AppState>> {
    let orchestrator = build_orchestrator(config)?;
    let sweeper = Arc::new(Sweeper::new(orchestrator.clone(), config.sweep_interval()));
    Ok(Arc::new(AppState {
        orchestrator,
        sweeper,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ARV_DIR;
    use crate::session::models::SessionStatus;
    use tempfile::TempDir;

    fn project(toml: &str) -> (TempDir, ArvConfig) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(ARV_DIR)).unwrap();
        std::fs::write(dir.path().join(ARV_DIR).join("arv.toml"), toml).unwrap();
        let images = dir.path().join("public/images");
        std::fs::create_dir_all(&images).unwrap();
        for name in ["a.jpg", "b.png"] {
            std::fs::write(images.join(name), b"img").unwrap();
        }
        let config = ArvConfig::new(dir.path().to_path_buf()).unwrap();
        (dir, config)
    }

    #[tokio::test]
    async fn test_build_with_random_judge_and_sqlite() {
        let (dir, config) = project("[judge]\nbackend = \"random\"\n");
        let state = build_state(&config).unwrap();
        let session = state.orchestrator.create_session().await.unwrap();
        assert_eq!(session.status, SessionStatus::New);
        assert!(dir.path().join(".arv/arv.db").exists());
    }

    #[tokio::test]
    async fn test_memory_backend_creates_no_file() {
        let (dir, config) = project("[judge]\nbackend = \"random\"\n[store]\nbackend = \"memory\"\n");
        build_orchestrator(&config).unwrap();
        assert!(!dir.path().join(".arv/arv.db").exists());
    }

    #[test]
    fn test_wager_provider_is_paper() {
        let (_dir, config) = project("");
        assert_eq!(wager_provider(&config).name(), "paper");
    }
}
