//! Judge gateway: picks which of two images best matches an impression.
//!
//! A `JudgeProvider` produces one raw `Verdict` per call. `JudgeGateway`
//! asks the provider `repetitions` times concurrently and majority-votes the
//! answers. Provider errors and timeouts count as invalid votes; only when
//! every vote is invalid does the gateway fail.

pub mod anthropic;
pub mod random;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use super::models::ImageIdx;
use crate::errors::SessionError;

pub use anthropic::AnthropicJudge;
pub use random::RandomJudge;

/// One raw judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Chose(ImageIdx),
    /// The provider answered but could not pick an image.
    Ambiguous,
}

impl Verdict {
    /// Interpret a provider's numeric answer; anything but 0 or 1 is ambiguous.
    pub fn from_raw(raw: i64) -> Self {
        u8::try_from(raw)
            .ok()
            .and_then(|v| ImageIdx::try_from(v).ok())
            .map(Self::Chose)
            .unwrap_or(Self::Ambiguous)
    }

    pub fn image(&self) -> Option<ImageIdx> {
        match self {
            Self::Chose(idx) => Some(*idx),
            Self::Ambiguous => None,
        }
    }
}

#[async_trait]
pub trait JudgeProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn provide_judgement(
        &self,
        image_a: &Path,
        image_b: &Path,
        impression: &str,
    ) -> anyhow::Result<Verdict>;
}

/// Majority vote over valid verdicts. Ties go to whichever tied index was
/// seen first. `None` when no verdict was valid.
pub fn tally(votes: &[Verdict]) -> Option<ImageIdx> {
    let valid: Vec<ImageIdx> = votes.iter().filter_map(Verdict::image).collect();
    let count = |idx: ImageIdx| valid.iter().filter(|v| **v == idx).count();
    let best = valid.iter().map(|idx| count(*idx)).max()?;
    valid.iter().copied().find(|idx| count(*idx) == best)
}

pub struct JudgeGateway {
    provider: Arc<dyn JudgeProvider>,
    repetitions: usize,
    timeout: Duration,
}

impl JudgeGateway {
    pub fn new(provider: Arc<dyn JudgeProvider>, repetitions: usize, timeout: Duration) -> Self {
        Self {
            provider,
            repetitions: repetitions.max(1),
            timeout,
        }
    }

    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    /// Judge `impression` against the two image files.
    pub async fn judge(&self, images: &[PathBuf; 2], impression: &str) -> Result<ImageIdx, SessionError> {
        let calls = (0..self.repetitions).map(|_| self.judge_once(images, impression));
        let votes = join_all(calls).await;

        let invalid = votes.iter().filter(|v| v.image().is_none()).count();
        if invalid > 0 {
            tracing::warn!(
                provider = self.provider.name(),
                invalid,
                total = votes.len(),
                "invalid judge responses received"
            );
        }

        tally(&votes).ok_or_else(|| {
            SessionError::JudgeUnavailable(format!(
                "all {} judgments from {} were invalid",
                votes.len(),
                self.provider.name()
            ))
        })
    }

    async fn judge_once(&self, images: &[PathBuf; 2], impression: &str) -> Verdict {
        let call = self
            .provider
            .provide_judgement(&images[0], &images[1], impression);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                let error = format!("{:#}", e);
                tracing::warn!(provider = self.provider.name(), %error, "judge call failed");
                Verdict::Ambiguous
            }
            Err(_) => {
                tracing::warn!(provider = self.provider.name(), timeout = ?self.timeout, "judge call timed out");
                Verdict::Ambiguous
            }
        }
    }
}
