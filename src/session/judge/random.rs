use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;

use super::{JudgeProvider, Verdict};
use crate::session::models::ImageIdx;

/// Coin-flip judge for offline runs and demos.
#[derive(Default)]
pub struct RandomJudge;

#[async_trait]
impl JudgeProvider for RandomJudge {
    fn name(&self) -> &str {
        "random"
    }

    async fn provide_judgement(&self, _image_a: &Path, _image_b: &Path, _impression: &str) -> Result<Verdict> {
        let idx = if rand::thread_rng().gen_bool(0.5) {
            ImageIdx::First
        } else {
            ImageIdx::Second
        };
        Ok(Verdict::Chose(idx))
    }
}
