use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;

use super::{JudgeProvider, Verdict};
use crate::util::extract_json_object;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Neutral labels so the model cannot infer position from the name.
const LABEL_A: &str = "image_1111";
const LABEL_B: &str = "0x4444";

pub const DEFAULT_PROMPT: &str = r#"You are judging an associative remote viewing trial.
A viewer wrote the impressions below while aiming at one of the two images you were shown.
Decide which image, {{IMAGE_A}} or {{IMAGE_B}}, the impressions describe better.
Weigh shapes, colours, textures, light, mood and spatial layout; ignore guesses about
what the image "is" unless they are concrete.

Impressions:
{{IMPRESSIONS}}

Reply with a JSON object only: {"chosen_image": "<{{IMAGE_A}} or {{IMAGE_B}}>", "reason": "<one sentence>"}"#;

/// Vision judge backed by the Anthropic Messages API.
pub struct AnthropicJudge {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    prompt_template: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Judgement {
    chosen_image: Option<String>,
}

impl AnthropicJudge {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            prompt_template: DEFAULT_PROMPT.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    fn render_prompt(&self, impression: &str) -> String {
        self.prompt_template
            .replace("{{IMAGE_A}}", LABEL_A)
            .replace("{{IMAGE_B}}", LABEL_B)
            .replace("{{IMPRESSIONS}}", impression)
    }

    async fn image_block(path: &Path) -> Result<serde_json::Value> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        Ok(json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": media_type(path),
                "data": BASE64.encode(bytes),
            }
        }))
    }
}

fn media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Map the model's reply text to a verdict.
pub fn parse_reply(text: &str) -> Verdict {
    let Some(raw) = extract_json_object(text) else {
        return Verdict::Ambiguous;
    };
    match serde_json::from_str::<Judgement>(&raw) {
        Ok(Judgement {
            chosen_image: Some(label),
        }) if label == LABEL_A => Verdict::from_raw(0),
        Ok(Judgement {
            chosen_image: Some(label),
        }) if label == LABEL_B => Verdict::from_raw(1),
        _ => Verdict::Ambiguous,
    }
}

#[async_trait]
impl JudgeProvider for AnthropicJudge {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn provide_judgement(
        &self,
        image_a: &Path,
        image_b: &Path,
        impression: &str,
    ) -> Result<Verdict> {
        let (block_a, block_b) = tokio::try_join!(Self::image_block(image_a), Self::image_block(image_b))?;

        let body = json!({
            "model": self.model,
            "max_tokens": 1024,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": format!("I'm going to show you two images. The first is named \"{}\" and the second is named \"{}\".", LABEL_A, LABEL_B) },
                    block_a,
                    { "type": "text", "text": format!("This was image \"{}\".", LABEL_A) },
                    block_b,
                    { "type": "text", "text": format!("This was image \"{}\".", LABEL_B) },
                    { "type": "text", "text": self.render_prompt(impression) },
                ]
            }]
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .context("Failed to call Anthropic Messages API")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API returned {}: {}", status, detail);
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .context("Failed to decode Anthropic response")?;
        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            anyhow::bail!("No text response received");
        }

        let verdict = parse_reply(&text);
        if verdict == Verdict::Ambiguous {
            tracing::warn!(reply = %text, "judge reply did not name an image");
        }
        Ok(verdict)
    }
}
