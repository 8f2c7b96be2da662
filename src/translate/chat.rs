// src/translate/chat.rs
//! Minimal OpenAI-compatible chat-completions client shared by the
//! `openai` and `deepseek` engines.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::{TranslateError, TranslateRequest, TranslationConfig};
use crate::model::Usage;

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<RespUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct RespUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

pub struct ChatCompletion {
    pub content: String,
    pub usage: Option<Usage>,
}

pub struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl ChatClient {
    pub fn new(
        api_key: String,
        base_url: &str,
        default_model: &str,
        timeout: Duration,
    ) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("feed-relay/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: default_model.to_string(),
        })
    }

    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        cfg: &TranslationConfig,
    ) -> Result<ChatCompletion, TranslateError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let model = cfg.model.as_deref().unwrap_or(&self.default_model);
        let req = Req {
            model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        };

        debug!(target: "translate", url = %url, model, "chat completion request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslateError::Api { status, body });
        }

        let body: Resp = response
            .json()
            .await
            .map_err(|e| TranslateError::Parse(e.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| TranslateError::Parse("missing choices[0].message.content".into()))?;

        let usage = body.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
            model: body.model.clone().or_else(|| Some(model.to_string())),
        });

        Ok(ChatCompletion { content, usage })
    }
}

pub fn translation_prompt(req: &TranslateRequest) -> String {
    let from = req.from.as_deref().unwrap_or("the detected source language");
    format!(
        "You are a professional translator. Translate the user's text from {from} to {to}. \
         Preserve meaning, tone and paragraph breaks. Output only the translation.",
        to = req.to
    )
}

pub const DETECT_PROMPT: &str = "Identify the language of the user's text. \
     Reply with only its ISO 639-1 code in lowercase, nothing else.";

/// Pull a two/three-letter code out of a free-form detection reply.
pub fn parse_language_code(reply: &str) -> Result<String, TranslateError> {
    let code: String = reply
        .trim()
        .trim_matches(|c: char| !c.is_ascii_alphabetic())
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase();
    if (2..=3).contains(&code.len()) {
        Ok(code)
    } else {
        Err(TranslateError::Parse(format!(
            "unexpected language detection reply: {reply:?}"
        )))
    }
}
