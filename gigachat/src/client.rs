use std::{
    env,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::{index::LanguageModel, prompt::Message};

const OAUTH_URL: &str = "https://ngw.devices.sberbank.ru:9443/api/v2/oauth";
const API_BASE_URL: &str = "https://gigachat.devices.sberbank.ru/api/v1";
const DEFAULT_SCOPE: &str = "GIGACHAT_API_PERS";
const EMBEDDINGS_MODEL: &str = "Embeddings";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Refresh the cached token this long before the provider expires it.
const TOKEN_SLACK_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelType {
    #[default]
    Lite,
    Pro,
    Max,
}

impl ModelType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lite => "GigaChat",
            Self::Pro => "GigaChat-Pro",
            Self::Max => "GigaChat-Max",
        }
    }
}

/// A single chat completion returned by the model.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
}

#[derive(Debug, serde::Deserialize)]
struct AccessToken {
    access_token: String,
    /// Expiry as unix epoch milliseconds.
    expires_at: u64,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'static str,
    messages: &'a [Message],
    temperature: f32,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(serde::Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(serde::Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(serde::Serialize)]
struct EmbeddingRequest<'a> {
    model: &'static str,
    input: &'a [String],
}

#[derive(serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(serde::Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// A client for the GigaChat completions and embeddings APIs.
///
/// Credentials are the opaque authorization key issued by the provider; the
/// short-lived bearer token is exchanged lazily and cached until shortly
/// before expiry. TLS verification is disabled because the provider's
/// certificate chain is signed by a CA absent from the webpki roots.
pub struct GigaChat {
    http: reqwest::Client,
    credentials: String,
    scope: String,
    model: ModelType,
    temperature: f32,
    token: Mutex<Option<AccessToken>>,
}

impl GigaChat {
    #[must_use]
    pub fn new(credentials: &str) -> Self {
        Self {
            http: Self::http_client(DEFAULT_TIMEOUT),
            credentials: credentials.to_owned(),
            scope: DEFAULT_SCOPE.to_owned(),
            model: ModelType::default(),
            temperature: DEFAULT_TEMPERATURE,
            token: Mutex::new(None),
        }
    }

    /// Constructs a client from the `GIGACHAT_CREDENTIALS` environment variable.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(&env::var("GIGACHAT_CREDENTIALS").expect("$GIGACHAT_CREDENTIALS not set"))
    }

    #[must_use]
    pub const fn with_model(mut self, model: ModelType) -> Self {
        self.model = model;
        self
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_owned();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = Self::http_client(timeout);
        self
    }

    fn http_client(timeout: Duration) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_default()
    }

    /// Sends a sequence of role-tagged messages to the chat completions API.
    ///
    /// # Errors
    ///
    /// This function will return an error if the Completions API returns an
    /// error or an empty choice list.
    pub async fn chat(&self, messages: &[Message]) -> Result<Completion> {
        let bearer = self.bearer().await?;
        let request = ChatRequest {
            model: self.model.as_str(),
            messages,
            temperature: self.temperature,
        };

        let response: ChatResponse = self
            .http
            .post(format!("{API_BASE_URL}/chat/completions"))
            .bearer_auth(&bearer)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Could not find completion"))?;

        Ok(Completion {
            content: choice.message.content,
        })
    }

    /// Embeds a batch of texts, one vector per input, in input order.
    ///
    /// # Errors
    ///
    /// This function will return an error if the Embeddings API returns an
    /// error.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let bearer = self.bearer().await?;
        let request = EmbeddingRequest {
            model: EMBEDDINGS_MODEL,
            input: texts,
        };

        let mut response: EmbeddingResponse = self
            .http
            .post(format!("{API_BASE_URL}/embeddings"))
            .bearer_auth(&bearer)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response.data.sort_by_key(|data| data.index);

        Ok(response
            .data
            .into_iter()
            .map(|data| data.embedding)
            .collect())
    }

    /// Embeds a single string.
    ///
    /// # Errors
    ///
    /// This function will return an error if the Embeddings API returns an
    /// error or an empty embedding list.
    pub async fn raw_embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Could not find embedding"))
    }

    async fn bearer(&self) -> Result<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if now_ms() + TOKEN_SLACK_MS < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.request_token().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);

        Ok(access_token)
    }

    async fn request_token(&self) -> Result<AccessToken> {
        let backoff = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::from_secs(60)))
            .build();

        let token = backoff::future::retry(backoff, || async move {
            let response = self
                .http
                .post(OAUTH_URL)
                .header("Authorization", format!("Basic {}", self.credentials))
                .header("RqUID", Uuid::new_v4().to_string())
                .form(&[("scope", self.scope.as_str())])
                .send()
                .await
                .map_err(anyhow::Error::from)
                .map_err(backoff::Error::transient)?;

            // Rejected credentials won't become valid on a retry.
            if response.status().is_client_error() {
                return Err(backoff::Error::permanent(anyhow!(
                    "authorization failed: {}",
                    response.status()
                )));
            }

            response
                .error_for_status()
                .map_err(anyhow::Error::from)
                .map_err(backoff::Error::transient)?
                .json::<AccessToken>()
                .await
                .map_err(anyhow::Error::from)
                .map_err(backoff::Error::transient)
        })
        .await?;

        debug!("Fetched access token, expires at {}", token.expires_at);

        Ok(token)
    }
}

#[async_trait]
impl LanguageModel for GigaChat {
    async fn chat(&self, messages: &[Message]) -> Result<Completion> {
        Self::chat(self, messages).await
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Self::embed(self, texts).await
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_map_model_names() {
        assert_eq!(ModelType::Lite.as_str(), "GigaChat");
        assert_eq!(ModelType::Pro.as_str(), "GigaChat-Pro");
        assert_eq!(ModelType::Max.as_str(), "GigaChat-Max");
    }

    #[test]
    fn should_parse_chat_response() {
        // When
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"Hello there"}}]}"#,
        )
        .unwrap();

        // Then
        assert_eq!(response.choices[0].message.content, "Hello there");
    }

    #[test]
    fn should_parse_embedding_response() {
        // When
        let mut response: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"embedding":[0.5,0.25],"index":1},{"embedding":[1.0],"index":0}]}"#,
        )
        .unwrap();
        response.data.sort_by_key(|data| data.index);

        // Then
        assert_eq!(response.data[0].embedding, vec![1.0]);
        assert_eq!(response.data[1].embedding, vec![0.5, 0.25]);
    }
}
