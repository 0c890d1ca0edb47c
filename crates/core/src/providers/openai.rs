use crate::error::{CompletionError, EmbeddingServiceError, RagError};
use crate::traits::{CompletionService, EmbeddingService};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/";

const BACKEND: &str = "openai";

/// Credentials handed to the clients at construction; nothing is read from
/// the environment here.
#[derive(Clone)]
pub struct OpenAiCredentials {
    api_key: String,
    base_url: Url,
}

impl std::fmt::Debug for OpenAiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCredentials")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl OpenAiCredentials {
    pub fn new(api_key: Option<String>, base_url: &str) -> Result<Self, RagError> {
        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| RagError::Configuration("an API key is required".to_string()))?;

        let mut base_url = Url::parse(base_url.trim()).map_err(|error| {
            RagError::Configuration(format!("invalid base url {base_url:?}: {error}"))
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { api_key, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }
}

fn http_client(timeout: Duration) -> Result<Client, RagError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| RagError::Configuration(format!("cannot build http client: {error}")))
}

pub struct OpenAiEmbeddings {
    client: Client,
    credentials: OpenAiCredentials,
    model: String,
}

impl OpenAiEmbeddings {
    pub fn new(
        credentials: OpenAiCredentials,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RagError> {
        Ok(Self {
            client: http_client(timeout)?,
            credentials,
            model: model.into(),
        })
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingServiceError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingServiceError::CountMismatch {
            expected: 1,
            found: 0,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self
            .credentials
            .endpoint("embeddings")
            .map_err(|error| EmbeddingServiceError::Request(error.to_string()))?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.credentials.api_key)
            .json(&json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await?;

        let status = response.status();
        let payload = read_payload(response).await?;
        if !status.is_success() {
            return Err(EmbeddingServiceError::BackendResponse {
                backend: BACKEND.to_string(),
                details: error_details(status, &payload),
            });
        }

        let vectors = parse_embeddings(&payload)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingServiceError::CountMismatch {
                expected: texts.len(),
                found: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

pub struct OpenAiChat {
    client: Client,
    credentials: OpenAiCredentials,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(
        credentials: OpenAiCredentials,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, RagError> {
        Ok(Self {
            client: http_client(timeout)?,
            credentials,
            model: model.into(),
            temperature,
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiChat {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let url = self
            .credentials
            .endpoint("chat/completions")
            .map_err(|error| CompletionError::Request(error.to_string()))?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.credentials.api_key)
            .json(&json!({
                "model": self.model,
                "temperature": self.temperature,
                "messages": [{ "role": "user", "content": prompt }],
            }))
            .send()
            .await?;

        let status = response.status();
        let payload = read_payload(response).await?;
        if !status.is_success() {
            return Err(CompletionError::BackendResponse {
                backend: BACKEND.to_string(),
                details: error_details(status, &payload),
            });
        }

        parse_chat_completion(&payload)
    }
}

async fn read_payload(response: reqwest::Response) -> Result<Value, reqwest::Error> {
    let body = response.text().await?;
    Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
}

fn error_details(status: reqwest::StatusCode, payload: &Value) -> String {
    match payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| payload.as_str().filter(|body| !body.trim().is_empty()))
    {
        Some(message) => format!("{status}: {message}"),
        None => status.to_string(),
    }
}

/// Vectors from an embeddings payload, ordered by their `index` field.
fn parse_embeddings(payload: &Value) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
    let malformed = |details: &str| EmbeddingServiceError::BackendResponse {
        backend: BACKEND.to_string(),
        details: details.to_string(),
    };

    let items = payload
        .pointer("/data")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing data array"))?;

    let mut indexed = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let index = item
            .pointer("/index")
            .and_then(Value::as_u64)
            .map(|index| index as usize)
            .unwrap_or(position);
        let vector = item
            .pointer("/embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("missing embedding"))?
            .iter()
            .map(|value| value.as_f64().map(|number| number as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| malformed("non-numeric embedding value"))?;
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

fn parse_chat_completion(payload: &Value) -> Result<String, CompletionError> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CompletionError::Malformed("missing choices[0].message.content".to_string()))
}
