//! HTTP client for the Gemini `generateContent` REST API.
//!
//! One client serves both uses: frame classification (image + fixed prompt,
//! JSON array reply) and insight generation (aggregates in the prompt, JSON
//! object reply). Both go through the same retry policy.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Client, Url};
use trashmap_core::{AppConfig, DetectedItem, InsightDraft, Summary};

use crate::error::VisionError;
use crate::parse::{parse_insight, parse_items};
use crate::prompt::{insight_prompt, CLASSIFY_PROMPT};
use crate::retry::retry_with_backoff;
use crate::types::{
    ApiErrorEnvelope, Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    InlineData, Part,
};

const DEFAULT_VISION_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_INSIGHT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BACKOFF_MS: u64 = 500;
const API_KEY_HEADER: &str = "x-goog-api-key";

const CLASSIFY_TEMPERATURE: f32 = 0.1;
const INSIGHT_TEMPERATURE: f32 = 0.4;

/// Client for the hosted vision/text model.
///
/// Use [`GeminiClient::new`] in the server or [`GeminiClient::with_base_url`]
/// to point at a mock server in tests.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: Url,
    vision_model: String,
    insight_model: String,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl GeminiClient {
    /// Builds a client from application configuration.
    ///
    /// # Errors
    ///
    /// Returns [`VisionError::Http`] if the `reqwest::Client` cannot be built,
    /// or [`VisionError::InvalidBaseUrl`] for a malformed base URL.
    pub fn new(config: &AppConfig) -> Result<Self, VisionError> {
        let client = Self::with_base_url(
            &config.gemini_api_key,
            config.classifier_timeout_secs,
            &config.vision_base_url,
        )?
        .with_models(&config.vision_model, &config.insight_model)
        .with_retry(config.classifier_max_retries, config.classifier_backoff_ms);
        Ok(client)
    }

    /// Creates a client against a custom base URL with default models and
    /// retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`VisionError::Http`] if the `reqwest::Client` cannot be built,
    /// or [`VisionError::InvalidBaseUrl`] if `base_url` does not parse.
    pub fn with_base_url(
        api_key: &str,
        timeout_secs: u64,
        base_url: &str,
    ) -> Result<Self, VisionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("trashmap/0.1 (trash-detection)")
            .build()?;

        // Exactly one trailing slash so `Url::join` appends instead of
        // replacing the last path segment.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised)
            .map_err(|e| VisionError::InvalidBaseUrl(format!("'{base_url}': {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.to_owned(),
            base_url,
            vision_model: DEFAULT_VISION_MODEL.to_owned(),
            insight_model: DEFAULT_INSIGHT_MODEL.to_owned(),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_MS,
        })
    }

    #[must_use]
    pub fn with_models(mut self, vision_model: &str, insight_model: &str) -> Self {
        vision_model.clone_into(&mut self.vision_model);
        insight_model.clone_into(&mut self.insight_model);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, max_retries: u32, backoff_base_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.backoff_base_ms = backoff_base_ms;
        self
    }

    /// Model name recorded on each detection as `model_version`.
    #[must_use]
    pub fn vision_model(&self) -> &str {
        &self.vision_model
    }

    /// Classifies one frame.
    ///
    /// An empty vector means the model saw no trash; it is not an error.
    ///
    /// # Errors
    ///
    /// - [`VisionError::Http`] / [`VisionError::Api`] when the call fails
    ///   after retries.
    /// - [`VisionError::EmptyResponse`] when the reply has no text.
    /// - [`VisionError::Deserialize`] when the text is not a JSON array.
    pub async fn classify_image(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<Vec<DetectedItem>, VisionError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: CLASSIFY_PROMPT.to_owned(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: mime_type.to_owned(),
                            data: STANDARD.encode(image),
                        },
                    },
                ],
            }],
            generation_config: Some(GenerationConfig::json(CLASSIFY_TEMPERATURE)),
        };

        let text = self.generate(&self.vision_model, &request).await?;
        let items = parse_items(&text)?;
        tracing::debug!(
            model = %self.vision_model,
            image_bytes = image.len(),
            items = items.len(),
            "vision: frame classified"
        );
        Ok(items)
    }

    /// Asks the text model to summarise the aggregates.
    ///
    /// # Errors
    ///
    /// Same as [`GeminiClient::classify_image`], with the reply expected to be
    /// a `{summary, recommendations, hotspot_analysis}` object.
    pub async fn generate_insight(&self, summary: &Summary) -> Result<InsightDraft, VisionError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part::Text {
                    text: insight_prompt(summary),
                }],
            }],
            generation_config: Some(GenerationConfig::json(INSIGHT_TEMPERATURE)),
        };

        let text = self.generate(&self.insight_model, &request).await?;
        parse_insight(&text)
    }

    fn model_url(&self, model: &str) -> Result<Url, VisionError> {
        self.base_url
            .join(&format!("v1beta/models/{model}:generateContent"))
            .map_err(|e| VisionError::InvalidBaseUrl(format!("model '{model}': {e}")))
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<String, VisionError> {
        let url = self.model_url(model)?;
        retry_with_backoff(self.max_retries, self.backoff_base_ms, || {
            self.post_generate(model, &url, request)
        })
        .await
    }

    /// One POST to `generateContent`, returning the first candidate's text.
    async fn post_generate(
        &self,
        model: &str,
        url: &Url,
        request: &GenerateContentRequest,
    ) -> Result<String, VisionError> {
        let response = self
            .client
            .post(url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(VisionError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&body).map_err(|e| VisionError::Deserialize {
                context: format!("generateContent({model})"),
                source: e,
            })?;
        parsed
            .first_text()
            .ok_or_else(|| VisionError::EmptyResponse(model.to_owned()))
    }
}

/// Extracts `error.message` from an API error body, falling back to a
/// truncated raw body.
fn api_error_message(body: &str) -> String {
    const MAX_RAW: usize = 200;
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => match envelope.error.status {
            Some(status) => format!("{status}: {}", envelope.error.message),
            None => envelope.error.message,
        },
        Err(_) => body.chars().take(MAX_RAW).collect(),
    }
}
