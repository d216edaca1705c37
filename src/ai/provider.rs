//! The raw structured-generation capability and its HTTP implementation.
//!
//! The provider performs exactly one attempt per call; retries, schema
//! enforcement and concurrency limiting live in the gateway. Attachments
//! are object-store references the provider resolves itself (PDF text
//! layer), keeping retrieval deterministic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::AiError;
use crate::store::ObjectStore;

/// One structured-generation request.
pub struct GenerateRequest {
    pub prompt: String,
    pub schema: Value,
    /// Object-store keys of PDFs to attach as context.
    pub attachments: Vec<String>,
    /// Short label identifying the request in logs, e.g. "Chapter-3: 3.2".
    pub context: String,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>, schema: Value, context: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            schema,
            attachments: Vec::new(),
            context: context.into(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Single generation attempt. Must return a JSON value; structural
    /// validation happens in the gateway.
    async fn generate(&self, request: &GenerateRequest) -> Result<Value, AiError>;

    /// Whether the provider constrains decoding with the request schema.
    /// When true, schema violations are worth retrying; when false the
    /// gateway fails fast after the first validation failure.
    fn schema_guided(&self) -> bool {
        false
    }

    /// Optional embedding capability. The pipeline itself never requires
    /// it; document attachment is the canonical retrieval strategy.
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        Err(AiError::Fatal("embedding not supported by this provider".into()))
    }
}

/// Generation timeout. Document-attached calls over long PDFs are slow;
/// the gateway's retry budget sits on top of this.
const GENERATE_TIMEOUT_SECS: u64 = 7200;

const SYSTEM_MESSAGE: &str = "Du bist ein erfahrener BSI-Grundschutz-Auditor. Antworte \
ausschließlich mit validem JSON, das dem vorgegebenen Schema entspricht. Erfinde keine \
Inhalte, die nicht in den bereitgestellten Dokumenten belegt sind.";

/// HTTP provider against a local or hosted generate endpoint.
///
/// Sends the JSON schema as the `format` field so decoding is
/// schema-guided. Attached documents are read from the store and inlined
/// as extracted text below the prompt.
pub struct HttpProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
    store: Arc<dyn ObjectStore>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
}

impl HttpProvider {
    pub fn new(base_url: &str, model: &str, store: Arc<dyn ObjectStore>) -> Result<Self, AiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(GENERATE_TIMEOUT_SECS))
            .build()
            .map_err(|e| AiError::Fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            store,
        })
    }

    /// Resolves attachments to text and appends them beneath the prompt.
    fn render_prompt(&self, request: &GenerateRequest) -> Result<String, AiError> {
        if request.attachments.is_empty() {
            return Ok(request.prompt.clone());
        }
        let mut prompt = request.prompt.clone();
        for key in &request.attachments {
            let bytes = self
                .store
                .read_bytes(key)
                .map_err(|e| AiError::Fatal(format!("cannot read attachment '{key}': {e}")))?;
            let text = extract_attachment_text(key, &bytes)?;
            prompt.push_str(&format!("\n\n--- Dokument: {key} ---\n{text}"));
        }
        Ok(prompt)
    }
}

fn extract_attachment_text(key: &str, bytes: &[u8]) -> Result<String, AiError> {
    if key.ends_with(".pdf") {
        pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| AiError::Fatal(format!("cannot extract text from '{key}': {e}")))
    } else {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

#[async_trait]
impl AiProvider for HttpProvider {
    async fn generate(&self, request: &GenerateRequest) -> Result<Value, AiError> {
        let prompt = self.render_prompt(request)?;
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "system": SYSTEM_MESSAGE,
            "stream": false,
            "format": request.schema,
            "options": { "temperature": 0.2 },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    AiError::Transient(format!("provider unreachable: {e}"))
                } else {
                    AiError::Fatal(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(AiError::Transient(format!("provider returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Fatal(format!("provider returned {status}: {body}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AiError::Transient(format!("unparseable provider response: {e}")))?;

        match parsed.done_reason.as_deref() {
            None | Some("stop") | Some("length") => {}
            Some("blocked") | Some("safety") => {
                return Err(AiError::Blocked(format!(
                    "[{}] provider refused to generate",
                    request.context
                )))
            }
            Some(other) => {
                return Err(AiError::Transient(format!(
                    "non-OK finish reason '{other}'"
                )))
            }
        }

        serde_json::from_str(&parsed.response)
            .map_err(|e| AiError::Transient(format!("model output is not valid JSON: {e}")))
    }

    fn schema_guided(&self) -> bool {
        true
    }
}

#[cfg(test)]
pub mod mock {
    //! Scriptable provider for tests: returns queued responses in order,
    //! then repeats the last one.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    pub struct MockProvider {
        responses: Mutex<Vec<Result<Value, AiError>>>,
        pub calls: AtomicUsize,
        schema_guided: bool,
    }

    impl MockProvider {
        pub fn new(responses: Vec<Result<Value, AiError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
                schema_guided: true,
            }
        }

        pub fn always(value: Value) -> Self {
            Self::new(vec![Ok(value)])
        }

        pub fn failing(error: AiError) -> Self {
            Self::new(vec![Err(error)])
        }

        pub fn without_schema_guidance(mut self) -> Self {
            self.schema_guided = false;
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn clone_result(r: &Result<Value, AiError>) -> Result<Value, AiError> {
        match r {
            Ok(v) => Ok(v.clone()),
            Err(AiError::Transient(m)) => Err(AiError::Transient(m.clone())),
            Err(AiError::Schema(m)) => Err(AiError::Schema(m.clone())),
            Err(AiError::Blocked(m)) => Err(AiError::Blocked(m.clone())),
            Err(AiError::Fatal(m)) => Err(AiError::Fatal(m.clone())),
        }
    }

    #[async_trait]
    impl AiProvider for MockProvider {
        async fn generate(&self, _request: &GenerateRequest) -> Result<Value, AiError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let responses = self.responses.lock().unwrap();
            let pick = responses.get(idx).or_else(|| responses.last());
            match pick {
                Some(r) => clone_result(r),
                None => Err(AiError::Fatal("mock has no responses".into())),
            }
        }

        fn schema_guided(&self) -> bool {
            self.schema_guided
        }
    }
}
