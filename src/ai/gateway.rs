//! Concurrency limiting, retries and schema enforcement on top of a
//! provider.
//!
//! Callers issue parallel calls freely; a counting semaphore caps the
//! number actually in flight. Transient failures retry with exponential
//! backoff (base 2 s). Schema violations retry only when the provider is
//! schema-guided, otherwise the first validation failure is final.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;

use super::provider::{AiProvider, GenerateRequest};
use super::{schema, AiError};

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_SECS: u64 = 2;

pub struct AiGateway {
    provider: Arc<dyn AiProvider>,
    semaphore: Semaphore,
}

impl AiGateway {
    pub fn new(provider: Arc<dyn AiProvider>, max_concurrent: usize) -> Self {
        Self {
            provider,
            semaphore: Semaphore::new(max_concurrent.max(1)),
        }
    }

    /// Generates a value that structurally matches `request.schema`.
    pub async fn generate_structured(&self, request: &GenerateRequest) -> Result<Value, AiError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| AiError::Fatal("AI semaphore closed".into()))?;

        let schema_retries_allowed = self.provider.schema_guided();
        let mut last_error = AiError::Fatal("no attempt made".into());

        for attempt in 1..=MAX_ATTEMPTS {
            tracing::debug!(
                context = %request.context,
                attempt,
                "calling structured generation"
            );
            match self.provider.generate(request).await {
                Ok(value) => match schema::validate(&value, &request.schema) {
                    Ok(()) => {
                        tracing::debug!(context = %request.context, attempt, "response validated");
                        return Ok(value);
                    }
                    Err(violation) => {
                        last_error = AiError::Schema(violation);
                        if !schema_retries_allowed {
                            tracing::error!(
                                context = %request.context,
                                error = %last_error,
                                "schema validation failed, provider is not schema-guided"
                            );
                            return Err(last_error);
                        }
                    }
                },
                Err(e @ AiError::Transient(_)) => last_error = e,
                Err(e @ (AiError::Blocked(_) | AiError::Fatal(_) | AiError::Schema(_))) => {
                    tracing::error!(context = %request.context, error = %e, "terminal AI error");
                    return Err(e);
                }
            }

            if attempt < MAX_ATTEMPTS {
                let wait = Duration::from_secs(BACKOFF_BASE_SECS.pow(attempt));
                tracing::warn!(
                    context = %request.context,
                    attempt,
                    error = %last_error,
                    wait_secs = wait.as_secs(),
                    "generation attempt failed, retrying"
                );
                tokio::time::sleep(wait).await;
            }
        }

        tracing::error!(
            context = %request.context,
            error = %last_error,
            "generation failed after all attempts"
        );
        Err(last_error)
    }

    /// Number of permits currently available; exposed for tests.
    #[cfg(test)]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::ai::provider::mock::MockProvider;
    use crate::ai::schema;

    fn request() -> GenerateRequest {
        GenerateRequest::new(
            "prompt",
            schema::object(&[("ok", schema::boolean())], &[]),
            "test",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_until_success() {
        let provider = Arc::new(MockProvider::new(vec![
            Err(AiError::Transient("flaky".into())),
            Err(AiError::Transient("flaky".into())),
            Ok(json!({ "ok": true })),
        ]));
        let gateway = AiGateway::new(provider.clone(), 2);
        let value = gateway.generate_structured(&request()).await.unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let provider = Arc::new(MockProvider::failing(AiError::Transient("down".into())));
        let gateway = AiGateway::new(provider.clone(), 2);
        let err = gateway.generate_structured(&request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(provider.call_count(), MAX_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn schema_violation_fails_fast_without_guidance() {
        let provider =
            Arc::new(MockProvider::always(json!({ "ok": "yes" })).without_schema_guidance());
        let gateway = AiGateway::new(provider.clone(), 2);
        let err = gateway.generate_structured(&request()).await.unwrap_err();
        assert!(matches!(err, AiError::Schema(_)));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn schema_violation_retries_with_guidance() {
        let provider = Arc::new(MockProvider::new(vec![
            Ok(json!({ "ok": "yes" })),
            Ok(json!({ "ok": true })),
        ]));
        let gateway = AiGateway::new(provider.clone(), 2);
        let value = gateway.generate_structured(&request()).await.unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn blocked_is_terminal() {
        let provider = Arc::new(MockProvider::failing(AiError::Blocked("refused".into())));
        let gateway = AiGateway::new(provider.clone(), 2);
        let err = gateway.generate_structured(&request()).await.unwrap_err();
        assert!(matches!(err, AiError::Blocked(_)));
        assert_eq!(provider.call_count(), 1);
    }

    /// Provider that records how many calls are in flight simultaneously.
    struct ConcurrencyProbe {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl AiProvider for ConcurrencyProbe {
        async fn generate(&self, _request: &GenerateRequest) -> Result<Value, AiError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({ "ok": true }))
        }

        fn schema_guided(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn semaphore_caps_concurrent_calls() {
        let probe = Arc::new(ConcurrencyProbe {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let gateway = Arc::new(AiGateway::new(probe.clone(), 3));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let gw = gateway.clone();
            handles.push(tokio::spawn(async move {
                gw.generate_structured(&request()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(probe.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gateway.available_permits(), 3);
    }
}
