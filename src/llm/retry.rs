//! Retrying, fallback-aware `LlmCaller` — grounded on the teacher's
//! `RetryingLlmCaller`, rewired to resolve fallbacks through the
//! `ModelSelector` (spec §4.3) instead of retrying the same model forever.

use std::sync::Arc;

use async_trait::async_trait;

use crate::model_selector::ModelSelector;

use super::{ErrorKind, LlmCallError, LlmCaller, LlmProvider};

pub struct RetryingLlmCaller {
    provider: Arc<dyn LlmProvider>,
    selector: Arc<ModelSelector>,
}

impl RetryingLlmCaller {
    pub fn new(provider: Arc<dyn LlmProvider>, selector: Arc<ModelSelector>) -> Self {
        Self { provider, selector }
    }
}

#[async_trait]
impl LlmCaller for RetryingLlmCaller {
    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        credential: &str,
        system_prompt: Option<&str>,
        stage_name: Option<&str>,
        max_retries: u32,
    ) -> Result<String, LlmCallError> {
        if credential.is_empty() {
            return Err(LlmCallError::missing_credential(stage_name.unwrap_or("unknown")));
        }

        let mut current_model = model.to_string();
        let mut current_credential = credential.to_string();
        let mut last_kind = ErrorKind::Unknown;
        let mut last_message = String::new();

        for attempt in 0..=max_retries {
            match self
                .provider
                .complete_raw(prompt, &current_model, &current_credential, system_prompt)
                .await
            {
                Ok(text) => return Ok(text.trim().to_string()),
                Err(raw) => {
                    let kind = ErrorKind::classify(&raw.message, raw.status);
                    last_kind = kind;
                    last_message = raw.message.clone();

                    tracing::warn!(
                        attempt,
                        max_retries,
                        model = %current_model,
                        kind = ?kind,
                        error = %raw.message,
                        "LLM call failed"
                    );

                    if !kind.is_retryable() {
                        break;
                    }

                    if attempt >= max_retries {
                        break;
                    }

                    match stage_name.and_then(|s| self.selector.fallback(s, &current_model, &raw.message)) {
                        Some(selection) => {
                            current_model = selection.model;
                            if let Some(cred) = selection.credential {
                                current_credential = cred;
                            }
                        }
                        None => {
                            // No fallback: keep retrying the same model (transient errors
                            // like rate limits recover without a model change).
                        }
                    }

                    let wait_ms = 250u64 * (1u64 << attempt.min(6));
                    tokio::time::sleep(std::time::Duration::from_millis(wait_ms)).await;
                }
            }
        }

        Err(LlmCallError {
            kind: last_kind,
            message: last_message,
            retry_with_fallback: last_kind.is_retryable(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmProvider, RawProviderError};
    use crate::model_selector::ModelEntry;
    use std::collections::HashMap;

    fn selector_with(table: HashMap<String, Vec<ModelEntry>>) -> Arc<ModelSelector> {
        Arc::new(ModelSelector::with_env_reader(table, |_| Some("sk-test".to_string())))
    }

    #[tokio::test]
    async fn missing_credential_never_retries() {
        let provider = Arc::new(MockLlmProvider::new(vec![]));
        let selector = selector_with(HashMap::new());
        let caller = RetryingLlmCaller::new(provider.clone(), selector);

        let err = caller
            .complete("prompt", "gpt-4o", "", None, Some("estimator"), 3)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::MissingCredential);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_next_model_on_rate_limit() {
        let mut table = HashMap::new();
        table.insert(
            "estimator".to_string(),
            vec![ModelEntry::new("o3", &["X"]), ModelEntry::new("gpt-4o", &["X"])],
        );
        let selector = selector_with(table);

        let provider = Arc::new(MockLlmProvider::new(vec![
            Err(RawProviderError {
                status: Some(429),
                message: "rate limit exceeded".to_string(),
            }),
            Ok("final answer".to_string()),
        ]));

        let caller = RetryingLlmCaller::new(provider.clone(), selector);
        let result = caller
            .complete("prompt", "o3", "sk-test", None, Some("estimator"), 2)
            .await
            .unwrap();

        assert_eq!(result, "final answer");
        assert_eq!(provider.model_for_call(0).as_deref(), Some("o3"));
        assert_eq!(provider.model_for_call(1).as_deref(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn auth_error_is_not_retried() {
        let selector = selector_with(HashMap::new());
        let provider = Arc::new(MockLlmProvider::new(vec![Err(RawProviderError {
            status: Some(401),
            message: "invalid api key".to_string(),
        })]));
        let caller = RetryingLlmCaller::new(provider.clone(), selector);

        let err = caller
            .complete("prompt", "gpt-4o", "sk-test", None, Some("estimator"), 3)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::AuthError);
        assert_eq!(provider.call_count(), 1);
    }
}
