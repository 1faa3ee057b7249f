//! A programmable `LlmProvider` for tests — grounded on the teacher's
//! `MockLlmCaller`, which queues canned responses and records every call.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{LlmProvider, RawProviderError};

pub struct MockLlmProvider {
    responses: Mutex<Vec<Result<String, RawProviderError>>>,
    call_log: Mutex<Vec<(String, String)>>, // (model, prompt)
}

impl MockLlmProvider {
    pub fn new(responses: Vec<Result<String, RawProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_log: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    pub fn model_for_call(&self, n: usize) -> Option<String> {
        self.call_log.lock().unwrap().get(n).map(|(model, _)| model.clone())
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete_raw(
        &self,
        prompt: &str,
        model: &str,
        _credential: &str,
        _system_prompt: Option<&str>,
    ) -> Result<String, RawProviderError> {
        self.call_log.lock().unwrap().push((model.to_string(), prompt.to_string()));

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(RawProviderError {
                status: None,
                message: "MockLlmProvider: no more programmed responses".to_string(),
            });
        }
        responses.remove(0)
    }
}
