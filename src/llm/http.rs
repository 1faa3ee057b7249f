//! An OpenAI-compatible-chat-completions provider, built on `async-openai`
//! the same way the teacher's `OpenAiCaller` is, generalized with
//! `with_base_url` to also cover the non-OpenAI models in the Model
//! Selector's table (o3, gpt-4.1, etc. all speak this API shape).

use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
    Client,
};
use async_trait::async_trait;

use super::{LlmProvider, RawProviderError};

pub struct HttpLlmProvider {
    client: Client<OpenAIConfig>,
}

impl HttpLlmProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_base(base_url);
        Self { client: Client::with_config(config) }
    }

    pub fn openai() -> Self {
        Self { client: Client::new() }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete_raw(
        &self,
        prompt: &str,
        model: &str,
        credential: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, RawProviderError> {
        let config = OpenAIConfig::new().with_api_key(credential);
        let client = self.client.clone().with_config(config);

        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();
        if let Some(sys) = system_prompt {
            let msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys)
                .build()
                .map_err(|e| RawProviderError { status: None, message: format!("failed to build system message: {e}") })?;
            messages.push(msg.into());
        }
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| RawProviderError { status: None, message: format!("failed to build user message: {e}") })?;
        messages.push(user_msg.into());

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .build()
            .map_err(|e| RawProviderError { status: None, message: format!("failed to build request: {e}") })?;

        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e| RawProviderError { status: None, message: format!("provider error: {e}") })?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| RawProviderError { status: None, message: "provider response had no message content".to_string() })
    }
}
