use super::{LanguageModel, Prompt};
use anyhow::Result;
use async_trait::async_trait;
use rig::{client::CompletionClient, completion::Prompt as _};
use tracing::debug;

pub struct RigModel<C: CompletionClient> {
    client: C,
    model: String,
}

impl<C: CompletionClient> RigModel<C> {
    pub fn new(client: C, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl<C> LanguageModel for RigModel<C>
where
    C: CompletionClient + Send + Sync,
    C::CompletionModel: 'static,
{
    async fn invoke(&self, prompt: &Prompt) -> Result<String> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(&prompt.system)
            .max_tokens(2048)
            .build();

        let response = agent.prompt(prompt.user.as_str()).await?;
        debug!(model = %self.model, "raw model output: {}", response);
        Ok(response.to_string())
    }
}
