use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tunesmith::agent::Agent;
use tunesmith::policy::ConversationPolicy;
use tunesmith::providers::openai::OpenAiProvider;
use tunesmith::registry::ToolRegistry;
use tunesmith::systems::ToolProvidersConfig;

use crate::configuration::Settings;

/// Shared application state
///
/// `agent` is `None` when startup could not build one; handlers answer with an error
/// payload instead of touching any tool.
#[derive(Clone)]
pub struct AppState {
    pub agent: Option<Arc<Agent>>,
}

impl AppState {
    pub fn new(agent: Option<Agent>) -> Self {
        Self {
            agent: agent.map(Arc::new),
        }
    }
}

/// Connect the model and the tool providers described by the settings
pub async fn build_agent(settings: &Settings) -> Result<Agent> {
    let provider = OpenAiProvider::new(settings.model.provider_config()?)?;
    tracing::info!(model = provider.model(), "model provider configured");

    let providers = ToolProvidersConfig::load(&settings.agent.tool_providers)?;
    let registry = ToolRegistry::connect(&providers).await?;
    tracing::info!(tools = registry.tools().len(), "tool registry ready");

    let policy = match &settings.agent.policy_file {
        Some(path) => ConversationPolicy::from_file(path)?,
        None => ConversationPolicy::new(),
    }
    .with_playlist_sizes(
        settings.agent.default_playlist_size,
        settings.agent.max_playlist_size,
    );

    Ok(Agent::new(Box::new(provider), registry)
        .with_policy(policy)
        .with_max_turns(settings.agent.max_turns)
        .with_tool_timeout(Duration::from_secs(settings.agent.tool_timeout_secs)))
}
