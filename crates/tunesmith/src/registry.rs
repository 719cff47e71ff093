use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::systems::{McpSystem, System, SystemError, ToolProvidersConfig};

/// Tools hidden from the model unless the provider config overrides the list.
///
/// Tunesmith curates; it does not drive playback, inspect the player, or edit the
/// user's saved library.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "getNowPlaying",
    "getQueue",
    "getAvailableDevices",
    "playMusic",
    "pausePlayback",
    "resumePlayback",
    "skipToNext",
    "skipToPrevious",
    "addToQueue",
    "setVolume",
    "adjustVolume",
    "saveOrRemoveAlbum",
    "saveTracks",
    "removeUsersSavedTracks",
];

pub fn default_denylist() -> Vec<String> {
    DEFAULT_DENYLIST.iter().map(|name| name.to_string()).collect()
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to read tool provider config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid tool provider config: {0}")]
    Config(String),

    #[error("No tool providers configured")]
    NoProviders,

    #[error("Tool provider '{name}' failed to start: {source}")]
    Provider {
        name: String,
        #[source]
        source: SystemError,
    },

    #[error("Tool '{tool}' is offered by both '{first}' and '{second}'")]
    DuplicateTool {
        tool: String,
        first: String,
        second: String,
    },
}

/// The tools offered by `tools` minus anything named in `denylist`, order preserved
pub fn filter_tools(tools: &[Tool], denylist: &[String]) -> Vec<Tool> {
    tools
        .iter()
        .filter(|tool| !denylist.iter().any(|denied| denied == &tool.name))
        .cloned()
        .collect()
}

/// Every permitted tool across all connected providers, and where to route calls to it
pub struct ToolRegistry {
    systems: Vec<Box<dyn System>>,
    tools: Vec<Tool>,
    /// tool name -> (index into systems, index into tools)
    routes: HashMap<String, (usize, usize)>,
}

impl ToolRegistry {
    pub fn new(systems: Vec<Box<dyn System>>, denylist: &[String]) -> Result<Self, RegistryError> {
        let mut tools = Vec::new();
        let mut routes: HashMap<String, (usize, usize)> = HashMap::new();

        for (index, system) in systems.iter().enumerate() {
            info!(system = system.name(), description = system.description(), "registering tool provider");
            let offered = system.tools();
            let permitted = filter_tools(offered, denylist);
            if permitted.len() < offered.len() {
                info!(
                    system = system.name(),
                    hidden = offered.len() - permitted.len(),
                    "hiding denylisted tools"
                );
            }

            for tool in permitted {
                if let Some(&(existing, _)) = routes.get(&tool.name) {
                    return Err(RegistryError::DuplicateTool {
                        tool: tool.name,
                        first: systems[existing].name().to_string(),
                        second: system.name().to_string(),
                    });
                }
                routes.insert(tool.name.clone(), (index, tools.len()));
                tools.push(tool);
            }
        }

        Ok(Self {
            systems,
            tools,
            routes,
        })
    }

    /// A registry with no providers and no tools
    pub fn empty() -> Self {
        Self {
            systems: Vec::new(),
            tools: Vec::new(),
            routes: HashMap::new(),
        }
    }

    /// Start every configured MCP server and collect its permitted tools
    pub async fn connect(config: &ToolProvidersConfig) -> Result<Self, RegistryError> {
        if config.mcp_servers.is_empty() {
            return Err(RegistryError::NoProviders);
        }

        let mut systems: Vec<Box<dyn System>> = Vec::with_capacity(config.mcp_servers.len());
        for (name, server) in &config.mcp_servers {
            let system = McpSystem::spawn(name, server)
                .await
                .map_err(|source| RegistryError::Provider {
                    name: name.clone(),
                    source,
                })?;
            systems.push(Box::new(system));
        }

        let denylist = config.denylist.clone().unwrap_or_else(default_denylist);
        Self::new(systems, &denylist)
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.routes.get(name).map(|&(_, tool)| &self.tools[tool])
    }

    /// (provider name, instructions) for each provider that supplied instructions
    pub fn instructions(&self) -> Vec<(String, String)> {
        self.systems
            .iter()
            .filter(|system| !system.instructions().trim().is_empty())
            .map(|system| (system.name().to_string(), system.instructions().to_string()))
            .collect()
    }

    /// Route a call to the provider that owns the tool. Denylisted and unknown tools
    /// are both reported as not found.
    pub async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let Some(&(index, _)) = self.routes.get(&tool_call.name) else {
            warn!(tool = %tool_call.name, "call to unknown tool");
            return Err(AgentError::ToolNotFound(tool_call.name));
        };
        self.systems[index].call(tool_call).await
    }
}
