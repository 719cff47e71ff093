mod config;
pub mod mcp;
mod system;

pub use config::{McpServerConfig, ToolProvidersConfig};
pub use mcp::{McpClient, McpSystem};
pub use system::{System, SystemError};
