use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::registry::RegistryError;

fn default_timeout_secs() -> u64 {
    60
}

/// How to launch one MCP server over stdio
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Per-request timeout for the JSON-RPC exchange
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// The tool-provider file: which servers to start, and optionally which tools to hide
///
/// Accepts YAML as well as the common JSON `{"mcpServers": {...}}` layout.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolProvidersConfig {
    #[serde(default, alias = "mcpServers")]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    /// Replaces the built-in denylist when present
    #[serde(default)]
    pub denylist: Option<Vec<String>>,
}

impl ToolProvidersConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Parse the file contents and expand `${VAR}` references from the environment
    pub fn from_yaml(text: &str) -> Result<Self, RegistryError> {
        let raw: Self =
            serde_yaml::from_str(text).map_err(|e| RegistryError::Config(e.to_string()))?;
        raw.expanded()
    }

    fn expanded(mut self) -> Result<Self, RegistryError> {
        for (name, server) in self.mcp_servers.iter_mut() {
            let expand = |value: &str| -> Result<String, RegistryError> {
                shellexpand::full(value)
                    .map(|cow| cow.into_owned())
                    .map_err(|e| RegistryError::Config(format!("server '{}': {}", name, e)))
            };
            server.command = expand(&server.command)?;
            server.args = server
                .args
                .iter()
                .map(|arg| expand(arg))
                .collect::<Result<_, _>>()?;
            for value in server.env.values_mut() {
                *value = expand(value)?;
            }
            if let Some(cwd) = &server.cwd {
                server.cwd = Some(PathBuf::from(expand(&cwd.to_string_lossy())?));
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    #[test]
    fn test_parses_claude_style_json() {
        let text = r#"{
            "mcpServers": {
                "spotify": {
                    "command": "node",
                    "args": ["spotify-mcp-server/build/index.js"]
                }
            }
        }"#;

        let config = ToolProvidersConfig::from_yaml(text).unwrap();
        let spotify = &config.mcp_servers["spotify"];
        assert_eq!(spotify.command, "node");
        assert_eq!(spotify.args, vec!["spotify-mcp-server/build/index.js"]);
        assert_eq!(spotify.timeout_secs, 60);
        assert!(spotify.env.is_empty());
        assert_eq!(config.denylist, None);
    }

    #[test]
    #[serial]
    fn test_expands_environment_references() {
        env::set_var("TUNESMITH_TEST_CLIENT_ID", "abc123");
        env::set_var("TUNESMITH_TEST_ROOT", "/opt/spotify");

        let text = indoc! {r#"
            mcp_servers:
              spotify:
                command: ${TUNESMITH_TEST_ROOT}/bin/server
                args: ["--verbose"]
                env:
                  SPOTIFY_CLIENT_ID: ${TUNESMITH_TEST_CLIENT_ID}
                cwd: ${TUNESMITH_TEST_ROOT}
                timeout_secs: 15
            denylist: [playMusic]
        "#};
        let config = ToolProvidersConfig::from_yaml(text).unwrap();
        let spotify = &config.mcp_servers["spotify"];
        assert_eq!(spotify.command, "/opt/spotify/bin/server");
        assert_eq!(spotify.env["SPOTIFY_CLIENT_ID"], "abc123");
        assert_eq!(spotify.cwd, Some(PathBuf::from("/opt/spotify")));
        assert_eq!(spotify.timeout_secs, 15);
        assert_eq!(config.denylist, Some(vec!["playMusic".to_string()]));

        env::remove_var("TUNESMITH_TEST_CLIENT_ID");
        env::remove_var("TUNESMITH_TEST_ROOT");
    }

    #[test]
    #[serial]
    fn test_missing_variable_is_a_config_error() {
        env::remove_var("TUNESMITH_TEST_UNSET");
        let text = "mcp_servers:\n  spotify:\n    command: ${TUNESMITH_TEST_UNSET}\n";
        let err = ToolProvidersConfig::from_yaml(text).unwrap_err();
        assert!(matches!(err, RegistryError::Config(msg) if msg.contains("spotify")));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mcp_servers:\n  spotify:\n    command: spotify-mcp").unwrap();

        let config = ToolProvidersConfig::load(file.path()).unwrap();
        assert_eq!(config.mcp_servers["spotify"].command, "spotify-mcp");

        let missing = ToolProvidersConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(missing, RegistryError::Read { .. }));
    }
}
