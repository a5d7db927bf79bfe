//! MCP server configuration.
//!
//! The server table lives under the `mcp_servers` key of a YAML config
//! file. The file is found by a first-match search: the `AISBOT_MCP_CONFIG`
//! environment variable, then `<workspace>/config.yaml`, the current
//! directory's `config.yaml`, and finally `~/.aisbot/config.yaml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use aisbot_core::config::McpServerConfig;
use aisbot_core::utils;

/// Environment variable overriding the MCP config location.
pub const MCP_CONFIG_ENV: &str = "AISBOT_MCP_CONFIG";

/// Candidate config paths in search order. Only existing files are
/// returned.
pub fn mcp_config_candidates(workspace: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(env_path) = std::env::var(MCP_CONFIG_ENV) {
        if !env_path.is_empty() {
            candidates.push(utils::expand_home(&env_path));
        }
    }
    candidates.push(workspace.join("config.yaml"));
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("config.yaml"));
    }
    candidates.push(utils::get_data_path().join("config.yaml"));

    candidates.retain(|p| p.is_file());
    candidates
}

/// Parse the `mcp_servers` table from one config file. A file without any
/// servers is an error so the caller can fall through to the next
/// candidate.
pub fn load_mcp_servers(path: &Path) -> anyhow::Result<BTreeMap<String, McpServerConfig>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read MCP config {}: {e}", path.display()))?;

    #[derive(serde::Deserialize)]
    struct McpSection {
        #[serde(default)]
        mcp_servers: BTreeMap<String, McpServerConfig>,
    }

    let section: McpSection = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse MCP config {}: {e}", path.display()))?;

    if section.mcp_servers.is_empty() {
        anyhow::bail!("no MCP servers configured in {}", path.display());
    }
    Ok(section.mcp_servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aisbot_core::config::McpTransport;

    #[test]
    fn loads_server_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
mcp_servers:
  math:
    transport: stdio
    command: math-server
  web:
    transport: http
    url: http://127.0.0.1:9100/mcp
"#,
        )
        .unwrap();

        let servers = load_mcp_servers(&path).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers["math"].transport, McpTransport::Stdio);
        assert_eq!(servers["web"].transport, McpTransport::Http);
    }

    #[test]
    fn empty_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "agents:\n  defaults: {}\n").unwrap();

        let err = load_mcp_servers(&path).unwrap_err();
        assert!(err.to_string().contains("no MCP servers configured"));
    }

    #[test]
    fn candidates_include_workspace_config() {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(
            workspace.path().join("config.yaml"),
            "mcp_servers: {x: {transport: stdio}}\n",
        )
        .unwrap();

        let candidates = mcp_config_candidates(workspace.path());
        assert!(candidates
            .iter()
            .any(|p| p.starts_with(workspace.path())));
    }

    #[test]
    fn missing_files_are_filtered_out() {
        let workspace = tempfile::tempdir().unwrap();
        let candidates = mcp_config_candidates(workspace.path());
        assert!(candidates.iter().all(|p| p.is_file()));
    }
}
