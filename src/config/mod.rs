use crate::error::{DebugError, Result};
use serde::Deserialize;
use std::env;

/// Connection settings for the remote debugger. These never arrive through
/// launch arguments; the editor supplies them with the custom
/// `DebuggerConfig` request after the adapter asks for them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub code_version: Option<String>,
    /// Sandboxes ship self-signed certificates, so verification stays off
    /// unless explicitly turned on.
    #[serde(default)]
    pub verify_tls: bool,
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(DebugError::Config("hostname must not be empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(DebugError::Config("username must not be empty".to_string()));
        }
        Ok(())
    }
}

/// A named code root. Order matters to the target application; the debug
/// session only needs the name/path pair for path translation.
#[derive(Debug, Clone, Deserialize)]
pub struct CartridgeEntry {
    pub name: String,
    pub path: String,
}

/// Payload of the `DebuggerConfig` request: credentials plus the ordered
/// cartridge roots of the workspace.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub config: ConnectionConfig,
    #[serde(default)]
    pub cartridges: Vec<CartridgeEntry>,
}

/// Launch arguments carry no connection data, only protocol-level switches.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    #[serde(default)]
    pub stop_on_entry: bool,
    #[serde(default)]
    pub no_debug: bool,
}

/// Outbound HTTPS proxy URL from the environment, if configured.
pub fn proxy_from_env() -> Option<String> {
    let url = env::var("HTTPS_PROXY")
        .or_else(|_| env::var("https_proxy"))
        .ok()?;
    let url = url.trim();
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_parses_debugger_config_payload() {
        let raw = serde_json::json!({
            "config": {
                "hostname": "dev01.example.demandware.net",
                "username": "admin",
                "password": "secret",
                "codeVersion": "version1"
            },
            "cartridges": [
                {"name": "app_core", "path": "/work/project/cartridges/app_core"}
            ]
        });

        let cfg: SessionConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(cfg.config.hostname, "dev01.example.demandware.net");
        assert_eq!(cfg.config.code_version.as_deref(), Some("version1"));
        assert!(!cfg.config.verify_tls);
        assert_eq!(cfg.cartridges.len(), 1);
        assert_eq!(cfg.cartridges[0].name, "app_core");
    }

    #[test]
    fn validate_rejects_blank_hostname() {
        let cfg = ConnectionConfig {
            hostname: "  ".into(),
            username: "admin".into(),
            password: "secret".into(),
            code_version: None,
            verify_tls: false,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn launch_arguments_default_when_fields_missing() {
        let args: LaunchArguments = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(!args.stop_on_entry);
        assert!(!args.no_debug);
    }
}
