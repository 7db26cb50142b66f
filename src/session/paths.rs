//! Cartridge path translation.
//!
//! The editor addresses files by absolute workspace path; the remote
//! debugger addresses them as `/<cartridge-name>/<relative-path>` with `/`
//! separators. Paths that fall outside every configured cartridge map to a
//! single sentinel so a stray request degrades instead of crashing.

use crate::config::CartridgeEntry;
use crate::error::{DebugError, Result};
use std::path::MAIN_SEPARATOR;

/// Remote-side (and client-side) stand-in for an untranslatable path.
pub const UNRESOLVED_PATH: &str = "/.unresolved";

/// Prefix matching follows the platform's filesystem case rules.
const CASE_INSENSITIVE: bool = cfg!(any(windows, target_os = "macos"));

#[derive(Debug, Clone)]
pub struct PathMap {
    cartridges: Vec<CartridgeEntry>,
}

impl PathMap {
    pub fn new(cartridges: Vec<CartridgeEntry>) -> Self {
        Self { cartridges }
    }

    pub fn is_empty(&self) -> bool {
        self.cartridges.is_empty()
    }

    /// Editor-absolute path to remote `/<name>/<rel>` form.
    pub fn to_remote(&self, client_path: &str) -> Result<String> {
        for cartridge in &self.cartridges {
            let root = cartridge.path.trim_end_matches(['/', '\\']);
            if let Some(rel) = strip_root(client_path, root) {
                let rel = rel.replace('\\', "/");
                let rel = rel.trim_start_matches('/');
                return Ok(format!("/{}/{}", cartridge.name, rel));
            }
        }
        Err(DebugError::UnknownCartridge(client_path.to_string()))
    }

    /// Remote `/<name>/<rel>` form back to an editor-absolute path.
    pub fn to_client(&self, remote_path: &str) -> Result<String> {
        let trimmed = remote_path.trim_start_matches('/');
        let (name, rel) = match trimmed.split_once('/') {
            Some(parts) => parts,
            None => (trimmed, ""),
        };

        let cartridge = self
            .cartridges
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| DebugError::UnknownCartridge(remote_path.to_string()))?;

        let root = cartridge.path.trim_end_matches(['/', '\\']);
        let rel = rel.replace('/', &MAIN_SEPARATOR.to_string());
        if rel.is_empty() {
            Ok(root.to_string())
        } else {
            Ok(format!("{}{}{}", root, MAIN_SEPARATOR, rel))
        }
    }
}

fn strip_root<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    if path.len() < root.len() {
        return None;
    }
    let (head, tail) = path.split_at(root.len());
    let matches = if CASE_INSENSITIVE {
        head.eq_ignore_ascii_case(root)
    } else {
        head == root
    };
    if !matches {
        return None;
    }
    // Reject prefix matches that land mid-component (/work/app vs /work/app2).
    if !tail.is_empty() && !tail.starts_with('/') && !tail.starts_with('\\') {
        return None;
    }
    Some(tail)
}
