use thiserror::Error;

#[derive(Error, Debug)]
pub enum DebugError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Remote API returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No cartridge matches path: {0}")]
    UnknownCartridge(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DebugError {
    /// Whether a breakpoint DELETE hitting this error means the breakpoint
    /// was already gone on the remote store.
    pub fn is_already_removed(&self) -> bool {
        matches!(self, DebugError::Remote { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, DebugError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_removed_only_for_remote_404() {
        let gone = DebugError::Remote { status: 404, body: "no such breakpoint".into() };
        assert!(gone.is_already_removed());

        let denied = DebugError::Remote { status: 403, body: "forbidden".into() };
        assert!(!denied.is_already_removed());
        assert!(!DebugError::Connection("refused".into()).is_already_removed());
    }
}
