pub mod cli;
pub mod config;
pub mod dap;
pub mod error;
pub mod sdapi;
pub mod session;

pub use error::{DebugError, Result};
pub use sdapi::DebuggerClient;
pub use session::DebugSession;
