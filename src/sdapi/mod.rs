pub mod client;
pub mod types;

pub use client::{DebuggerClient, Retry, CLIENT_ID};
