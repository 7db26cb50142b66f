pub mod protocol;
pub mod transport;

pub use transport::{MessageReader, MessageWriter};
