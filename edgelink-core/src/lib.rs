pub mod error;
pub mod version;
pub mod wire;

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::version::version;
pub use crate::wire::{CommandCode, CommandHeader, COMMAND_MAGIC, DATA_LIMIT, WIRE_VERSION};
