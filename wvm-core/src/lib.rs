pub mod command;
pub mod error;

pub use command::is_tool_installed;
pub use error::{Result, WvmError};
