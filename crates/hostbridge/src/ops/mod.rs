//! File and command operations invoked by task workers.

mod command;
mod error;
mod files;

pub(crate) use command::exit_code;
pub use command::{CommandOutput, run_command};
pub use error::{OpError, OpResult};
pub use files::{delete_path, list_dir, read_file, write_file};
