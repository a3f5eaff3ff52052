//! CLI command handlers, one file per command.

mod checksum;
mod config;
mod upload;

pub use checksum::run_checksum;
pub use config::run_config;
pub use upload::{run_upload, UploadArgs};
