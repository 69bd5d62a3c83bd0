mod app;
mod cli_opts;
mod config;

pub use app::*;
pub use cli_opts::{command_from_args, command_from_cli};
pub use config::*;
