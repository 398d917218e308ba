pub mod args;
pub mod config;
pub mod core;
pub mod error;
pub mod system;
pub mod utils;

pub use args::{Args, Command};
pub use config::Settings;
pub use core::{ApplyPipeline, ProfileStore};
