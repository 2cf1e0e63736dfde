pub mod commands;
pub mod handlers;

pub use commands::{
    BuildArgs, CliArgs, Commands, ComposeArgs, EnvArgs, PromoteArgs, RunArgs, ScanArgs,
};
