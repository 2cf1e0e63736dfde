use gantry::cli::commands::{CliArgs, Commands};
use gantry::cli::handlers::{
    handle_build, handle_compose, handle_env, handle_promote, handle_run, handle_scan,
};
use gantry::util::logging;
use gantry::VERSION;

use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("gantry v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Run(run_args) => handle_run(&args, run_args).await,
        Commands::Build(build_args) => handle_build(&args, build_args).await,
        Commands::Scan(scan_args) => handle_scan(&args, scan_args).await,
        Commands::Promote(promote_args) => handle_promote(&args, promote_args).await,
        Commands::Env(env_args) => handle_env(&args, env_args).await,
        Commands::Compose(compose_args) => handle_compose(&args, compose_args).await,
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    if let Some(level) = &args.log_level {
        logging::init_from_env(Some(level));
    } else if args.verbose {
        logging::init_from_env(Some("debug"));
    } else if args.quiet {
        logging::init_from_env(Some("error"));
    } else {
        logging::init_from_env(None);
    }
}
