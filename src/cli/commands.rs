use crate::output::OutputFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Gated container image delivery: build, scan, promote
#[derive(Parser, Debug)]
#[command(
    name = "gantry",
    about = "Gated container image delivery: build, scan, promote",
    version,
    author,
    long_about = "gantry drives a container image through a gated delivery pipeline: \
                  build the image and push it under an unverified tag, scan it for \
                  vulnerabilities, and promote it to the release registry only when no \
                  unfixed critical findings remain. Configuration comes from layered \
                  dotenv files and the process environment."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Verbose output (debug level)")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Project directory (defaults to current directory)"
    )]
    pub project_dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Extra env file, lowest precedence (repeatable, applied after .env and .env.secret)"
    )]
    pub env_file: Vec<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Run the full pipeline: build, scan, promote",
        long_about = "Builds the image, pushes the unverified tag, scans it and, when the \
                      vulnerability gate passes, promotes it to the release and latest tags.\n\n\
                      Examples:\n  \
                      gantry run\n  \
                      gantry run --project-dir services/scraper\n  \
                      gantry run --report-dir artifacts --format json"
    )]
    Run(RunArgs),

    #[command(
        about = "Build the image and push the unverified tag",
        long_about = "Builds the image from the project's Dockerfile with the standard build \
                      args and pushes it to the internal registry under the unverified tag.\n\n\
                      Examples:\n  \
                      gantry build\n  \
                      gantry build --no-push"
    )]
    Build(BuildArgs),

    #[command(
        about = "Scan an image and apply the promotion gate",
        long_about = "Runs the vulnerability scanner against the unverified image (or an \
                      explicit reference), writes the JSON report artifact and fails when \
                      any finding at or above the threshold has no fix available.\n\n\
                      Examples:\n  \
                      gantry scan\n  \
                      gantry scan registry.example.org/app:1.2.3 --severity high"
    )]
    Scan(ScanArgs),

    #[command(
        about = "Promote the verified image to the release registry",
        long_about = "Copies the unverified image to the release and latest tags in the \
                      external registry and deletes the unverified tag.\n\n\
                      Examples:\n  \
                      gantry promote\n  \
                      gantry promote --keep-unverified"
    )]
    Promote(PromoteArgs),

    #[command(
        about = "Resolve and display the layered environment",
        long_about = "Resolves the environment from .env, .env.secret, extra files and the \
                      process environment. Secrets are masked in the display.\n\n\
                      Examples:\n  \
                      gantry env\n  \
                      gantry env --check\n  \
                      gantry env --output resolved.env"
    )]
    Env(EnvArgs),

    #[command(
        about = "Render or check the compose descriptor",
        long_about = "Substitutes environment variables into the compose file and runs the \
                      operational configuration checks.\n\n\
                      Examples:\n  \
                      gantry compose\n  \
                      gantry compose --check\n  \
                      gantry compose --file deploy/docker-compose.yml --output rendered.yml"
    )]
    Compose(ComposeArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(
        long,
        value_name = "DIR",
        help = "Directory for report artifacts (defaults to GANTRY_REPORT_DIR or the project directory)"
    )]
    pub report_dir: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_parser = parse_format,
        default_value = "human",
        help = "Output format: json, yaml or human"
    )]
    pub format: OutputFormat,
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(long, help = "Build without pushing the unverified tag")]
    pub no_push: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ScanArgs {
    #[arg(
        value_name = "IMAGE",
        help = "Image reference to scan (defaults to the unverified tag)"
    )]
    pub image: Option<String>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Path for the JSON report artifact"
    )]
    pub report: Option<PathBuf>,

    #[arg(
        long,
        value_name = "SEVERITY",
        help = "Gate threshold: unknown, low, medium, high or critical (default critical)"
    )]
    pub severity: Option<String>,

    #[arg(
        short = 'f',
        long,
        value_parser = parse_format,
        default_value = "human",
        help = "Output format: json, yaml or human"
    )]
    pub format: OutputFormat,
}

#[derive(Parser, Debug, Clone)]
pub struct PromoteArgs {
    #[arg(
        value_name = "IMAGE",
        help = "Image reference to promote (defaults to the unverified tag)"
    )]
    pub image: Option<String>,

    #[arg(long, help = "Leave the unverified tag in place after promotion")]
    pub keep_unverified: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct EnvArgs {
    #[arg(long, help = "Validate required variables and exit")]
    pub check: bool,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write the resolved environment to a dotenv file"
    )]
    pub output: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_parser = parse_format,
        default_value = "human",
        help = "Output format: json, yaml or human"
    )]
    pub format: OutputFormat,
}

#[derive(Parser, Debug, Clone)]
pub struct ComposeArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Compose file (defaults to docker-compose.yml in the project directory)"
    )]
    pub file: Option<PathBuf>,

    #[arg(long, help = "Run the configuration checks instead of rendering")]
    pub check: bool,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write the rendered descriptor to a file instead of stdout"
    )]
    pub output: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_parser = parse_format,
        default_value = "human",
        help = "Output format for --check results: json, yaml or human"
    )]
    pub format: OutputFormat,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let args = CliArgs::parse_from(["gantry", "run", "--report-dir", "artifacts"]);
        match args.command {
            Commands::Run(run) => {
                assert_eq!(run.report_dir.unwrap(), PathBuf::from("artifacts"));
                assert_eq!(run.format, OutputFormat::Human);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_scan_with_image_and_severity() {
        let args = CliArgs::parse_from([
            "gantry",
            "scan",
            "registry.example.org/app:1.0",
            "--severity",
            "high",
            "-f",
            "json",
        ]);
        match args.command {
            Commands::Scan(scan) => {
                assert_eq!(scan.image.as_deref(), Some("registry.example.org/app:1.0"));
                assert_eq!(scan.severity.as_deref(), Some("high"));
                assert_eq!(scan.format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::parse_from([
            "gantry",
            "env",
            "--project-dir",
            "services/scraper",
            "--env-file",
            "ci.env",
            "--env-file",
            "extra.env",
            "-v",
        ]);
        assert!(args.verbose);
        assert_eq!(args.project_dir.unwrap(), PathBuf::from("services/scraper"));
        assert_eq!(args.env_file.len(), 2);
    }

    #[test]
    fn test_verbose_quiet_conflict() {
        let result = CliArgs::try_parse_from(["gantry", "run", "-v", "-q"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_format_rejected() {
        let result = CliArgs::try_parse_from(["gantry", "run", "--format", "xml"]);
        assert!(result.is_err());
    }
}
