//! Command handlers returning process exit codes
//!
//! Exit codes: 0 success, 1 stage failure (including the vulnerability
//! gate), 2 configuration errors. clap itself exits with 2 on usage
//! errors, so configuration problems land in the same bucket.

use crate::builder::DockerEngine;
use crate::cli::commands::{
    BuildArgs, CliArgs, ComposeArgs, EnvArgs, PromoteArgs, RunArgs, ScanArgs,
};
use crate::compose::ComposeFile;
use crate::config::PipelineConfig;
use crate::environment::report::DEFAULT_REPORT_NAME;
use crate::environment::{DotenvReport, Environment};
use crate::output::{OutputFormat, OutputFormatter, PipelineReport, PIPELINE_REPORT_NAME};
use crate::pipeline::{
    BuildStage, PipelineContext, PipelineOrchestrator, PipelineRun, PipelineStage, PromoteStage,
    ScanStage,
};
use crate::progress::LoggingHandler;
use crate::reference::ImageReference;
use crate::registry::RegistryClient;
use crate::scanner::{GatePolicy, Severity, TrivyScanner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const EXIT_OK: i32 = 0;
const EXIT_STAGE_FAILURE: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;

const COMPOSE_CANDIDATES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

fn project_dir(args: &CliArgs) -> PathBuf {
    args.project_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."))
}

fn load_environment(args: &CliArgs) -> Result<Environment, i32> {
    Environment::load(&project_dir(args), &args.env_file).map_err(|err| {
        error!(error = %err, "Failed to load environment");
        eprintln!("{err}");
        EXIT_CONFIG_ERROR
    })
}

fn resolve_config(env: &Environment, dir: &Path) -> Result<PipelineConfig, i32> {
    let config = PipelineConfig::resolve(env, dir).map_err(|err| {
        error!(error = %err, "Configuration error");
        eprintln!("{err}");
        eprintln!("Set the missing variables in the environment, .env or .env.secret.");
        EXIT_CONFIG_ERROR
    })?;
    config.validate().map_err(|err| {
        error!(error = %err, "Configuration error");
        eprintln!("{err}");
        EXIT_CONFIG_ERROR
    })?;
    Ok(config)
}

fn connect_engine() -> Result<Arc<DockerEngine>, i32> {
    DockerEngine::connect().map(Arc::new).map_err(|err| {
        error!(error = %err, "Container engine unavailable");
        eprintln!("{err}");
        eprintln!("Is the Docker daemon running and DOCKER_HOST pointing at it?");
        EXIT_STAGE_FAILURE
    })
}

fn build_scanner(config: &PipelineConfig) -> Arc<TrivyScanner> {
    Arc::new(
        TrivyScanner::new(
            &config.scanner_binary,
            Duration::from_secs(config.scan_timeout_secs),
        )
        .with_credentials(config.internal_credentials.clone())
        .with_ca_cert(config.ca_cert.clone()),
    )
}

fn build_registry(config: &PipelineConfig) -> Result<Arc<RegistryClient>, i32> {
    RegistryClient::from_config(config)
        .map(Arc::new)
        .map_err(|err| {
            error!(error = %err, "Failed to set up registry client");
            eprintln!("{err}");
            EXIT_CONFIG_ERROR
        })
}

/// Context wired with the production engine, scanner and registry.
fn production_context(
    args: &CliArgs,
    config: PipelineConfig,
    env: Environment,
) -> Result<PipelineContext, i32> {
    let engine = connect_engine()?;
    let scanner = build_scanner(&config);
    let registry = build_registry(&config)?;
    let dir = project_dir(args);

    let mut context = PipelineContext::new(engine, scanner, registry, config, env, dir)
        .with_progress(Arc::new(LoggingHandler));

    // Later stages pick up values an earlier invocation left behind.
    let report_path = context.config.report_dir.join(DEFAULT_REPORT_NAME);
    if report_path.is_file() {
        match DotenvReport::load(&report_path) {
            Ok(report) => context.report = report,
            Err(err) => {
                error!(error = %err, "Ignoring unreadable dotenv report");
            }
        }
    }
    Ok(context)
}

fn write_artifacts(context: &PipelineContext, run: &PipelineRun) -> anyhow::Result<PipelineReport> {
    let report_dir = &context.config.report_dir;
    std::fs::create_dir_all(report_dir)?;

    if !context.report.is_empty() {
        let path = report_dir.join(DEFAULT_REPORT_NAME);
        context.report.write(&path)?;
        info!(path = %path.display(), "Dotenv report written");
    }

    let report = PipelineReport::from_run(&context.config, run, context.scan_summary.as_ref())?;
    let path = report_dir.join(PIPELINE_REPORT_NAME);
    report.write(&path)?;
    info!(path = %path.display(), "Pipeline report written");
    Ok(report)
}

async fn run_stages(
    args: &CliArgs,
    stages: Vec<Box<dyn PipelineStage>>,
    format: Option<OutputFormat>,
) -> i32 {
    let env = match load_environment(args) {
        Ok(env) => env,
        Err(code) => return code,
    };
    let config = match resolve_config(&env, &project_dir(args)) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let mut context = match production_context(args, config, env) {
        Ok(context) => context,
        Err(code) => return code,
    };

    let orchestrator = PipelineOrchestrator::with_progress(Box::new(LoggingHandler));
    let run = orchestrator.execute(stages, &mut context).await;

    match write_artifacts(&context, &run) {
        Ok(report) => {
            if let Some(format) = format {
                match OutputFormatter::new(format).format_pipeline_report(&report) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(err) => error!(error = %err, "Failed to render pipeline report"),
                }
            }
        }
        Err(err) => {
            error!(error = %err, "Failed to write report artifacts");
            eprintln!("{err:#}");
            return EXIT_STAGE_FAILURE;
        }
    }

    run.exit_code()
}

pub async fn handle_run(args: &CliArgs, run_args: &RunArgs) -> i32 {
    let env = match load_environment(args) {
        Ok(env) => env,
        Err(code) => return code,
    };
    let mut config = match resolve_config(&env, &project_dir(args)) {
        Ok(config) => config,
        Err(code) => return code,
    };
    if let Some(dir) = &run_args.report_dir {
        config.report_dir = dir.clone();
    }
    let mut context = match production_context(args, config, env) {
        Ok(context) => context,
        Err(code) => return code,
    };

    let stages: Vec<Box<dyn PipelineStage>> = vec![
        Box::new(BuildStage::new()),
        Box::new(ScanStage::new()),
        Box::new(PromoteStage::new()),
    ];
    let orchestrator = PipelineOrchestrator::with_progress(Box::new(LoggingHandler));
    let run = orchestrator.execute(stages, &mut context).await;

    match write_artifacts(&context, &run) {
        Ok(report) => {
            if !args.quiet {
                match OutputFormatter::new(run_args.format).format_pipeline_report(&report) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(err) => error!(error = %err, "Failed to render pipeline report"),
                }
            }
        }
        Err(err) => {
            error!(error = %err, "Failed to write report artifacts");
            eprintln!("{err:#}");
            return EXIT_STAGE_FAILURE;
        }
    }

    run.exit_code()
}

pub async fn handle_build(args: &CliArgs, build_args: &BuildArgs) -> i32 {
    let stages: Vec<Box<dyn PipelineStage>> = vec![Box::new(BuildStage {
        no_push: build_args.no_push,
    })];
    run_stages(args, stages, None).await
}

pub async fn handle_scan(args: &CliArgs, scan_args: &ScanArgs) -> i32 {
    let image = match &scan_args.image {
        Some(raw) => match raw.parse::<ImageReference>() {
            Ok(image) => Some(image),
            Err(err) => {
                eprintln!("{err}");
                return EXIT_CONFIG_ERROR;
            }
        },
        None => None,
    };
    let policy = match &scan_args.severity {
        Some(raw) => match raw.parse::<Severity>() {
            Ok(severity) => GatePolicy {
                severity_threshold: severity,
            },
            Err(err) => {
                eprintln!("{err}");
                return EXIT_CONFIG_ERROR;
            }
        },
        None => GatePolicy::default(),
    };

    let env = match load_environment(args) {
        Ok(env) => env,
        Err(code) => return code,
    };
    let config = match resolve_config(&env, &project_dir(args)) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let mut context = match production_context(args, config, env) {
        Ok(context) => context,
        Err(code) => return code,
    };

    let stage = ScanStage {
        policy,
        image,
        report_path: scan_args.report.clone(),
    };
    let orchestrator = PipelineOrchestrator::with_progress(Box::new(LoggingHandler));
    let run = orchestrator.execute(vec![Box::new(stage)], &mut context).await;

    if let Some(summary) = &context.scan_summary {
        if !args.quiet {
            match OutputFormatter::new(scan_args.format).format_scan_summary(summary) {
                Ok(rendered) => println!("{rendered}"),
                Err(err) => error!(error = %err, "Failed to render scan summary"),
            }
        }
    }

    run.exit_code()
}

pub async fn handle_promote(args: &CliArgs, promote_args: &PromoteArgs) -> i32 {
    let source = match &promote_args.image {
        Some(raw) => match raw.parse::<ImageReference>() {
            Ok(image) => Some(image),
            Err(err) => {
                eprintln!("{err}");
                return EXIT_CONFIG_ERROR;
            }
        },
        None => None,
    };

    let stages: Vec<Box<dyn PipelineStage>> = vec![Box::new(PromoteStage {
        keep_unverified: promote_args.keep_unverified,
        source,
    })];
    run_stages(args, stages, None).await
}

pub async fn handle_env(args: &CliArgs, env_args: &EnvArgs) -> i32 {
    let env = match load_environment(args) {
        Ok(env) => env,
        Err(code) => return code,
    };

    if env_args.check {
        match resolve_config(&env, &project_dir(args)) {
            Ok(_) => {
                if !args.quiet {
                    println!("environment OK");
                }
                return EXIT_OK;
            }
            Err(code) => return code,
        }
    }

    if let Some(path) = &env_args.output {
        let mut report = DotenvReport::new();
        for (key, value) in env.iter() {
            report.set(key, value);
        }
        if let Err(err) = report.write(path) {
            error!(error = %err, "Failed to write environment file");
            eprintln!("{err}");
            return EXIT_STAGE_FAILURE;
        }
        info!(path = %path.display(), "Resolved environment written");
    }

    match OutputFormatter::new(env_args.format).format_environment(&env) {
        Ok(rendered) => {
            if !args.quiet {
                println!("{rendered}");
            }
            EXIT_OK
        }
        Err(err) => {
            error!(error = %err, "Failed to render environment");
            eprintln!("{err:#}");
            EXIT_STAGE_FAILURE
        }
    }
}

pub async fn handle_compose(args: &CliArgs, compose_args: &ComposeArgs) -> i32 {
    let dir = project_dir(args);
    let path = match &compose_args.file {
        Some(path) => path.clone(),
        None => {
            match COMPOSE_CANDIDATES
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| candidate.is_file())
            {
                Some(path) => path,
                None => {
                    eprintln!("No compose file found in {}", dir.display());
                    return EXIT_CONFIG_ERROR;
                }
            }
        }
    };

    let env = match load_environment(args) {
        Ok(env) => env,
        Err(code) => return code,
    };
    let compose = match ComposeFile::load(&path) {
        Ok(compose) => compose,
        Err(err) => {
            error!(error = %err, file = %path.display(), "Failed to load compose file");
            eprintln!("{err}");
            return EXIT_CONFIG_ERROR;
        }
    };

    if compose_args.check {
        let check = compose.check(&env, &dir);
        match OutputFormatter::new(compose_args.format).format_compose_check(&check) {
            Ok(rendered) => {
                if !args.quiet {
                    println!("{rendered}");
                }
            }
            Err(err) => {
                error!(error = %err, "Failed to render compose check");
                return EXIT_STAGE_FAILURE;
            }
        }
        return if check.is_ok() {
            EXIT_OK
        } else {
            EXIT_CONFIG_ERROR
        };
    }

    match compose.render(&env) {
        Ok(rendered) => {
            if let Some(output) = &compose_args.output {
                if let Err(err) = std::fs::write(output, &rendered) {
                    error!(error = %err, "Failed to write rendered compose file");
                    eprintln!("Failed to write {}: {err}", output.display());
                    return EXIT_STAGE_FAILURE;
                }
                info!(path = %output.display(), "Rendered compose file written");
            } else if !args.quiet {
                print!("{rendered}");
            }
            EXIT_OK
        }
        Err(err) => {
            error!(error = %err, "Compose rendering failed");
            eprintln!("{err}");
            EXIT_CONFIG_ERROR
        }
    }
}
