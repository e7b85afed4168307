//! Ember CLI - run API scenarios from YAML or JSON files.

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use ember::{ConsoleReporter, Engine, EngineConfig, LoadedScenario, ReportFormat, ScenarioLoader};
use std::path::{Path, PathBuf};
use std::process::exit;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Ember - declarative API scenario runner.
#[derive(Parser, Debug)]
#[command(name = "ember", version, about)]
struct Cli {
    /// Scenario files or directories. Defaults to `scenarios/` when present.
    paths: Vec<PathBuf>,

    /// Engine configuration file.
    #[arg(short = 'c', long = "config", env = "EMBER_CONFIG")]
    config: Option<PathBuf>,

    /// Named environment from the configuration file.
    #[arg(short = 'e', long = "env")]
    environment: Option<String>,

    /// Only run scenarios whose name contains this text or that carry it
    /// as a tag.
    #[arg(short = 'f', long = "filter")]
    filter: Option<String>,

    /// Base URL override for all scenarios.
    #[arg(short = 'b', long = "base-url")]
    base_url: Option<String>,

    /// Request timeout in seconds.
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,

    /// Run the test groups of every scenario concurrently.
    #[arg(long = "parallel")]
    parallel: bool,

    /// Report format: console, json, yaml, html or markdown. `console` only
    /// logs unless `--output` is given, in which case the file is JSON.
    #[arg(long = "format", default_value = "console")]
    format: OutputFormat,

    /// Write the aggregate report to this file.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum OutputFormat {
    Console,
    Json,
    Yaml,
    Html,
    Markdown,
}

/// Where the aggregate report goes, if anywhere.
fn report_target(format: OutputFormat, output: Option<&Path>) -> Option<(PathBuf, ReportFormat)> {
    match (format, output) {
        (OutputFormat::Console, None) => None,
        (OutputFormat::Console | OutputFormat::Json, Some(path)) => {
            Some((path.to_path_buf(), ReportFormat::Json))
        }
        (OutputFormat::Json, None) => Some((PathBuf::from("ember-report.json"), ReportFormat::Json)),
        (OutputFormat::Yaml, path) => Some(file_target(path, "ember-report.yaml", ReportFormat::Yaml)),
        (OutputFormat::Html, path) => Some(file_target(path, "ember-report.html", ReportFormat::Html)),
        (OutputFormat::Markdown, path) => {
            Some(file_target(path, "ember-report.md", ReportFormat::Markdown))
        }
    }
}

fn file_target(path: Option<&Path>, default: &str, format: ReportFormat) -> (PathBuf, ReportFormat) {
    (path.map_or_else(|| PathBuf::from(default), Path::to_path_buf), format)
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    if tracing::dispatcher::has_been_set() {
        return;
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn load_config(args: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(args.config.as_deref())?;
    if let Some(name) = &args.environment {
        if config.environment(name).is_none() {
            return Err(anyhow!("Unknown environment: {}", name));
        }
        config = config.merge_environment(name);
    }
    if let Some(base_url) = &args.base_url {
        config.global.base_url = Some(base_url.clone());
    }
    if let Some(timeout) = args.timeout {
        config.defaults.http_timeout_secs = timeout;
    }
    Ok(config)
}

fn load_scenarios(args: &Cli) -> Result<Vec<LoadedScenario>> {
    let mut loader = ScenarioLoader::new();
    if args.paths.is_empty() {
        let default = Path::new("scenarios");
        if !default.exists() {
            return Err(anyhow!("No scenario paths given and ./scenarios does not exist"));
        }
        loader.add_path(default);
    }
    for path in &args.paths {
        if !path.exists() {
            return Err(anyhow!("Path does not exist: {}", path.display()));
        }
        loader.add_path(path);
    }

    let mut scenarios = loader.load_all()?;
    if let Some(filter) = &args.filter {
        let needle = filter.to_lowercase();
        scenarios.retain(|loaded| {
            let scenario = &loaded.scenario;
            scenario.name.to_lowercase().contains(&needle)
                || scenario.tags.iter().any(|tag| tag.eq_ignore_ascii_case(filter))
        });
    }
    if args.parallel {
        for loaded in &mut scenarios {
            loaded.scenario.config.parallel = true;
        }
    }

    if scenarios.is_empty() {
        return Err(anyhow!("No test scenarios found"));
    }
    Ok(scenarios)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.verbose);
    info!("ember {}", ember::VERSION);

    let config = load_config(&args)?;
    let scenarios = load_scenarios(&args)?;
    info!("Running {} test(s)...", scenarios.len());

    let mut reporter = ConsoleReporter::new(args.verbose);
    if let Some((path, format)) = report_target(args.format, args.output.as_deref()) {
        reporter = reporter.with_output(path, format);
    }

    let engine = Engine::new(config);
    let success = engine.run(&scenarios, &mut reporter).await?;

    if !success {
        exit(1);
    }

    Ok(())
}
