//! Scriptjail CLI
//!
//! A command-line tool for running Python scripts in nsjail sandboxes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scriptjail::{Config, EXAMPLE_CONFIG, ExecutionRequest, Runner};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scriptjail")]
#[command(about = "Run untrusted Python scripts under nsjail and report structured results")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: scriptjail.toml)
        #[arg(short, long, default_value = "scriptjail.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run one or more scripts concurrently, printing one JSON report per line
    Run {
        /// Script files defining `main()`
        #[arg(value_name = "FILE", required = true)]
        scripts: Vec<PathBuf>,

        /// Time limit in seconds
        #[arg(short, long)]
        time_limit: Option<u64>,

        /// Memory limit in MB
        #[arg(short, long)]
        memory_limit: Option<u64>,

        /// Pretty-print the JSON reports
        #[arg(long)]
        pretty: bool,
    },

    /// Check that nsjail and the interpreter are usable
    Check,

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Init { output, force } = &cli.command {
        return init_config(output, *force).await;
    }

    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Run {
            scripts,
            time_limit,
            memory_limit,
            pretty,
        } => run_scripts(config, scripts, time_limit, memory_limit, pretty).await,
        Commands::Check => check(config).await,
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn run_scripts(
    config: Config,
    scripts: Vec<PathBuf>,
    time_limit: Option<u64>,
    memory_limit: Option<u64>,
    pretty: bool,
) -> Result<()> {
    let runner = Runner::new(config);
    let cancel = CancellationToken::new();

    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling running scripts");
                cancel.cancel();
            }
        })
    };

    info!(
        count = scripts.len(),
        capacity = runner.capacity(),
        "running scripts"
    );

    let mut handles = Vec::with_capacity(scripts.len());
    for path in scripts {
        let script = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read script '{}'", path.display()))?;

        let mut request = ExecutionRequest::new(script);
        request.time_limit = time_limit;
        request.memory_limit = memory_limit;

        let runner = runner.clone();
        let cancel = cancel.clone();
        handles.push((
            path,
            tokio::spawn(async move {
                request.validate(&runner.config().limit_bounds)?;
                Ok::<_, scriptjail::RequestError>(
                    runner.execute_with_cancel(&request, &cancel).await,
                )
            }),
        ));
    }

    let mut all_succeeded = true;
    for (path, handle) in handles {
        let line = match handle.await.context("execution task panicked")? {
            Ok(report) => {
                all_succeeded &= report.outcome.is_success();
                json!({ "file": path.display().to_string(), "report": report })
            }
            Err(e) => {
                all_succeeded = false;
                json!({ "file": path.display().to_string(), "error": e.to_string() })
            }
        };
        print_json(&line, pretty)?;
    }

    ctrl_c.abort();

    if all_succeeded {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn print_json(value: &serde_json::Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("failed to serialize report")?;
    println!("{text}");
    Ok(())
}

async fn check(config: Config) -> Result<()> {
    let runner = Runner::new(config);
    let report = runner.check().await.context("isolation layer check failed")?;

    println!("nsjail: {}", report.nsjail.display());
    println!("python: {}", report.python.display());
    if report.missing_mounts.is_empty() {
        println!("mounts: ok");
        Ok(())
    } else {
        for source in &report.missing_mounts {
            println!("missing mount source: {source}");
        }
        anyhow::bail!("{} required mount source(s) missing", report.missing_mounts.len());
    }
}

fn show_config(config: &Config) {
    println!("Default resource limits:");
    println!("  Time limit: {:?} s", config.default_limits.time_limit);
    println!("  Memory limit: {:?} MB", config.default_limits.memory_limit);
    println!(
        "  Accepted time limits: {}..={} s",
        config.limit_bounds.min_time_limit, config.limit_bounds.max_time_limit
    );
    println!(
        "  Accepted memory limits: {}..={} MB",
        config.limit_bounds.min_memory_limit, config.limit_bounds.max_memory_limit
    );
    println!(
        "  Host ceiling: {} s, {} MB",
        config.host_ceiling.max_time_limit, config.host_ceiling.max_memory_limit
    );
    println!("  Max processes: {}", config.max_processes);
    println!("  Max open files: {}", config.max_open_files);
    println!("  Max file size: {} MB", config.max_file_size);
    println!("  Max output: {} bytes", config.max_output_bytes);
    println!();
    println!("nsjail binary: {}", config.nsjail_binary().display());
    if let Some(base) = &config.nsjail_config {
        println!("nsjail base config: {}", base.display());
    }
    println!("Interpreter: {}", config.python_binary().display());
    println!("Scratch root: {}", config.scratch_dir().display());
    println!("cgroup v2: {}", config.cgroup);
    println!("Concurrency: {}", config.max_concurrency);
    println!("Direct fallback: {}", config.fallback_to_direct);
    println!();
    println!("Mounts:");
    for mount in &config.mounts {
        let optional = if mount.optional { " (optional)" } else { "" };
        println!("  {} -> {} [ro]{optional}", mount.source, mount.target);
    }
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
