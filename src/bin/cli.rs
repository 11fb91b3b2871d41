//! Code Dock CLI
//!
//! Local execution, advisory scanning and configuration management.

use clap::{Parser, Subcommand};
use console::style;
use codedock::config::{config_path, validate_config, Config};
use codedock::core::{EventKind, ExecutionRequest, ExecutionResult, StreamEvent, TestStatus};
use codedock::sandbox::scanner_from_config;
use codedock::{Error, Hub, Orchestrator, Result, VERSION};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "codedock",
    author = "Code Dock Contributors",
    version = VERSION,
    about = "Code Dock - run untrusted programs under resource ceilings",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a program locally, printing live events
    Run {
        /// Program file
        file: PathBuf,
        /// File fed to the program's standard input
        #[arg(long)]
        stdin: Option<PathBuf>,
        /// Verification program run after the guest
        #[arg(long)]
        tests: Option<PathBuf>,
        /// Emit events and the result as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Run the advisory source scan on a file
    Scan {
        /// Program file
        file: PathBuf,
    },

    /// Show or validate the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Validate the effective configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Quiet by default: the live event feed is the output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            stdin,
            tests,
            json,
        } => run(&file, stdin.as_deref(), tests.as_deref(), json).await,
        Commands::Scan { file } => scan(&file),
        Commands::Config { action } => match action {
            ConfigAction::Show => show_config(),
            ConfigAction::Validate => check_config(),
        },
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidInput(format!("Cannot read {}: {}", path.display(), e)))
}

async fn run(file: &Path, stdin: Option<&Path>, tests: Option<&Path>, json: bool) -> Result<()> {
    let config = Config::from_env()?;

    let mut request = ExecutionRequest::new(read(file)?);
    if let Some(path) = stdin {
        request = request.with_stdin(read(path)?);
    }
    if let Some(path) = tests {
        request = request.with_tests(read(path)?);
    }

    let hub = Arc::new(Hub::new(config.execution.observer_buffer));
    let orchestrator = Orchestrator::new(&config, hub.clone())?;

    let (_, mut feed) = hub.attach().await;
    let printer = tokio::spawn(async move {
        while let Some(event) = feed.recv().await {
            if json {
                match event.to_json() {
                    Ok(line) => println!("{}", line),
                    Err(e) => eprintln!("{}", e),
                }
            } else {
                print_event(&event);
            }
        }
    });

    let outcome = orchestrator.execute(request).await;

    // ends the feed once everything broadcast so far is printed
    hub.shutdown().await;
    printer.await?;

    let result = outcome?;
    if json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        print_summary(&result);
    }

    if !result.success() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_event(event: &StreamEvent) {
    let text = match &event.data {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    match event.kind {
        EventKind::Stdout => println!("{}", text),
        EventKind::Stderr => eprint!("{}", style(text).red()),
        EventKind::JointState => println!("{} {}", style("state").cyan(), style(text).cyan()),
        EventKind::Error => eprintln!("{} {}", style("✗").red().bold(), style(text).red()),
        EventKind::ExecutionStart | EventKind::TestStart | EventKind::ExecutionComplete => {
            println!("{}", style(text).dim())
        }
        EventKind::JointPositionConfirmed => {}
    }
}

fn print_summary(result: &ExecutionResult) {
    println!();
    let marker = if result.success() {
        style("✓").green().bold()
    } else {
        style("✗").red().bold()
    };
    println!(
        "{} exit code {} in {} ms{}",
        marker,
        result.exit_code,
        result.duration_ms,
        if result.truncated { " (output truncated)" } else { "" }
    );

    if let Some(tests) = &result.tests {
        if tests.is_empty() {
            println!("{}", style("No verification report").yellow());
        }
        for test in tests {
            let status = match test.status {
                TestStatus::Passed => style(test.status.to_string()).green(),
                TestStatus::Skipped => style(test.status.to_string()).yellow(),
                TestStatus::Failed | TestStatus::Error => style(test.status.to_string()).red(),
            };
            println!("  {:<8} {} ({} ms)", status, test.name, test.duration_ms);
        }
    }
}

fn scan(file: &Path) -> Result<()> {
    let config = Config::from_env()?;
    let scanner = scanner_from_config(&config.sandbox.scan);
    let source = read(file)?;

    match scanner.scan(&source) {
        None => {
            println!("{} {} passes the {} scan", style("✓").green(), file.display(), scanner.name());
            Ok(())
        }
        Some(finding) => {
            println!("{} {}: {}", style("✗").red(), file.display(), finding);
            std::process::exit(1);
        }
    }
}

fn show_config() -> Result<()> {
    let config = Config::from_env()?;
    println!("{}", style(format!("# {}", config_path().display())).dim());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn check_config() -> Result<()> {
    let config = Config::from_env()?;
    let result = validate_config(&config);

    for issue in &result.errors {
        println!("{} {}", style("error").red().bold(), issue);
    }
    for issue in &result.warnings {
        println!("{} {}", style("warning").yellow().bold(), issue);
    }

    if result.valid {
        println!("{} Configuration is valid", style("✓").green());
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} configuration errors",
            result.errors.len()
        )))
    }
}
