use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use sentinel::recovery::parsing::fix_content;
use sentinel::{BoundaryError, ResilienceConfig, ResilienceFramework};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Command-line arguments for the sentinel tool
#[derive(Parser)]
#[command(
    name = "sentinel",
    about = "Component resilience toolkit - markdown auto-fix and circuit breaker simulation",
    long_about = "Runs the resilience framework from the command line: repair markdown \
                  documents with the parsing fix rules, inspect the effective configuration, \
                  or drive a simulated component through the circuit breaker."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        global = true,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply the markdown fix rules to a file
    Fix {
        /// Markdown file to repair
        file: PathBuf,

        /// Write the fixed content back instead of printing it
        #[arg(short, long)]
        write: bool,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Drive a component through the circuit breaker and print its health
    Simulate {
        /// Number of consecutive failing calls
        #[arg(short, long, default_value_t = 5)]
        failures: u32,

        /// Supply a fallback that succeeds
        #[arg(long)]
        fallback: bool,
    },
}

impl Cli {
    /// Validate the CLI arguments
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() && !config_path.is_file() {
                return Err(format!(
                    "Configuration path is not a file: {}",
                    config_path.display()
                ));
            }
            if let Some(extension) = config_path.extension() {
                if extension != "toml" {
                    warn!(
                        "Configuration file does not have .toml extension: {}",
                        config_path.display()
                    );
                }
            }
        }
        if let Command::Simulate { failures, .. } = self.command {
            if failures > 1000 {
                return Err(format!("--failures must be at most 1000, got {}", failures));
            }
        }
        Ok(())
    }
}

async fn run_fix(framework: &ResilienceFramework, file: &Path, write: bool) -> anyhow::Result<()> {
    // A plain read: a mistyped input path must not be auto-created
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let report = fix_content(&content);
    if !report.changed() {
        info!("{} needs no fixes", file.display());
    } else {
        info!(
            "Applied {} to {}",
            report.applied_rules.join(", "),
            file.display()
        );
    }

    if write {
        if report.changed() {
            framework
                .filesystem()
                .write_file(file, &report.content, "cli")
                .await
                .into_result()
                .with_context(|| format!("Failed to write {}", file.display()))?;
        }
    } else {
        print!("{}", report.content);
    }
    Ok(())
}

async fn run_simulate(
    framework: &ResilienceFramework,
    failures: u32,
    fallback: bool,
) -> anyhow::Result<()> {
    let boundary = framework.boundary();
    let mut outcomes = Vec::new();

    for attempt in 1..=failures {
        let primary = || async move {
            Err::<String, _>(anyhow::anyhow!("simulated failure #{}", attempt))
        };
        let result = if fallback {
            boundary
                .execute_with_fallback("simulated", "call", primary, || async {
                    Ok::<_, anyhow::Error>("fallback".to_string())
                })
                .await
        } else {
            boundary.execute("simulated", "call", primary).await
        };

        let outcome = match result {
            Ok(value) => value,
            Err(BoundaryError::Failed(e)) => format!("failed: {}", e.message),
            Err(e) => format!("rejected: {}", e),
        };
        outcomes.push(outcome);
    }

    let report = json!({
        "outcomes": outcomes,
        "health": boundary.get_all_component_health(),
        "summary": boundary.system_status_summary(),
        "statistics": framework.dispatcher().get_statistics(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config = match ResilienceConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Config => config
            .to_toml_string()
            .map(|text| print!("{}", text))
            .map_err(anyhow::Error::from),
        Command::Fix { ref file, write } => {
            let framework = ResilienceFramework::with_config(config);
            let result = run_fix(&framework, file, write).await;
            framework.dispose();
            result
        }
        Command::Simulate { failures, fallback } => {
            let framework = ResilienceFramework::with_config(config);
            let result = run_simulate(&framework, failures, fallback).await;
            framework.dispose();
            result
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cli_validation_rejects_directory_config() {
        let dir = TempDir::new().unwrap();
        let cli = Cli {
            config: Some(dir.path().to_path_buf()),
            verbose: false,
            command: Command::Config,
        };

        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_cli_validation_limits_failures() {
        let cli = Cli {
            config: None,
            verbose: false,
            command: Command::Simulate {
                failures: 1001,
                fallback: false,
            },
        };

        assert!(cli.validate().is_err());
    }

    #[tokio::test]
    async fn test_fix_reports_missing_input_without_creating_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/typo.md");
        let framework = ResilienceFramework::with_config(ResilienceConfig::default());

        let result = run_fix(&framework, &path, true).await;
        framework.dispose();

        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!dir.path().join("sub").exists());
    }

    #[tokio::test]
    async fn test_fix_writes_repaired_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("todo.md");
        std::fs::write(&path, "#Todo\n-[X]buy milk\n").unwrap();
        let framework = ResilienceFramework::with_config(ResilienceConfig::default());

        run_fix(&framework, &path, true).await.unwrap();
        framework.dispose();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "# Todo\n- [ ] buy milk\n"
        );
    }
}
