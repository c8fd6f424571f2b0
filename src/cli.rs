use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::application::{initialize, InitOptions};
use crate::capabilities::CapabilitySet;
use crate::config::Config;
use crate::errors::Diagnostic;
use crate::executor::FlowInvocation;
use crate::lexer::tokenize;
use crate::loader::{load_program, parse_file, LoadOptions, SourceFile};
use crate::parser::print_program;
use crate::value::{Record, Value};

#[derive(Parser)]
#[command(name = "n3")]
#[command(about = "namel3ss - parse, lower and run programs", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and lower a program, reporting the first error
    Check {
        /// Entry file first, then the modules it may use
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the canonical IR and its hash
    Ir {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the token stream of one file
    Tokens { file: PathBuf },

    /// Print a file in canonical form
    Format {
        file: PathBuf,

        /// Only report whether the file is already canonical
        #[arg(long)]
        check: bool,
    },

    /// Run a flow
    Run {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Flow to run (required when the program has several)
        #[arg(long)]
        flow: Option<String>,

        /// Flow input as a JSON object
        #[arg(long, default_value = "{}")]
        input: String,

        /// Caller identity as a JSON object
        #[arg(long, default_value = "{}")]
        identity: String,

        /// Capability to grant (repeatable)
        #[arg(long = "grant")]
        grants: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

/// What a command prints, and whether it succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub output: String,
    pub success: bool,
}

impl Report {
    fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    fn failed(diagnostic: Diagnostic) -> Self {
        Self {
            output: json!({ "ok": false, "diagnostic": diagnostic }).to_string(),
            success: false,
        }
    }
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let report = execute(cli).await?;
    println!("{}", report.output);
    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Execute one command. Program errors become a failed [`Report`]; I/O and
/// configuration problems are errors.
pub async fn execute(cli: Cli) -> Result<Report> {
    match cli.command {
        Commands::Check { files } => {
            let sources = read_sources(&files)?;
            Ok(match load_program(&sources) {
                Ok(program) => Report::ok(
                    json!({
                        "ok": true,
                        "flows": program.flows.keys().collect::<Vec<_>>(),
                        "hash": program.hash(),
                    })
                    .to_string(),
                ),
                Err(e) => Report::failed(e.diagnostic()),
            })
        }

        Commands::Ir { files } => {
            let sources = read_sources(&files)?;
            Ok(match load_program(&sources) {
                Ok(program) => Report::ok(format!(
                    "{{\"hash\":\"{}\",\"program\":{}}}",
                    program.hash(),
                    program.canonical_json()
                )),
                Err(e) => Report::failed(e.diagnostic()),
            })
        }

        Commands::Tokens { file } => {
            let source = read_source(&file)?;
            Ok(match tokenize(&source.text) {
                Ok(tokens) => Report::ok(serde_json::to_string(&tokens)?),
                Err(e) => Report::failed(e.diagnostic().in_file(source.name)),
            })
        }

        Commands::Format { file, check } => {
            let source = read_source(&file)?;
            let program = match parse_file(&source, &LoadOptions::default()) {
                Ok(program) => program,
                Err(e) => return Ok(Report::failed(e.diagnostic())),
            };
            let printed = print_program(&program);
            if !check {
                return Ok(Report::ok(printed.trim_end().to_string()));
            }
            let canonical = printed == source.text;
            Ok(Report {
                output: json!({ "ok": canonical, "file": source.name }).to_string(),
                success: canonical,
            })
        }

        Commands::Run {
            files,
            flow,
            input,
            identity,
            grants,
        } => {
            let sources = read_sources(&files)?;
            let invocation = FlowInvocation::new(flow.as_deref())
                .with_input(json_record("--input", &input)?)
                .with_identity(json_record("--identity", &identity)?)
                .with_grants(
                    CapabilitySet::from_names(&grants)
                        .map_err(|name| anyhow::anyhow!("Unknown capability '{}'", name))?,
                );

            let app = initialize(InitOptions {
                config_path: cli.config,
                ..InitOptions::default()
            })
            .await?;
            let program = match app.load(&sources) {
                Ok(program) => program,
                Err(e) => return Ok(Report::failed(e.diagnostic())),
            };
            Ok(match app.run_flow(program, invocation).await {
                Ok(outcome) => Report::ok(format!(
                    "{{\"ok\":true,\"outcome\":{}}}",
                    outcome.to_canonical_json()
                )),
                Err(fault) => Report::failed(fault.diagnostic()),
            })
        }

        Commands::Config => {
            let config = Config::builder().config_path(cli.config).build()?;
            Ok(Report::ok(config.to_toml()?))
        }
    }
}

fn read_source(path: &Path) -> Result<SourceFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(SourceFile::new(path.display().to_string(), text))
}

fn read_sources(paths: &[PathBuf]) -> Result<Vec<SourceFile>> {
    paths.iter().map(|p| read_source(p)).collect()
}

fn json_record(flag: &str, text: &str) -> Result<Record> {
    let json: serde_json::Value =
        serde_json::from_str(text).with_context(|| format!("{} is not valid JSON", flag))?;
    match Value::from_json(&json) {
        Value::Record(record) => Ok(record),
        other => bail!("{} must be a JSON object, got {}", flag, other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source_file(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".ai").tempfile().unwrap();
        write!(file, "{}", text).unwrap();
        file
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("n3").chain(args.iter().copied()))
    }

    #[tokio::test]
    async fn test_check_reports_flows() {
        let file = source_file("flow \"demo\":\n  return \"ok\"\n");
        let path = file.path().to_str().unwrap();
        let report = execute(cli(&["check", path])).await.unwrap();
        assert!(report.success);
        let json: serde_json::Value = serde_json::from_str(&report.output).unwrap();
        assert_eq!(json["flows"][0], "demo");
        assert_eq!(json["hash"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_check_prints_diagnostic_json() {
        let file = source_file("flow \"demo\":\n  let flow is 1\n");
        let path = file.path().to_str().unwrap();
        let report = execute(cli(&["check", path])).await.unwrap();
        assert!(!report.success);
        let json: serde_json::Value = serde_json::from_str(&report.output).unwrap();
        assert_eq!(json["diagnostic"]["error_id"], "parse.reserved_identifier");
        assert_eq!(json["diagnostic"]["line"], 2);
        assert_eq!(json["diagnostic"]["file"], path);
    }

    #[tokio::test]
    async fn test_run_with_input() {
        let file = source_file(
            "flow \"double\":\n  input:\n    amount is number\n  return input.amount * 2\n",
        );
        let path = file.path().to_str().unwrap();
        let report = execute(cli(&["run", path, "--input", r#"{"amount": 21}"#]))
            .await
            .unwrap();
        assert!(report.success, "{}", report.output);
        assert!(report.output.contains(r#""value":42"#));
    }

    #[tokio::test]
    async fn test_run_rejects_non_object_input() {
        let file = source_file("flow \"demo\":\n  return 1\n");
        let path = file.path().to_str().unwrap();
        let err = execute(cli(&["run", path, "--input", "[1]"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));
    }

    #[tokio::test]
    async fn test_format_check() {
        let file = source_file("flow \"demo\":\n  return \"ok\"\n");
        let path = file.path().to_str().unwrap();
        let printed = execute(cli(&["format", path])).await.unwrap();
        assert!(printed.output.contains("flow \"demo\":"));
    }

    #[test]
    fn test_grants_are_repeatable() {
        match cli(&["run", "app.ai", "--grant", "network", "--grant", "secrets"]).command {
            Commands::Run { grants, .. } => assert_eq!(grants, vec!["network", "secrets"]),
            _ => panic!("expected run"),
        }
    }
}
