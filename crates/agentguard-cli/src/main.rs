#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! AgentGuard CLI - policy authoring and dry-run evaluation
//!
//! Commands:
//! - agentguard init [path] - Write an annotated starter policy
//! - agentguard validate [path] - Load a policy and print a summary
//! - agentguard test <tool> key=value ... - Evaluate a hypothetical call

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentguard::{Action, Evaluator, Policy, ToolCall};

/// Stable exit codes for `agentguard` commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
enum ExitCode {
    /// Operation succeeded; for `test`, the call is allowed.
    Ok = 0,
    /// For `test`: the call needs human approval.
    Warn = 1,
    /// For `test`: the call is blocked.
    Fail = 2,
    /// Configuration error (invalid policy, refused overwrite).
    ConfigError = 3,
    /// Runtime error (I/O, internal errors).
    RuntimeError = 4,
    /// CLI usage error (invalid arguments).
    InvalidArgs = 5,
}

impl ExitCode {
    fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Parser, Debug)]
#[command(name = "agentguard")]
#[command(version, about = "AgentGuard policy CLI", long_about = None)]
struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write an annotated starter policy (refuses to overwrite)
    Init {
        /// Output path
        #[arg(default_value = "agentguard.policy.yaml")]
        path: String,
    },

    /// Validate a policy file and print a summary
    Validate {
        /// Policy YAML file
        #[arg(default_value = "agentguard.policy.yaml")]
        path: String,
    },

    /// Evaluate a hypothetical tool call against a policy
    Test {
        /// Tool name to evaluate
        tool_name: String,

        /// Parameters as key=value pairs; values parse as JSON when possible
        params: Vec<String>,

        /// Policy YAML file to use
        #[arg(long, default_value = "agentguard.policy.yaml")]
        policy: String,

        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::Ok
                }
                _ => ExitCode::InvalidArgs,
            };

            let _ = err.print();
            std::process::exit(code.as_i32());
        }
    };

    // Initialize logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(
            log_level,
        ))
        .init();

    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let code = run(cli, &mut stdout, &mut stderr);
    std::process::exit(code.as_i32());
}

fn run(cli: Cli, stdout: &mut dyn Write, stderr: &mut dyn Write) -> ExitCode {
    match cli.command {
        Commands::Init { path } => cmd_init(&path, stdout, stderr),
        Commands::Validate { path } => cmd_validate(&path, stdout, stderr),
        Commands::Test {
            tool_name,
            params,
            policy,
            json,
        } => cmd_test(&policy, &tool_name, &params, json, stdout, stderr),
    }
}

fn cmd_init(path: &str, stdout: &mut dyn Write, stderr: &mut dyn Write) -> ExitCode {
    if Path::new(path).exists() {
        let _ = writeln!(stderr, "Error: refusing to overwrite existing file: {path}");
        return ExitCode::ConfigError;
    }

    match std::fs::write(path, agentguard::generate_sample_policy()) {
        Ok(()) => {
            let _ = writeln!(stdout, "Wrote starter policy to {path}");
            ExitCode::Ok
        }
        Err(e) => {
            let _ = writeln!(stderr, "Error: {e}");
            ExitCode::RuntimeError
        }
    }
}

fn cmd_validate(path: &str, stdout: &mut dyn Write, stderr: &mut dyn Write) -> ExitCode {
    let policy = match Policy::from_yaml_file(path) {
        Ok(policy) => policy,
        Err(e) => {
            let _ = writeln!(stderr, "Error: {e}");
            return ExitCode::ConfigError;
        }
    };

    let _ = writeln!(
        stdout,
        "Policy '{}' (version {}) is valid",
        policy.name, policy.version
    );
    if let Some(description) = &policy.description {
        let _ = writeln!(stdout, "  {description}");
    }
    let _ = writeln!(stdout, "  Default action: {}", policy.default_action);
    let _ = writeln!(stdout, "  Rules: {}", policy.rules.len());

    let mut rules: Vec<_> = policy.rules.iter().collect();
    rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
    for rule in rules {
        let _ = writeln!(
            stdout,
            "    [{:>4}] {} -> {} ({} condition(s))",
            rule.priority,
            rule.name,
            rule.action,
            rule.conditions.len()
        );
    }

    match &policy.webhook {
        Some(webhook) => {
            let security = match &webhook.security {
                Some(s) if s.encrypt_sensitive_data => "signed + encrypted",
                Some(_) => "signed",
                None => "unsigned",
            };
            let _ = writeln!(stdout, "  Webhook: {} ({security})", webhook.url);
        }
        None => {
            let _ = writeln!(stdout, "  Webhook: none");
        }
    }

    ExitCode::Ok
}

fn cmd_test(
    policy_path: &str,
    tool_name: &str,
    params: &[String],
    json: bool,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> ExitCode {
    let policy = match Policy::from_yaml_file(policy_path) {
        Ok(policy) => policy,
        Err(e) => {
            let _ = writeln!(stderr, "Error: {e}");
            return ExitCode::ConfigError;
        }
    };

    let mut parameters = serde_json::Map::new();
    for param in params {
        match parse_param(param) {
            Ok((key, value)) => {
                parameters.insert(key, value);
            }
            Err(e) => {
                let _ = writeln!(stderr, "Error: {e}");
                return ExitCode::InvalidArgs;
            }
        }
    }

    let evaluator = Evaluator::new(Arc::new(policy));
    let decision = evaluator.decide(&ToolCall::new(tool_name, parameters));

    if json {
        match serde_json::to_string_pretty(&decision) {
            Ok(out) => {
                let _ = writeln!(stdout, "{out}");
            }
            Err(e) => {
                let _ = writeln!(stderr, "Error: {e}");
                return ExitCode::RuntimeError;
            }
        }
    } else {
        let _ = writeln!(stdout, "Decision: {}", decision.action);
        if let Some(rule) = &decision.matched_rule {
            let _ = writeln!(stdout, "Rule: {} (priority {})", rule.name, rule.priority);
        }
        let _ = writeln!(stdout, "Reason: {}", decision.reason);
    }

    match decision.action {
        Action::Allow => ExitCode::Ok,
        Action::RequireApproval => ExitCode::Warn,
        Action::Block => ExitCode::Fail,
    }
}

/// Parse a `key=value` parameter; the value is JSON when it parses as
/// JSON, a plain string otherwise.
fn parse_param(param: &str) -> Result<(String, Value), String> {
    let Some((key, raw)) = param.split_once('=') else {
        return Err(format!("expected key=value, got: {param}"));
    };
    if key.is_empty() {
        return Err(format!("empty parameter name in: {param}"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests;
