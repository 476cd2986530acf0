//! Warden CLI - administer role permissions stored in PostgreSQL
//!
//! Grants, revokes, renames and lists permissions through the same enforcer
//! the services use, and runs the database migrations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use serde::Serialize;
use std::sync::Arc;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

use warden_core::config::Config;
use warden_core::db::Database;
use warden_core::rbac::{PermissionRecord, PolicyEnforcer, RoleId};
use warden_core::telemetry::{init_logging, LogFormat, LoggingConfig};

// ═══════════════════════════════════════════════════════════════════════════════
// CLI Structure
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Parser)]
#[command(
    name = "warden",
    version,
    about = "Warden - role-based access control administration",
    propagate_version = true
)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// List the permissions of a role
    List {
        /// Role id
        role: i64,
    },

    /// Replace the permissions of a role
    Grant {
        /// Role id
        role: i64,

        /// Permissions as PATH:METHOD, e.g. /api/users/*:GET
        #[arg(num_args = 0..)]
        permissions: Vec<String>,
    },

    /// Remove rules matching positional values
    Revoke {
        /// First column the values apply to (0 = role, 1 = path, 2 = method)
        #[arg(short = 'n', long, default_value = "0")]
        column: usize,

        /// Values to match; an empty string matches anything
        #[arg(required = true, num_args = 1..)]
        values: Vec<String>,
    },

    /// Retarget a permission for every role that holds it
    Rename {
        old_path: String,
        old_method: String,
        new_path: String,
        new_method: String,
    },

    /// Check whether a role may call METHOD on PATH (exit status 1 on deny)
    Check {
        role: i64,
        method: String,
        path: String,
    },

    /// Run database migrations
    Migrate,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Data Types for Output
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Tabled)]
struct PermissionSummary {
    #[tabled(rename = "Role")]
    role: i64,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Method")]
    method: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Output Helpers
// ═══════════════════════════════════════════════════════════════════════════════

struct OutputHelper {
    format: OutputFormat,
}

impl OutputHelper {
    fn new(format: OutputFormat, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format }
    }

    fn print_status(&self, status: &str, label: ColoredString, message: &str) {
        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({ "status": status, "message": message })
                );
            }
            _ => println!("{} {}", label, message),
        }
    }

    fn print_success(&self, message: &str) {
        self.print_status("success", "[OK]".green().bold(), message);
    }

    fn print_warning(&self, message: &str) {
        self.print_status("warning", "[WARN]".yellow().bold(), message);
    }

    fn print_error(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({ "status": "error", "message": message })
                );
            }
            _ => eprintln!("{} {}", "[ERROR]".red().bold(), message),
        }
    }

    fn print_permissions(&self, items: &[PermissionSummary]) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(items)?);
            }
            OutputFormat::Table => {
                if items.is_empty() {
                    println!("{}", "No results found.".dimmed());
                    return Ok(());
                }
                let table = Table::new(items)
                    .with(Style::rounded())
                    .with(Modify::new(Columns::first()).with(Alignment::left()))
                    .to_string();
                println!("{}", table);
            }
            OutputFormat::Text => {
                if items.is_empty() {
                    println!("{}", "No results found.".dimmed());
                }
                for item in items {
                    println!("{} {}", item.method.cyan().bold(), item.path);
                }
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Command Handlers
// ═══════════════════════════════════════════════════════════════════════════════

fn parse_permissions(raw: &[String]) -> Result<Vec<PermissionRecord>> {
    raw.iter()
        .map(|entry| {
            PermissionRecord::parse(entry)
                .with_context(|| format!("expected PATH:METHOD, got '{}'", entry))
        })
        .collect()
}

/// Runs one command. `Ok(false)` means the command completed but the
/// process should exit non-zero.
async fn run(command: Commands, config: &Config, output: &OutputHelper) -> Result<bool> {
    let database = Database::new(&config.database).await?;

    let enforcer = || PolicyEnforcer::new(Arc::new(database.policy_store()), &config.policy);

    match command {
        Commands::Migrate => {
            database.migrate().await?;
            output.print_success("All migrations applied successfully");
        }

        Commands::List { role } => {
            let permissions = enforcer().list(RoleId(role)).await?;
            let rows: Vec<PermissionSummary> = permissions
                .into_iter()
                .map(|p| PermissionSummary {
                    role,
                    path: p.path,
                    method: p.method,
                })
                .collect();
            output.print_permissions(&rows)?;
        }

        Commands::Grant { role, permissions } => {
            let permissions = parse_permissions(&permissions)?;
            enforcer().grant(RoleId(role), &permissions).await?;
            output.print_success(&format!(
                "Role {} now has {} permission(s)",
                role,
                permissions.len()
            ));
        }

        Commands::Revoke { column, values } => {
            let values: Vec<&str> = values.iter().map(String::as_str).collect();
            if enforcer().revoke_by_index(column, &values).await? {
                output.print_success("Revoked matching permissions");
            } else {
                output.print_warning("No permissions matched");
            }
        }

        Commands::Rename {
            old_path,
            old_method,
            new_path,
            new_method,
        } => {
            let changed = enforcer()
                .rename(&old_path, &old_method, &new_path, &new_method)
                .await?;
            output.print_success(&format!("Renamed {} rule(s)", changed));
        }

        Commands::Check { role, method, path } => {
            let allowed = enforcer().check(RoleId(role), &method, &path).await?;
            let message = format!("role {} {} {}", role, method, path);
            if allowed {
                output.print_status("allow", "[ALLOW]".green().bold(), &message);
            } else {
                output.print_status("deny", "[DENY]".red().bold(), &message);
            }
            return Ok(allowed);
        }
    }

    Ok(true)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Entry Point
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let output = OutputHelper::new(cli.format, cli.no_color);

    let config = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            output.print_error(&format!("{}", e));
            std::process::exit(1);
        }
    };

    let mut logging = LoggingConfig::from(&config.observability);
    logging.level = if cli.verbose { "debug" } else { "warn" }.to_string();
    logging.format = LogFormat::Compact;
    logging.use_stderr = true;
    init_logging(&logging)?;

    match run(cli.command, &config, &output).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            output.print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}
