// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Corvid - a job-driven conversational agent for web and WhatsApp.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod approvals;
mod serve;
mod tasks;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use corvid_config::{CorvidConfig, RuntimeRole};

/// Corvid - a job-driven conversational agent for web and WhatsApp.
#[derive(Parser, Debug)]
#[command(name = "corvid", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the default locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent worker and/or the WhatsApp runtime.
    Serve {
        /// all, core, whatsapp, whatsapp-ingress or whatsapp-egress.
        /// Overrides `runtime.role`.
        #[arg(long)]
        role: Option<RuntimeRole>,
    },
    /// Inspect and resolve pending tool approvals.
    Approvals {
        #[command(subcommand)]
        action: ApprovalAction,
    },
    /// Register and toggle scheduled tasks.
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand, Debug)]
enum ApprovalAction {
    /// List pending approval requests.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Approve a pending request.
    Approve { id: String },
    /// Deny a pending request.
    Deny { id: String },
}

#[derive(Subcommand, Debug)]
enum TaskAction {
    /// List scheduled tasks.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Register a task that posts `payload` to the agent on a schedule.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        payload: String,
        #[arg(long)]
        description: Option<String>,
        /// Cron expression, evaluated in `tools.default_timezone`.
        #[arg(long, conflicts_with = "every_ms")]
        cron: Option<String>,
        /// Repeat interval in milliseconds.
        #[arg(long)]
        every_ms: Option<i64>,
        /// First run as an RFC 3339 timestamp. Alone, the task runs once.
        #[arg(long)]
        at: Option<String>,
        /// Conversation to post into. A new web conversation is opened otherwise.
        #[arg(long)]
        conversation: Option<String>,
    },
    Enable { id: String },
    Disable { id: String },
}

fn load_config(path: Option<&std::path::Path>) -> CorvidConfig {
    let result = match path {
        Some(path) => corvid_config::load_and_validate_path(path),
        None => corvid_config::load_and_validate(),
    };
    match result {
        Ok(config) => config,
        Err(errors) => {
            corvid_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref());

    let result = match cli.command {
        Commands::Serve { role } => {
            if let Some(role) = role {
                config.runtime.role = role;
            }
            serve::run_serve(config).await
        }
        Commands::Approvals { action } => match action {
            ApprovalAction::List { json } => approvals::list(&config, json).await,
            ApprovalAction::Approve { id } => approvals::approve(&config, &id).await,
            ApprovalAction::Deny { id } => approvals::deny(&config, &id).await,
        },
        Commands::Tasks { action } => match action {
            TaskAction::List { json } => tasks::list(&config, json).await,
            TaskAction::Add {
                name,
                payload,
                description,
                cron,
                every_ms,
                at,
                conversation,
            } => {
                let spec = tasks::TaskSpec {
                    name,
                    payload,
                    description,
                    cron,
                    every_ms,
                    at,
                    conversation,
                };
                tasks::add(&config, spec).await
            }
            TaskAction::Enable { id } => tasks::set_enabled(&config, &id, true).await,
            TaskAction::Disable { id } => tasks::set_enabled(&config, &id, false).await,
        },
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc supports advancing the stats epoch.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn serve_role_flag_parses_kebab_case() {
        let cli = Cli::try_parse_from(["corvid", "serve", "--role", "whatsapp-egress"]).unwrap();
        match cli.command {
            Commands::Serve { role } => {
                assert_eq!(role, Some(RuntimeRole::WhatsappEgress));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn approvals_subcommands_parse() {
        let cli = Cli::try_parse_from(["corvid", "approvals", "deny", "abc-123"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Approvals { action: ApprovalAction::Deny { ref id } } if id == "abc-123"
        ));

        let cli = Cli::try_parse_from(["corvid", "--config", "x.toml", "approvals", "list"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("x.toml")));
    }

    #[test]
    fn tasks_add_parses_schedule_flags() {
        let cli = Cli::try_parse_from([
            "corvid", "tasks", "add", "--name", "digest", "--payload", "Send the digest",
            "--cron", "0 8 * * *",
        ])
        .unwrap();
        match cli.command {
            Commands::Tasks {
                action: TaskAction::Add { name, cron, every_ms, .. },
            } => {
                assert_eq!(name, "digest");
                assert_eq!(cron.as_deref(), Some("0 8 * * *"));
                assert_eq!(every_ms, None);
            }
            other => panic!("unexpected command {other:?}"),
        }

        assert!(
            Cli::try_parse_from([
                "corvid", "tasks", "add", "--name", "x", "--payload", "y", "--cron", "* * * * *",
                "--every-ms", "1000",
            ])
            .is_err()
        );
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(Cli::try_parse_from(["corvid", "serve", "--role", "gateway"]).is_err());
    }
}
