//! # anonchat-client
//!
//! Terminal client for the anonchat board. Reads its backend settings from
//! the environment, keeps its anonymous identity in a local database and
//! drives the sync store and monitor from subcommands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod state;

use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::{Cli, Command};
use crate::commands::{feed, identity, monitor, post, tags};
use crate::state::AppState;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("anonchat_client=info,anonchat_sync=info,anonchat_net=info,anonchat_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Execute one parsed command line.
pub async fn run(cli: Cli, state: AppState) -> anyhow::Result<()> {
    let json = cli.json;
    match cli.command {
        Command::List(args) => feed::list(&state, args.query(), json).await,
        Command::Watch(args) => feed::watch(&state, args.query(), json).await,
        Command::Thread { id } => feed::thread(&state, &id, json).await,
        Command::Post { content, tags } => post::post(&state, &content, &tags, json).await,
        Command::Reply { parent, content } => post::reply(&state, &parent, &content, json).await,
        Command::Like { id } => post::like(&state, &id, json).await,
        Command::Tags => tags::top_tags(&state, json).await,
        Command::Monitor {
            window,
            interval,
            follow,
        } => {
            let config = anonchat_sync::MonitorConfig {
                window: window.into(),
                interval: interval.into(),
            };
            monitor::monitor(&state, config, follow, json).await
        }
        Command::Whoami => identity::whoami(&state, json),
    }
}
