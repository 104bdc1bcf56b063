//! Command-line interface definitions for the newsroom agent.
//!
//! Every command reads the same daemon settings file; see
//! [`crate::settings::DaemonSettings`].
//!
//! # Examples
//!
//! ```sh
//! # Long-running worker plus control server
//! newsroom_agent --config newsroom.yaml daemon
//!
//! # One run now, with a smaller batch
//! newsroom_agent run --max-articles 2 --topics news,technology
//!
//! # What the worker last did
//! newsroom_agent status
//! ```

use clap::{Parser, Subcommand};

use crate::config::AgentConfigPatch;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the daemon settings YAML file
    #[arg(short, long, env = "NEWSROOM_CONFIG", default_value = "newsroom.yaml")]
    pub config: String,

    /// Tenant to operate on; overrides the settings file
    #[arg(short, long, env = "NEWSROOM_TENANT")]
    pub tenant: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the scheduler and the HTTP control server; stop on Ctrl-C
    Daemon {
        /// Address to bind; overrides the settings file
        #[arg(long)]
        listen: Option<String>,
    },
    /// Execute one pipeline run and print its run log as JSON
    Run {
        /// Override maxArticlesPerRun for this run
        #[arg(long)]
        max_articles: Option<u32>,

        /// Override the category list for this run (comma separated)
        #[arg(long, value_delimiter = ',')]
        topics: Option<Vec<String>>,
    },
    /// Print the persisted schedule and the last run
    Status,
}

impl Command {
    /// Per-run overrides carried by `run`; `None` when nothing was given.
    pub fn overrides(&self) -> Option<AgentConfigPatch> {
        match self {
            Command::Run {
                max_articles,
                topics,
            } if max_articles.is_some() || topics.is_some() => Some(AgentConfigPatch {
                max_articles_per_run: *max_articles,
                topics: topics.clone(),
                ..Default::default()
            }),
            _ => None,
        }
    }
}
