//! # kb-stack CLI (`kbstack`)
//!
//! The `kbstack` binary deploys and operates a Bedrock knowledge base fed
//! from an S3 documents bucket. The stack is declared in Rust, rendered to
//! a CloudFormation template, and handed to the engine; the same config
//! also drives a small chat API over the deployed knowledge base.
//!
//! ## Usage
//!
//! ```bash
//! kbstack --config ./config/kbstack.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbstack synth` | Render the CloudFormation template JSON |
//! | `kbstack resources` | List declared resources and their dependency edges |
//! | `kbstack deploy` | Create or update the stack and wait for it to settle |
//! | `kbstack destroy` | Delete the stack |
//! | `kbstack outputs` | Show the deployed stack's outputs |
//! | `kbstack serve chat` | Start the chat HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Inspect what would be deployed
//! kbstack synth --config ./config/kbstack.toml
//!
//! # Deploy (create or update) and stream progress
//! kbstack deploy --config ./config/kbstack.toml
//!
//! # Grab the bucket name for uploads
//! kbstack outputs --json --config ./config/kbstack.toml
//!
//! # Serve the chat API over the deployed knowledge base
//! kbstack serve chat --config ./config/kbstack.toml
//! ```

mod aws;
mod bedrock;
mod cloudformation;
mod config;
mod deploy;
mod destroy;
mod outputs;
mod progress;
mod resources;
mod server;
mod stack;
mod synth;
#[allow(dead_code)]
mod template;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// kb-stack CLI — declare, deploy, and query a Bedrock knowledge base
/// backed by S3 documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kbstack.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kbstack",
    about = "Deploy and operate an Amazon Bedrock knowledge base with an S3 document source",
    version,
    long_about = "kb-stack declares a Bedrock knowledge base, its S3 documents bucket, the \
    execution role connecting them, and an S3 data source as a typed resource graph, renders \
    it to CloudFormation, and drives create/update/delete through the engine. It also serves \
    a minimal chat API that answers questions grounded in the ingested documents."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kbstack.toml`. All stack, knowledge base,
    /// data source, and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/kbstack.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Render the CloudFormation template.
    ///
    /// Evaluates the declaration locally (no credentials, no network) and
    /// prints the template JSON to stdout, or writes it to `--output`.
    /// What `deploy` submits is exactly this JSON.
    Synth {
        /// Write the template to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List declared resources and their dependency edges.
    ///
    /// Static inspection of the resource graph: logical ids, types, and
    /// explicit ordering edges, plus the declared outputs.
    Resources,

    /// Create or update the stack.
    ///
    /// Picks create vs update based on whether the stack exists, submits
    /// the rendered template, and waits until the engine settles. A
    /// rolled-back operation is a failing exit; "no changes" is success.
    Deploy {
        /// Return as soon as the operation is submitted instead of waiting
        /// for it to settle.
        #[arg(long)]
        no_wait: bool,

        /// Progress output on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Delete the stack.
    ///
    /// The documents bucket is retained by default (see
    /// `[bucket].retain_on_delete`); everything else is removed in reverse
    /// dependency order by the engine.
    Destroy {
        /// Return as soon as the deletion is submitted instead of waiting.
        #[arg(long)]
        no_wait: bool,

        /// Progress output on stderr: `off`, `human`, or `json`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show the deployed stack's outputs.
    ///
    /// Reads the bucket name, docs prefix, knowledge base id, and data
    /// source id back from the engine.
    Outputs {
        /// Emit a flat JSON object instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Start the chat HTTP server.
    ///
    /// Answers questions grounded in the knowledge base via Bedrock's
    /// RetrieveAndGenerate. Requires the stack to be deployed (or
    /// `[server].knowledge_base_id` to be set).
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Server subcommands.
#[derive(Subcommand)]
enum ServeService {
    /// Start the knowledge-base chat API.
    ///
    /// Binds to the address configured in `[server].bind` and serves
    /// `POST /chat` and `GET /health`.
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Synth { output } => {
            synth::run_synth(&cfg, output.as_deref())?;
        }
        Commands::Resources => {
            resources::list_resources(&cfg)?;
        }
        Commands::Deploy { no_wait, progress } => {
            let mode = progress::ProgressMode::from_flag(progress.as_deref())?;
            deploy::run_deploy(&cfg, !no_wait, mode).await?;
        }
        Commands::Destroy { no_wait, progress } => {
            let mode = progress::ProgressMode::from_flag(progress.as_deref())?;
            destroy::run_destroy(&cfg, !no_wait, mode).await?;
        }
        Commands::Outputs { json } => {
            outputs::run_outputs(&cfg, json).await?;
        }
        Commands::Serve { service } => match service {
            ServeService::Chat => {
                server::run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}
