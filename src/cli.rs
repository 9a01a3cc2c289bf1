use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aethervoice")]
#[command(about = "Voice assistant decision core: gated commands, confirmations, tool-augmented answers", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Workspace directory holding config.json, notes and the memory database
    /// (env: AETHERVOICE_WORKSPACE, default ./.aethervoice).
    #[arg(long, global = true)]
    pub(crate) workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Read finalized utterances from stdin, one per line.
    Run {
        /// Skip the language model even if one is configured.
        #[arg(long)]
        no_llm: bool,
    },

    /// Process a single utterance and exit.
    Say {
        /// The utterance, as a recognizer would deliver it.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        #[arg(long)]
        no_llm: bool,
    },

    /// Inspect or edit the personal fact memory.
    Memory {
        #[command(subcommand)]
        command: MemoryCommand,
    },
}

#[derive(Subcommand)]
pub(crate) enum MemoryCommand {
    /// Extract and store salient sentences from a text.
    Add {
        #[arg(long)]
        text: String,
        #[arg(long)]
        user: Option<String>,
        /// Namespace (defaults to the configured one)
        #[arg(long = "ns")]
        namespace: Option<String>,
        #[arg(long, default_value_t = 0.5)]
        importance: f64,
    },
    /// Rank stored facts against a query.
    Search {
        #[arg(long)]
        query: String,
        #[arg(short, long, default_value_t = 5)]
        k: usize,
        #[arg(long)]
        user: Option<String>,
        /// Namespace; omit to search every namespace of the user
        #[arg(long = "ns")]
        namespace: Option<String>,
    },
    /// Print every fact of a user as JSON.
    Export {
        #[arg(long)]
        user: Option<String>,
    },
    /// Load facts from a JSON file produced by `export`.
    Import {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        user: Option<String>,
    },
    /// Delete every fact of a user.
    Wipe {
        #[arg(long)]
        user: Option<String>,
    },
    /// Delete one fact by id.
    Forget { id: i64 },
}
