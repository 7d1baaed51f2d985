use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Question answering over local knowledge bases
#[derive(Debug, Parser)]
#[command(name = "lore")]
#[command(version, about, long_about = None)]
pub(crate) struct Cli {
    /// Configuration file (defaults to `LORE_CONFIG`, then `config/default.toml`)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Chunk, embed and index a directory or `.zip` archive
    Ingest(IngestArgs),

    /// List knowledge bases with their chunk counts
    List,

    /// Remove every chunk of a knowledge base
    Delete {
        #[arg(long = "kb")]
        knowledge_base: String,
    },

    /// Ask a question against one or more knowledge bases
    Chat(ChatArgs),

    /// Run the HTTP gateway
    #[cfg(feature = "gateway")]
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
pub(crate) struct IngestArgs {
    #[arg(long = "kb")]
    pub knowledge_base: String,

    /// Directory to scan or `.zip` archive to unpack
    #[arg(long)]
    pub path: PathBuf,

    #[arg(long)]
    pub chunk_size: Option<usize>,

    #[arg(long = "overlap")]
    pub chunk_overlap: Option<usize>,

    /// Comma-separated tags attached to every chunk
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,
}

#[derive(Debug, Args)]
pub(crate) struct ChatArgs {
    /// Knowledge base to search; repeat or comma-separate for several
    #[arg(long = "kb", required = true, value_delimiter = ',')]
    pub knowledge_bases: Vec<String>,

    #[arg(long, short)]
    pub query: String,

    #[arg(long)]
    pub top_k: Option<usize>,

    #[arg(long)]
    pub temperature: Option<f32>,

    /// Print the answer as it is generated
    #[arg(long)]
    pub stream: bool,
}

#[cfg(feature = "gateway")]
#[derive(Debug, Args)]
pub(crate) struct ServeArgs {
    #[arg(long)]
    pub bind: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,
}
