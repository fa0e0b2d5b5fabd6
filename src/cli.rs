use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shopchat")]
#[command(about = "Multi-tenant shopping assistant: HTTP server and catalog tooling.")]
#[command(version)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "config.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server.
    Serve,

    /// Bring the shared store and every tenant store up to the current schema.
    Migrate,

    /// Register a tenant and provision its store.
    CreateTenant {
        slug: String,
        /// Display name; defaults to the slug.
        #[arg(long)]
        name: Option<String>,
    },

    /// Replace a tenant's bot configuration with the contents of a JSON file.
    ConfigureBot {
        slug: String,
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compute embeddings for a tenant's products that have none.
    EmbedProducts {
        slug: String,
        /// Re-embed every product, not only the ones without a vector.
        #[arg(long)]
        force: bool,
        /// Pause between embedding batches, for rate-limited APIs.
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },

    /// Write a tenant's catalog to a JSON file.
    ExportProducts {
        slug: String,
        #[arg(short, long)]
        output: PathBuf,
        /// Include embedding vectors in the dump.
        #[arg(long)]
        with_embeddings: bool,
    },

    /// Add the products of a JSON file to a tenant's catalog.
    ImportProducts {
        slug: String,
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print the conversation state machine as a Mermaid flowchart.
    Graph,
}
