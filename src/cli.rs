use clap::{Parser, Subcommand};

use crate::config::DEFAULT_TOP_K;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the search daemon.
    Daemon {},

    /// Extract, chunk and embed the configured document.
    Process {},

    /// Search the processed document.
    Search {
        /// Query text
        query: String,

        /// Number of results to return
        #[clap(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        /// Override the configured similarity threshold
        #[clap(short, long)]
        threshold: Option<f32>,
    },
}
