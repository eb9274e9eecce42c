use std::sync::Arc;

use clap::Parser;

mod chunker;
mod cli;
mod config;
mod document;
mod embedder;
mod index;
mod service;
mod store;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use embedder::EmbeddingModel;
use service::SearchService;

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::load();
    let embedder = EmbeddingModel::new(&config.embedding_model, config.base_path().to_path_buf())?;
    let service = SearchService::open(config, Arc::new(embedder))?;

    match args.command {
        cli::Command::Daemon { .. } => {
            web::start_daemon(service);
            Ok(())
        }

        cli::Command::Process { .. } => {
            let outcome = service.process()?;
            println!("{}", serde_json::to_string_pretty(&outcome).unwrap());
            Ok(())
        }

        cli::Command::Search {
            query,
            top_k,
            threshold,
        } => {
            let response = service.search(&query, top_k, threshold)?;
            println!("{}", serde_json::to_string_pretty(&response).unwrap());
            Ok(())
        }
    }
}
