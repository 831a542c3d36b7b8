use std::{path::Path, sync::Arc};

use clap::Parser;

mod app;
mod cli;
mod config;
mod eid;
mod items;
mod matching;
mod storage;
#[cfg(test)]
mod tests;
mod vision;
mod web;

use app::{App, SearchRequest};
use eid::Eid;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let config = config::Config::load_with(&args.data_dir)?;

    let store = Arc::new(items::BackendCsv::load(Path::new(&args.data_dir))?);
    let storage_mgr = Arc::new(storage::BackendLocal::new(&format!(
        "{}/uploads",
        args.data_dir
    ))?);
    let embedder = Arc::new(matching::RemoteEmbedder::from_config(&config.models)?);
    let vision = Arc::new(vision::RemoteVision::from_config(&config.models)?);

    let app = App::new(config, store, storage_mgr, embedder, vision)?;

    match args.command {
        cli::Command::Daemon {} => {
            web::start_daemon(app);
            Ok(())
        }

        cli::Command::Search {
            query,
            lat,
            lng,
            radius,
        } => {
            let results = app.search_found(SearchRequest {
                query,
                lat,
                lng,
                radius_miles: radius,
            })?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }

        cli::Command::Claim { item_id, contact } => {
            let outcome = app.claim(&Eid::from(item_id), &contact)?;
            println!("finder contact: {}", outcome.finder_contact);
            Ok(())
        }

        cli::Command::Notifications { token } => {
            let response = app.notifications(&token)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}
