//! flickrmirror-rs — Rust rewrite of flickrmirrorer.
//!
//! Incrementally mirrors a Flickr account — photos, videos, titles,
//! descriptions, tags, albums and collections — onto the local filesystem.
//! Albums and collections are projected as directories of symlinks into a
//! flat photostream, reconciled in place so repeated runs only touch what
//! changed. A persisted upload-time checkpoint keeps runs incremental and
//! safe to interrupt.

#![warn(clippy::all)]

mod catalog;
mod checkpoint;
mod cli;
mod config;
mod mirror;
pub mod retry;
mod shutdown;
mod state;
mod types;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use catalog::flickr::FlickrCatalog;
use checkpoint::CheckpointStore;
use mirror::{MirrorLayout, MirrorOptions};
use state::SqlitePendingStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    // Diagnostics go to stderr; stdout carries progress and the summary.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config = config::Config::from_cli(cli);
    tracing::debug!(?config, "starting flickrmirror-rs");

    std::fs::create_dir_all(&config.state_directory)?;
    let checkpoints = CheckpointStore::new(&config.state_directory);
    let pending = SqlitePendingStore::open(&config.state_directory)?;

    let catalog = FlickrCatalog::new(
        config.api_key.clone(),
        config.auth_token.clone(),
        config.user_id.clone(),
    );

    let layout = MirrorLayout::new(config.destination.clone());
    let options = MirrorOptions {
        ignore_photos: config.ignore_photos,
        ignore_videos: config.ignore_videos,
        delete_unknown: config.delete_unknown,
        include_views: config.include_views,
        concurrency: config.concurrency as usize,
        no_progress_bar: config.no_progress_bar,
        retry: retry::RetryConfig {
            max_retries: config.max_retries,
            base_delay_secs: config.retry_delay_secs,
            max_delay_secs: 60,
        },
    };

    if config.delete_unknown {
        println!("The mirror will be cleaned according to what is now on Flickr");
    } else {
        println!("The mirror will not be cleaned according to what is now on Flickr");
    }

    let shutdown_token = shutdown::install_signal_handler();

    let (_, verdict) = mirror::run_mirror(
        &catalog,
        &checkpoints,
        &pending,
        &layout,
        &options,
        shutdown_token,
    )
    .await?;

    std::process::exit(verdict.exit_code());
}
