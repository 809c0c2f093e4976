use clap::Parser;

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "flickrmirror-rs",
    about = "Create and maintain a local mirror of your Flickr photos, videos, albums and collections"
)]
pub struct Cli {
    /// Destination directory for the mirror
    pub destination: String,

    /// Do not mirror photos
    #[arg(long)]
    pub ignore_photos: bool,

    /// Do not mirror videos
    #[arg(long)]
    pub ignore_videos: bool,

    /// Delete local files, albums and collections that no longer exist
    /// remotely. Irreversible; disabled by default.
    #[arg(long)]
    pub delete_unknown: bool,

    /// Exclude the volatile views counter from metadata snapshots
    #[arg(long)]
    pub ignore_views: bool,

    /// Concurrent item downloads
    #[arg(long, default_value_t = 4)]
    pub concurrency: u16,

    /// Log level for diagnostics on stderr
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Directory for the checkpoint and pending-video registry
    #[arg(long, default_value = "~/.flickrmirror-rs")]
    pub state_directory: String,

    /// Flickr API key
    #[arg(long, env = "FLICKR_API_KEY")]
    pub api_key: String,

    /// Pre-authorized read token.
    /// WARNING: passing via --auth-token is visible in process listings.
    /// Prefer the FLICKR_AUTH_TOKEN environment variable instead.
    #[arg(long, env = "FLICKR_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// NSID of the account to mirror (used in video download URLs)
    #[arg(long, default_value = "me")]
    pub user_id: String,

    /// Retries per item fetch before giving up until the next run
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Base delay between retries, in seconds
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,
}
