use std::path::PathBuf;

use crate::types::LogLevel;

/// Application configuration, resolved from the CLI.
pub struct Config {
    // Heap types first
    pub destination: PathBuf,
    pub state_directory: PathBuf,
    pub api_key: String,
    pub auth_token: Option<String>,
    pub user_id: String,

    // 8-byte primitives
    pub retry_delay_secs: u64,

    // 4-byte primitives
    pub max_retries: u32,

    // 2-byte primitives
    pub concurrency: u16,

    // 1-byte enums
    pub log_level: LogLevel,

    // Booleans grouped together
    pub ignore_photos: bool,
    pub ignore_videos: bool,
    pub delete_unknown: bool,
    pub include_views: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("destination", &self.destination)
            .field("state_directory", &self.state_directory)
            .field("auth_token", &"<redacted>")
            .field("ignore_photos", &self.ignore_photos)
            .field("ignore_videos", &self.ignore_videos)
            .field("delete_unknown", &self.delete_unknown)
            .finish_non_exhaustive()
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: crate::cli::Cli) -> Self {
        Self {
            destination: expand_tilde(&cli.destination),
            state_directory: expand_tilde(&cli.state_directory),
            api_key: cli.api_key,
            auth_token: cli.auth_token,
            user_id: cli.user_id,
            retry_delay_secs: cli.retry_delay,
            max_retries: cli.max_retries,
            concurrency: cli.concurrency.max(1),
            log_level: cli.log_level,
            ignore_photos: cli.ignore_photos,
            ignore_videos: cli.ignore_videos,
            delete_unknown: cli.delete_unknown,
            include_views: !cli.ignore_views,
            no_progress_bar: cli.no_progress_bar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Config {
        let mut full = vec!["flickrmirror-rs", "/tmp/mirror", "--api-key", "k"];
        full.extend_from_slice(args);
        Config::from_cli(crate::cli::Cli::try_parse_from(full).unwrap())
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/mirror");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("mirror"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(
            expand_tilde("/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(expand_tilde("relative/path"), PathBuf::from("relative/path"));
    }

    #[test]
    fn defaults() {
        let cfg = parse(&[]);
        assert_eq!(cfg.destination, PathBuf::from("/tmp/mirror"));
        assert_eq!(cfg.concurrency, 4);
        assert!(!cfg.ignore_photos);
        assert!(!cfg.ignore_videos);
        assert!(!cfg.delete_unknown);
        assert!(cfg.include_views);
        assert_eq!(cfg.max_retries, 2);
    }

    #[test]
    fn ignore_views_inverts_include_views() {
        let cfg = parse(&["--ignore-views"]);
        assert!(!cfg.include_views);
    }

    #[test]
    fn kind_and_delete_flags() {
        let cfg = parse(&["--ignore-photos", "--ignore-videos", "--delete-unknown"]);
        assert!(cfg.ignore_photos);
        assert!(cfg.ignore_videos);
        assert!(cfg.delete_unknown);
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let cfg = parse(&["--concurrency", "0"]);
        assert_eq!(cfg.concurrency, 1);
    }
}
