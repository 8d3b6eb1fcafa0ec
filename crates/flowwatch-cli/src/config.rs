use clap::{Args, Parser, Subcommand};
use flowwatch_core::config::{
    CredentialsConfig, WatcherConfig, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_MS,
};
use std::path::PathBuf;

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "flowwatch")]
#[command(
    author,
    version,
    about = "Reports workflows that changed on an n8n instance"
)]
#[command(after_help = "Examples:
  flowwatch watch --base-url https://n8n.example.com
  flowwatch watch --once --max-per-cycle 20
  flowwatch status default
  flowwatch check 2024-05-01T10:00:00Z --last-sync 2024-04-30T00:00:00Z")]
pub struct Config {
    /// PostgreSQL URL for watermark state (a local JSON file is used when unset)
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Path of the JSON state file
    #[arg(long, env = "FLOWWATCH_STATE_FILE", global = true, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Log per-workflow decisions
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll for changed workflows and print (or post) them
    #[command(after_help = "Examples:
  flowwatch watch --base-url https://n8n.example.com   # Single watcher from flags
  flowwatch watch                                      # All enabled watchers from config
  flowwatch watch --watcher-name prod                  # One watcher by name from config
  flowwatch watch --once --webhook-url https://hooks.example.com/x")]
    Watch {
        #[command(flatten)]
        watcher: WatcherArgs,

        /// Run a single cycle per watcher and exit
        #[arg(long)]
        once: bool,

        /// Custom path to watchers.toml configuration file
        #[arg(short, long, value_name = "PATH", conflicts_with = "base_url")]
        config: Option<PathBuf>,

        /// Run only the watcher with this name from the config file
        #[arg(short, long, value_name = "NAME", conflicts_with = "base_url")]
        watcher_name: Option<String>,

        /// POST each batch to this URL instead of printing JSON lines
        #[arg(long, env = "FLOWWATCH_WEBHOOK_URL", value_name = "URL")]
        webhook_url: Option<String>,

        /// Bearer token sent to the webhook
        #[arg(long, env = "FLOWWATCH_WEBHOOK_TOKEN", hide_env_values = true)]
        webhook_token: Option<String>,
    },
    /// Show stored watermarks (all scopes, or one as JSON)
    Status {
        /// Watcher scope to show
        scope: Option<String>,
    },
    /// Delete the stored watermarks of a scope
    Reset {
        /// Watcher scope to delete
        scope: String,
        /// Actually delete; without it only a notice is printed
        #[arg(long)]
        yes: bool,
    },
    /// Evaluate the change decision for one timestamp
    #[command(after_help = "Example: flowwatch check 2024-05-01T10:00:00Z --seen-at 2024-05-01T09:00:00Z")]
    Check {
        /// The workflow's updatedAt
        updated_at: String,
        /// Last sync watermark (epoch when omitted)
        #[arg(long)]
        last_sync: Option<String>,
        /// Last emitted updatedAt of the workflow (epoch when omitted)
        #[arg(long)]
        seen_at: Option<String>,
    },
}

/// Settings for a single watcher given on the command line.
#[derive(Args, Debug, Clone)]
pub struct WatcherArgs {
    /// Base URL of the n8n instance
    #[arg(long, env = "N8N_BASE_URL", value_name = "URL")]
    pub base_url: Option<String>,

    /// Watermark scope name for this watcher
    #[arg(long, default_value = "default")]
    pub name: String,

    /// Seconds between cycles
    #[arg(
        long,
        default_value_t = DEFAULT_POLL_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(2..=3600)
    )]
    pub interval: u64,

    /// Case-insensitive regex; matching workflow names are never reported
    #[arg(long, value_name = "REGEX")]
    pub exclude: Option<String>,

    /// Name of the workflow hosting this watcher (always excluded)
    #[arg(long, value_name = "NAME")]
    pub self_name: Option<String>,

    /// Do not attach the full workflow to emitted records
    #[arg(long)]
    pub no_detail: bool,

    /// Per-request timeout in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_REQUEST_TIMEOUT_MS,
        value_parser = clap::value_parser!(u64).range(1000..=60000)
    )]
    pub request_timeout_ms: u64,

    /// Maximum records per cycle (0 = unlimited)
    #[arg(
        long,
        default_value_t = 0,
        value_parser = clap::value_parser!(u64).range(0..=10000)
    )]
    pub max_per_cycle: u64,

    /// API key sent as X-N8N-API-KEY
    #[arg(long, env = "N8N_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// HTTP basic auth user
    #[arg(long, env = "N8N_BASIC_USER")]
    pub basic_user: Option<String>,

    /// HTTP basic auth password
    #[arg(long, env = "N8N_BASIC_PASSWORD", hide_env_values = true)]
    pub basic_password: Option<String>,

    /// Bearer token
    #[arg(long, env = "N8N_BEARER_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,
}

impl WatcherArgs {
    /// Builds a watcher config when a base URL was given.
    pub fn to_watcher_config(&self) -> Option<WatcherConfig> {
        let base_url = self.base_url.as_ref()?;

        let mut config = WatcherConfig::new(self.name.clone(), base_url.clone());
        config.poll_interval_secs = self.interval;
        config.exclude_pattern = self.exclude.clone();
        config.self_name = self.self_name.clone();
        config.include_detail = !self.no_detail;
        config.request_timeout_ms = self.request_timeout_ms;
        config.max_per_cycle = self.max_per_cycle as usize;
        config.credentials = CredentialsConfig {
            api_key: self.api_key.clone(),
            basic_user: self.basic_user.clone(),
            basic_password: self.basic_password.clone(),
            bearer_token: self.bearer_token.clone(),
            ..Default::default()
        };
        Some(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowwatch_core::Credentials;

    #[test]
    fn test_watch_flags_build_watcher() {
        let config = Config::try_parse_from([
            "flowwatch",
            "watch",
            "--base-url",
            "https://n8n.example.com",
            "--name",
            "prod",
            "--interval",
            "30",
            "--no-detail",
            "--max-per-cycle",
            "5",
            "--api-key",
            "secret",
        ])
        .unwrap();

        let Command::Watch { watcher, once, .. } = config.command else {
            panic!("expected watch command");
        };
        assert!(!once);

        let built = watcher.to_watcher_config().unwrap();
        assert_eq!(built.name, "prod");
        assert_eq!(built.poll_interval_secs, 30);
        assert!(!built.include_detail);
        assert_eq!(built.max_per_cycle, 5);
        assert_eq!(
            built.credentials.resolve().unwrap(),
            Credentials::ApiKey("secret".into())
        );
        assert!(built.validate().is_ok());
    }

    #[test]
    fn test_interval_out_of_range_is_rejected() {
        let result = Config::try_parse_from([
            "flowwatch",
            "watch",
            "--base-url",
            "https://n8n.example.com",
            "--interval",
            "1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_base_url_conflicts_with_config_file() {
        let result = Config::try_parse_from([
            "flowwatch",
            "watch",
            "--base-url",
            "https://n8n.example.com",
            "--config",
            "watchers.toml",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_check_command() {
        let config = Config::try_parse_from([
            "flowwatch",
            "check",
            "2024-05-01T10:00:00Z",
            "--seen-at",
            "2024-05-01T09:00:00Z",
        ])
        .unwrap();

        match config.command {
            Command::Check {
                updated_at,
                last_sync,
                seen_at,
            } => {
                assert_eq!(updated_at, "2024-05-01T10:00:00Z");
                assert!(last_sync.is_none());
                assert_eq!(seen_at.as_deref(), Some("2024-05-01T09:00:00Z"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let config =
            Config::try_parse_from(["flowwatch", "status", "--state-file", "/tmp/s.json", "-v"])
                .unwrap();
        assert!(config.verbose);
        assert_eq!(config.state_file, Some(PathBuf::from("/tmp/s.json")));
        assert!(matches!(config.command, Command::Status { scope: None }));
    }
}
