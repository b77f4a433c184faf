use std::path::PathBuf;

use clap::{Parser, Subcommand};
use notify_engine::logging::LogFormat;
use notify_engine::{NotificationCategory, NotificationPriority};

#[derive(Parser, Debug)]
#[command(name = "notifyctl", version, about = "Send and inspect push notifications")]
pub struct Args {
    /// TOML configuration file. Without one, configuration comes from
    /// NOTIFY_* environment variables.
    #[arg(short, long, env = "NOTIFYCTL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output format
    #[arg(long, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Args {
    /// Filter directive implied by `--verbose`/`--quiet`.
    pub fn log_directive(&self) -> Option<&'static str> {
        if self.quiet {
            Some("error")
        } else if self.verbose {
            Some("notify_engine=debug,notifyctl=debug,sqlx=warn")
        } else {
            None
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a notification
    Send {
        /// Category: emergency, alert, info or custom
        #[arg(short = 'k', long, default_value = "info")]
        category: NotificationCategory,

        /// Notification title
        title: String,

        /// Notification body
        body: String,

        /// Priority: low, normal or high
        #[arg(short, long)]
        priority: Option<NotificationPriority>,

        /// Caller-assigned id
        #[arg(long)]
        id: Option<String>,

        /// Action ids to attach (repeatable)
        #[arg(short, long = "action")]
        actions: Vec<String>,

        /// Extra payload as a JSON object
        #[arg(long)]
        data: Option<String>,
    },

    /// Print delivery statistics
    Stats,

    /// Show or change notification settings
    Settings {
        #[arg(long)]
        alerts: Option<bool>,
        #[arg(long)]
        info: Option<bool>,
        #[arg(long)]
        sound: Option<bool>,
        #[arg(long)]
        vibrate: Option<bool>,
        #[arg(long)]
        badge: Option<bool>,
    },

    /// Send the channel's test notification
    Test,
}
