mod commands;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use calsync_calendar::{EventData, SyncKey};
use calsync_core::Config;

#[derive(Parser)]
#[command(name = "calsync")]
#[command(about = "Mirror local events to a remote calendar and inspect sync state")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Identifies a local event.
#[derive(clap::Args)]
struct KeyArgs {
    #[arg(long)]
    user: String,

    #[arg(long)]
    persona: Option<String>,

    /// Local event ID
    #[arg(long = "event-id")]
    event_id: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the remote copy of an event
    Sync {
        #[command(flatten)]
        key: KeyArgs,

        #[arg(long)]
        summary: String,

        /// RFC 3339, YYYY-MM-DDTHH:MM:SS or YYYY-MM-DD
        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        location: Option<String>,

        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Attendee email (repeatable)
        #[arg(long = "attendee")]
        attendees: Vec<String>,

        /// Calendar for a newly created event
        #[arg(short, long)]
        calendar: Option<String>,

        /// Overrides sync.source_system
        #[arg(long)]
        source: Option<String>,
    },
    /// Delete the remote copy of an event and forget it
    Delete {
        #[arg(long)]
        user: String,

        #[arg(long)]
        persona: Option<String>,

        /// Local event ID, or the remote ID with --remote-id
        #[arg(long = "event-id")]
        event_id: String,

        #[arg(long)]
        remote_id: bool,

        /// Overrides the calendar stored on the record
        #[arg(short, long)]
        calendar: Option<String>,
    },
    /// Show the sync record of one event
    State {
        #[command(flatten)]
        key: KeyArgs,
    },
    /// List sync records of a user, newest first
    Records {
        #[arg(long)]
        user: String,

        #[arg(long)]
        persona: Option<String>,

        /// pending, synced, failed or skipped
        #[arg(long)]
        status: Option<String>,

        /// Defaults to sync.page_size
        #[arg(long)]
        limit: Option<u32>,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Count sync records per calendar
    Count {
        #[arg(long)]
        user: String,

        #[arg(long)]
        persona: Option<String>,

        #[arg(short, long)]
        calendar: Option<String>,

        #[arg(long)]
        status: Option<String>,
    },
    /// List events on the remote calendar
    Remote {
        #[arg(short, long)]
        calendar: Option<String>,

        /// Only events ending after this date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Only events starting before this date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        #[arg(long, default_value_t = 250)]
        max: usize,
    },
    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the config file location
    Path,
    /// Print the effective configuration (token redacted)
    Show,
    /// Check the configuration and report errors and warnings
    Validate,
    /// Write the default configuration
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    calsync_core::init_logging(if cli.verbose { "debug" } else { "info" });

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Sync {
            key,
            summary,
            start,
            end,
            description,
            location,
            timezone,
            attendees,
            calendar,
            source,
        } => {
            let mut event = EventData::new(summary, start, end).with_timezone(timezone);
            event.description = description;
            event.location = location;
            if !attendees.is_empty() {
                event.attendees = Some(attendees);
            }
            let ctx = load_context(config_path)?;
            commands::sync(&ctx, key.into(), event, calendar, source).await
        }
        Commands::Delete {
            user,
            persona,
            event_id,
            remote_id,
            calendar,
        } => {
            let ctx = load_context(config_path)?;
            commands::delete(
                &ctx,
                &user,
                persona.as_deref(),
                &event_id,
                calendar.as_deref(),
                remote_id,
            )
            .await
        }
        Commands::State { key } => {
            let ctx = load_context(config_path)?;
            commands::state(&ctx, &key.into()).await
        }
        Commands::Records {
            user,
            persona,
            status,
            limit,
            offset,
        } => {
            let ctx = load_context(config_path)?;
            commands::records(&ctx, user, persona, status.as_deref(), limit, offset).await
        }
        Commands::Count {
            user,
            persona,
            calendar,
            status,
        } => {
            let ctx = load_context(config_path)?;
            commands::count(&ctx, user, persona, calendar, status.as_deref()).await
        }
        Commands::Remote {
            calendar,
            from,
            to,
            max,
        } => {
            let ctx = load_context(config_path)?;
            commands::remote(&ctx, calendar, from.as_deref(), to.as_deref(), max).await
        }
        Commands::Config { action } => commands::config(action, config_path),
    }
}

fn load_context(config_path: Option<&Path>) -> Result<commands::Context> {
    let (config, _) = Config::load_validated(config_path).map_err(|e| {
        let message = e.user_message();
        anyhow::Error::new(e).context(message)
    })?;
    commands::Context::new(config)
}

impl From<KeyArgs> for SyncKey {
    fn from(args: KeyArgs) -> Self {
        SyncKey::new(args.user, args.persona.as_deref(), args.event_id)
    }
}
