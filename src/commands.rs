use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use calsync_calendar::{
    with_retry, CountFilter, EngineOptions, EventData, GoogleCalendarClient, ListQuery, Page,
    RecordFilter, RetryConfig, SqliteSyncStore, SyncEngine, SyncError, SyncKey, SyncStatus,
};
use calsync_core::config::GOOGLE_TOKEN_ENV;
use calsync_core::Config;

use crate::ConfigAction;

/// Everything a command needs, built from the configuration.
pub struct Context {
    config: Config,
    engine: SyncEngine,
    retry: RetryConfig,
    has_token: bool,
}

impl Context {
    pub fn new(config: Config) -> Result<Self> {
        let store = SqliteSyncStore::new(&config.store.path).with_context(|| {
            format!("Failed to open sync store at {}", config.store.path.display())
        })?;

        let token = config.google.resolved_access_token();
        let client = GoogleCalendarClient::with_base_url(
            token.as_deref().unwrap_or_default(),
            &config.google.api_base_url,
        );

        let engine = SyncEngine::new(Arc::new(store), Arc::new(client)).with_options(EngineOptions {
            explicit_ids: config.sync.explicit_ids,
            max_id_length: config.sync.max_id_length,
        });

        let retry = RetryConfig::new(
            config.retry.max_retries,
            config.retry.initial_delay_ms,
            config.retry.max_delay_ms,
        );

        Ok(Self {
            has_token: token.is_some(),
            config,
            engine,
            retry,
        })
    }

    fn require_token(&self) -> Result<()> {
        if !self.has_token {
            anyhow::bail!(
                "No Google access token configured.\n\n\
                Set {} or google.access_token in the config file.",
                GOOGLE_TOKEN_ENV
            );
        }
        Ok(())
    }
}

/// Attach the user-facing message to a sync error.
fn report(error: SyncError) -> anyhow::Error {
    let message = format!(
        "{} (kind: {:?}, status {})",
        error.user_message(),
        error.kind(),
        error.kind().http_status()
    );
    anyhow::Error::new(error).context(message)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_status(status: Option<&str>) -> Result<Option<SyncStatus>> {
    status
        .map(|s| s.parse::<SyncStatus>().map_err(anyhow::Error::msg))
        .transpose()
}

fn parse_day(value: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", value))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

pub async fn sync(
    ctx: &Context,
    key: SyncKey,
    event: EventData,
    calendar: Option<String>,
    source: Option<String>,
) -> Result<()> {
    ctx.require_token()?;
    let calendar = calendar.unwrap_or_else(|| ctx.config.google.default_calendar_id.clone());
    let source = source.unwrap_or_else(|| ctx.config.sync.source_system.clone());

    let outcome = with_retry(&ctx.retry, || {
        ctx.engine
            .create_or_update(&key, &event, Some(calendar.as_str()), &source)
    })
    .await
    .map_err(report)?;

    print_json(&outcome)
}

pub async fn delete(
    ctx: &Context,
    user: &str,
    persona: Option<&str>,
    event_id: &str,
    calendar: Option<&str>,
    is_remote_id: bool,
) -> Result<()> {
    ctx.require_token()?;

    let action = with_retry(&ctx.retry, || {
        ctx.engine
            .delete(user, persona, event_id, calendar, is_remote_id)
    })
    .await
    .map_err(report)?;

    print_json(&serde_json::json!({ "action": action }))
}

pub async fn state(ctx: &Context, key: &SyncKey) -> Result<()> {
    let record = ctx.engine.get_sync_state(key).await.map_err(report)?;
    if record.is_none() {
        tracing::info!(key = %key, "No sync record");
    }
    print_json(&record)
}

pub async fn records(
    ctx: &Context,
    user: String,
    persona: Option<String>,
    status: Option<&str>,
    limit: Option<u32>,
    offset: u32,
) -> Result<()> {
    let filter = RecordFilter {
        user_id: user,
        persona_id: persona,
        status: parse_status(status)?,
    };
    let page = Page::new(limit.unwrap_or(ctx.config.sync.page_size), offset);

    let records = ctx
        .engine
        .list_records(&filter, page)
        .await
        .map_err(report)?;
    print_json(&records)
}

pub async fn count(
    ctx: &Context,
    user: String,
    persona: Option<String>,
    calendar: Option<String>,
    status: Option<&str>,
) -> Result<()> {
    let filter = CountFilter {
        user_id: user,
        persona_id: persona,
        calendar_id: calendar,
        status: parse_status(status)?,
    };

    let counts = ctx.engine.count(&filter).await.map_err(report)?;
    print_json(&counts)
}

pub async fn remote(
    ctx: &Context,
    calendar: Option<String>,
    from: Option<&str>,
    to: Option<&str>,
    max: usize,
) -> Result<()> {
    ctx.require_token()?;
    let calendar = calendar.unwrap_or_else(|| ctx.config.google.default_calendar_id.clone());
    let query = ListQuery {
        time_min: from.map(parse_day).transpose()?,
        time_max: to.map(parse_day).transpose()?,
        max_results: max,
    };

    let events = with_retry(&ctx.retry, || {
        ctx.engine.list_events(Some(calendar.as_str()), &query)
    })
    .await
    .map_err(report)?;

    print_json(&events)
}

pub fn config(action: ConfigAction, path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => Config::config_path()?,
    };

    match action {
        ConfigAction::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let mut config = Config::load_from(&path)?;
            if config.google.access_token.is_some() {
                config.google.access_token = Some("<redacted>".to_string());
            }
            print_json(&config)
        }
        ConfigAction::Validate => {
            let config = Config::load_from(&path)?;
            let result = config.validate();
            let render = |items: &[calsync_core::config::ConfigValidationError]| {
                items.iter().map(|e| e.to_string()).collect::<Vec<_>>()
            };

            print_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": render(&result.errors),
                "warnings": render(&result.warnings),
            }))?;

            if !result.is_valid() {
                anyhow::bail!("Configuration is invalid: {}", result.error_summary());
            }
            Ok(())
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists. Use --force to overwrite it.",
                    path.display()
                );
            }
            Config::default().save_to(&path)?;
            tracing::info!(path = %path.display(), "Wrote default configuration");
            println!("{}", path.display());
            Ok(())
        }
    }
}
