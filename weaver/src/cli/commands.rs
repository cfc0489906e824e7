//! CLI command execution.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use weaver::cache::{sync_project, CacheFile, SessionCacheStore};
use weaver::models::Session;
use weaver::Config;

use super::args::{Cli, Commands, GlobalArgs, SessionsAction};
use super::chat;

impl From<GlobalArgs> for Config {
    fn from(args: GlobalArgs) -> Self {
        let defaults = Self::default();
        Self {
            api_url: args.api_url.unwrap_or(defaults.api_url),
            ws_url: args.ws_url.unwrap_or(defaults.ws_url),
            token: args.token,
            cache_dir: args.cache_dir,
            ..defaults
        }
    }
}

pub async fn execute(cli: Cli) -> Result<()> {
    let config = Config::from(cli.global);

    match cli.command {
        Commands::Chat { session, message } => chat::run(&config, &session, message).await,
        Commands::Sessions { action } => sessions(&config, action).await,
        Commands::Draft { session } => show_draft(&config, &session),
    }
}

/// Load the cache; stale entries are swept on load.
fn open_cache(config: &Config) -> Result<(CacheFile, SessionCacheStore)> {
    let file = config.cache_file().context("Failed to locate session cache")?;
    let store = file
        .load(config.cache_expiry)
        .with_context(|| format!("Failed to load {}", file.path().display()))?;
    Ok((file, store))
}

fn save_cache(file: &CacheFile, store: &SessionCacheStore) -> Result<()> {
    file.save(store)
        .with_context(|| format!("Failed to save {}", file.path().display()))
}

async fn sessions(config: &Config, action: SessionsAction) -> Result<()> {
    let (file, mut store) = open_cache(config)?;

    match action {
        SessionsAction::List { project } => {
            let api = config.api();
            let count = sync_project(&api, &mut store, &project)
                .await
                .context("Failed to list sessions")?;
            save_cache(&file, &store)?;

            if count == 0 {
                println!("No sessions found.");
                return Ok(());
            }
            let sessions: Vec<_> = store
                .sessions()
                .iter()
                .filter(|s| s.project_id == project)
                .collect();
            print_sessions(&sessions, &store);
        }
        SessionsAction::New { project, name } => {
            let api = config.api();
            let session = api
                .create_session(&project, name.as_deref())
                .await
                .context("Failed to create session")?;
            println!("Created: {}", session.display_name());
            println!("Session ID: {}", session.id);
            store.add(session);
            save_cache(&file, &store)?;
        }
        SessionsAction::Rename { id, name } => {
            let api = config.api();
            let session = api
                .rename_session(&id, &name)
                .await
                .context("Failed to rename session")?;
            if !store.rename(&id, name) {
                store.upsert(vec![session]);
            }
            save_cache(&file, &store)?;
            println!("Renamed {id}");
        }
        SessionsAction::Cached => {
            let sessions: Vec<_> = store.sessions().iter().collect();
            if sessions.is_empty() {
                println!("No cached sessions.");
                return Ok(());
            }
            print_sessions(&sessions, &store);
            if let Some(current) = store.current() {
                println!();
                println!("Current: {current}");
            }
        }
        SessionsAction::Sweep => {
            let removed = store.sweep_expired();
            save_cache(&file, &store)?;
            println!("Removed {} expired session(s).", removed.len());
        }
        SessionsAction::Forget { id } => {
            let removed = store.remove(&id);
            save_cache(&file, &store)?;
            if removed.is_some() {
                println!("Forgot {id}");
            } else {
                println!("{id} was not cached.");
            }
        }
        SessionsAction::Delete { id } => {
            let api = config.api();
            api.delete_session(&id)
                .await
                .with_context(|| format!("Failed to delete session {id}"))?;
            store.remove(&id);
            save_cache(&file, &store)?;
            println!("Deleted {id}");
        }
    }
    Ok(())
}

fn print_sessions(sessions: &[&Session], store: &SessionCacheStore) {
    println!(
        "{:<38} {:<24} {:<11} {:<6} {}",
        "ID", "NAME", "STATUS", "MSGS", "CACHED"
    );
    println!("{}", "-".repeat(96));

    for session in sessions {
        let name = session.display_name();
        let name_short: String = name.chars().take(22).collect();
        let cached = store
            .cached_at(&session.id)
            .map_or_else(|| "-".to_string(), format_age);
        println!(
            "{:<38} {:<24} {:<11} {:<6} {}",
            session.id, name_short, session.status, session.message_count, cached
        );
    }
}

fn format_age(at: DateTime<Utc>) -> String {
    let age = Utc::now() - at;
    if age.num_days() > 0 {
        format!("{}d ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{}h ago", age.num_hours())
    } else {
        format!("{}m ago", age.num_minutes().max(0))
    }
}

fn show_draft(config: &Config, session_id: &str) -> Result<()> {
    let drafts = config.drafts().context("Failed to locate drafts directory")?;
    match drafts.load(session_id).context("Failed to read draft")? {
        Some(text) => println!("{text}"),
        None => println!("No draft for {session_id}."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::path::PathBuf;

    #[test]
    fn flags_override_defaults() {
        let config = Config::from(GlobalArgs {
            api_url: Some("https://api.example.com".into()),
            ws_url: None,
            token: Some("t".into()),
            cache_dir: Some(PathBuf::from("/tmp/w")),
        });
        assert_eq!(config.api_url, "https://api.example.com");
        assert_eq!(config.ws_url, "ws://localhost:8000");
        assert_eq!(config.token.as_deref(), Some("t"));
        assert_eq!(config.reconnect.max_attempts, 5);
    }

    #[test]
    fn ages_are_coarse() {
        assert_eq!(format_age(Utc::now() - TimeDelta::days(3)), "3d ago");
        assert_eq!(format_age(Utc::now() - TimeDelta::hours(5)), "5h ago");
        assert_eq!(format_age(Utc::now() + TimeDelta::minutes(5)), "0m ago");
    }
}
