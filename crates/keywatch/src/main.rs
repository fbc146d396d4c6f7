use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use keywatch_core::{
    config::{Config, Settings},
    domain::{AuthState, Notification},
    history::MessageHistory,
    ports::{AuthPrompt, CredentialStore, SoundSink},
    session::SessionManager,
    Error,
};
use keywatch_telegram::GrammersPort;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    keywatch_core::logging::init("keywatch");

    let cfg = Config::load()?;
    let settings = Settings::load_file(&cfg.settings_file)?;
    info!(
        keywords = settings.keywords.len(),
        excluded = settings.excluded_channels.len(),
        mappings = settings.sound_mappings.len(),
        "settings loaded"
    );

    let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(cfg.session_file.clone()));
    let port = Arc::new(GrammersPort::new(cfg.api_id, cfg.api_hash.clone()));
    let session = SessionManager::new(port, store);

    if std::env::args().nth(1).as_deref() == Some("logout") {
        return run_logout(&session).await;
    }

    match session.connect().await? {
        AuthState::Authenticated => info!("restored existing session"),
        AuthState::AwaitingPhone => {
            let prompt = StdinPrompt;
            let phone = read_line("Phone number (international format): ").await?;
            session.login(&phone, &prompt).await?;
            info!("signed in");
        }
        other => anyhow::bail!("unexpected state after connect: {other:?}"),
    }

    let (settings_tx, settings_rx) = watch::channel(Arc::new(settings));
    let mut subscription = session.subscribe(settings_rx).await?;
    let sink = LogSoundSink;
    let mut history = MessageHistory::new();

    info!("monitoring messages; press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notification = subscription.recv() => {
                let Some(notification) = notification else { break };
                handle_notification(notification, &settings_tx, &mut history, &sink).await;
            }
        }
    }

    subscription.cancel();
    info!("stopped");
    Ok(())
}

async fn run_logout(session: &SessionManager) -> anyhow::Result<()> {
    match session.connect().await? {
        AuthState::Authenticated => {
            session.logout().await?;
            info!("logged out; stored session cleared");
        }
        _ => info!("no active session to log out of"),
    }
    Ok(())
}

async fn handle_notification(
    notification: Notification,
    settings: &watch::Sender<Arc<Settings>>,
    history: &mut MessageHistory,
    sink: &dyn SoundSink,
) {
    let record = &notification.record;
    if record.visible {
        info!(
            chat = %record.chat_label,
            sender = %record.sender_label,
            matched = ?record.matched_keywords,
            "{}",
            record.text
        );
    }

    // Excluded-channel messages are retained in history, just unheard.
    let limit = settings.borrow().message_limit;
    history.push(notification.record.clone(), limit);

    if let Some(sound) = &notification.sound {
        if let Err(e) = sink.play(sound).await {
            warn!(error = %e, "sound playback failed");
        }
    }
}

/// Interactive login prompts on stdin.
struct StdinPrompt;

#[async_trait]
impl AuthPrompt for StdinPrompt {
    async fn request_code(&self) -> keywatch_core::Result<String> {
        read_line("Verification code: ").await
    }

    async fn request_password(&self, hint: Option<&str>) -> keywatch_core::Result<String> {
        let prompt = match hint {
            Some(hint) if !hint.is_empty() => format!("Two-factor password (hint: {hint}): "),
            _ => "Two-factor password: ".to_string(),
        };
        read_line(&prompt).await
    }
}

async fn read_line(prompt: &str) -> keywatch_core::Result<String> {
    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await
    .map_err(|e| Error::Transport(format!("stdin prompt failed: {e}")))?
}

/// Plays nothing: resolving sound ids to audio belongs to the desktop shell.
/// This sink records what would have been played.
struct LogSoundSink;

#[async_trait]
impl SoundSink for LogSoundSink {
    async fn play(&self, sound_file: &str) -> keywatch_core::Result<()> {
        info!(sound = %sound_file, "notification sound");
        Ok(())
    }
}

/// JSON-file credential store for the opaque session token.
struct FileCredentialStore {
    path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct StoredSession {
    session_token: String,
    saved_at: String,
}

impl FileCredentialStore {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn session_token(&self) -> keywatch_core::Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let txt = std::fs::read_to_string(&self.path)?;
        if txt.trim().is_empty() {
            return Ok(None);
        }
        // A corrupt store file means "no stored session", not a hard failure.
        let Ok(data) = serde_json::from_str::<StoredSession>(&txt) else {
            return Ok(None);
        };
        if data.session_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(data.session_token))
    }

    async fn store(&self, token: &str) -> keywatch_core::Result<()> {
        let data = StoredSession {
            session_token: token.to_string(),
            saved_at: Utc::now().to_rfc3339(),
        };
        std::fs::write(&self.path, serde_json::to_string(&data)?)?;
        Ok(())
    }

    async fn clear(&self) -> keywatch_core::Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
