//! Shared test doubles for exercising the session state machine and the
//! pipeline without a live platform connection.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::{
    domain::{ChatId, RawMessageEvent, SignInOutcome},
    errors::Error,
    ports::{AuthPrompt, CredentialStore, TelegramPort},
    Result,
};

/// Scripted platform double; behavior is driven through the public fields.
pub(crate) struct ScriptedPort {
    /// Whether the session is authorized after connect (a "valid token").
    pub authorized: Mutex<bool>,
    /// One-shot transport failure for the next connect, taken on use.
    pub connect_error: Mutex<Option<String>>,
    /// Expected login code; `None` accepts anything.
    pub accepted_code: Mutex<Option<String>>,
    /// Whether sign-in reports a second factor.
    pub password_required: Mutex<bool>,
    /// Expected second-factor password; `None` accepts anything.
    pub accepted_password: Mutex<Option<String>>,
    /// When set, `request_login_code` blocks until the sender fires.
    pub code_request_gate: Mutex<Option<oneshot::Receiver<()>>>,
    /// When set, `sign_in_with_code` blocks until the sender fires.
    pub sign_in_gate: Mutex<Option<oneshot::Receiver<()>>>,
    /// Scripted event stream; `None` pends forever.
    events: Mutex<Option<mpsc::UnboundedReceiver<Result<RawMessageEvent>>>>,
    pub sign_outs: AtomicUsize,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self {
            authorized: Mutex::new(false),
            connect_error: Mutex::new(None),
            accepted_code: Mutex::new(None),
            password_required: Mutex::new(false),
            accepted_password: Mutex::new(None),
            code_request_gate: Mutex::new(None),
            sign_in_gate: Mutex::new(None),
            events: Mutex::new(None),
            sign_outs: AtomicUsize::new(0),
        }
    }

    /// A port with a scripted event stream fed by the returned sender.
    pub fn with_events() -> (Arc<Self>, mpsc::UnboundedSender<Result<RawMessageEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut port = Self::new();
        *port.events.get_mut() = Some(rx);
        (Arc::new(port), tx)
    }
}

#[async_trait]
impl TelegramPort for ScriptedPort {
    async fn connect(&self, _session_token: Option<&str>) -> Result<()> {
        match self.connect_error.lock().await.take() {
            Some(reason) => Err(Error::Transport(reason)),
            None => Ok(()),
        }
    }

    async fn is_authorized(&self) -> Result<bool> {
        Ok(*self.authorized.lock().await)
    }

    async fn request_login_code(&self, phone: &str) -> Result<()> {
        let gate = self.code_request_gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if phone.trim().is_empty() {
            return Err(Error::AuthRejected("PHONE_NUMBER_INVALID".to_string()));
        }
        Ok(())
    }

    async fn sign_in_with_code(&self, code: &str) -> Result<SignInOutcome> {
        let gate = self.sign_in_gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if let Some(expected) = self.accepted_code.lock().await.as_deref() {
            if expected != code {
                return Err(Error::AuthRejected("PHONE_CODE_INVALID".to_string()));
            }
        }
        if *self.password_required.lock().await {
            return Ok(SignInOutcome::PasswordRequired {
                hint: Some("favorite fish".to_string()),
            });
        }
        *self.authorized.lock().await = true;
        Ok(SignInOutcome::Authorized)
    }

    async fn check_password(&self, password: &str) -> Result<()> {
        if let Some(expected) = self.accepted_password.lock().await.as_deref() {
            if expected != password {
                return Err(Error::AuthRejected("PASSWORD_HASH_INVALID".to_string()));
            }
        }
        *self.authorized.lock().await = true;
        Ok(())
    }

    async fn export_session_token(&self) -> Result<String> {
        Ok("token-1".to_string())
    }

    async fn sign_out(&self) -> Result<()> {
        self.sign_outs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        *self.authorized.lock().await = false;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn next_event(&self) -> Result<RawMessageEvent> {
        let mut guard = self.events.lock().await;
        match guard.as_mut() {
            Some(rx) => match rx.recv().await {
                Some(item) => item,
                None => std::future::pending().await,
            },
            None => std::future::pending().await,
        }
    }
}

/// In-memory credential store.
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub token: Mutex<Option<String>>,
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn session_token(&self) -> Result<Option<String>> {
        Ok(self.token.lock().await.clone())
    }

    async fn store(&self, token: &str) -> Result<()> {
        *self.token.lock().await = Some(token.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.token.lock().await = None;
        Ok(())
    }
}

/// Prompt that answers immediately with canned values.
pub(crate) struct CannedPrompt {
    pub code: String,
    pub password: Option<String>,
}

#[async_trait]
impl AuthPrompt for CannedPrompt {
    async fn request_code(&self) -> Result<String> {
        Ok(self.code.clone())
    }

    async fn request_password(&self, _hint: Option<&str>) -> Result<String> {
        self.password.clone().ok_or(Error::Cancelled)
    }
}

/// Prompt that never answers, for cancellation tests.
pub(crate) struct SilentPrompt;

#[async_trait]
impl AuthPrompt for SilentPrompt {
    async fn request_code(&self) -> Result<String> {
        std::future::pending().await
    }

    async fn request_password(&self, _hint: Option<&str>) -> Result<String> {
        std::future::pending().await
    }
}

pub(crate) fn raw_event(id: i64, text: &str, chat_id: &str) -> RawMessageEvent {
    RawMessageEvent {
        id,
        text: text.to_string(),
        sender: Some("alice".to_string()),
        chat_title: Some("Alerts".to_string()),
        chat_id: ChatId::new(chat_id),
        timestamp: Utc::now(),
    }
}
