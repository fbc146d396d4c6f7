//! Telegram adapter (grammers).
//!
//! This crate implements the `keywatch-core` TelegramPort over the grammers
//! MTProto client. Login and second-factor tokens stay inside the adapter;
//! session bytes are exported base64-encoded so the credential store can
//! treat them as an opaque string.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use grammers_client::{Client, Config, InitParams, SignInError, Update};
use grammers_session::Session;
use tokio::sync::Mutex;
use tracing::debug;

use keywatch_core::{
    domain::{ChatId, RawMessageEvent, SignInOutcome},
    errors::Error,
    ports::TelegramPort,
    Result,
};

/// RPC error names the platform uses for rejected login input. These are the
/// platform's structured error codes, not free-form message text.
const REJECTED_MARKERS: &[&str] = &[
    "PHONE_NUMBER_INVALID",
    "PHONE_NUMBER_BANNED",
    "PHONE_NUMBER_FLOOD",
    "PHONE_CODE_INVALID",
    "PHONE_CODE_EXPIRED",
];

pub struct GrammersPort {
    api_id: i32,
    api_hash: String,
    state: Mutex<PortState>,
}

#[derive(Default)]
struct PortState {
    client: Option<Client>,
    login_token: Option<grammers_client::types::LoginToken>,
    password_token: Option<grammers_client::types::PasswordToken>,
}

impl GrammersPort {
    pub fn new(api_id: i32, api_hash: impl Into<String>) -> Self {
        Self {
            api_id,
            api_hash: api_hash.into(),
            state: Mutex::new(PortState::default()),
        }
    }

    async fn client(&self) -> Result<Client> {
        self.state
            .lock()
            .await
            .client
            .clone()
            .ok_or_else(|| Error::Transport("not connected".to_string()))
    }
}

#[async_trait]
impl TelegramPort for GrammersPort {
    async fn connect(&self, session_token: Option<&str>) -> Result<()> {
        // A stored token that no longer decodes is treated like no token at
        // all: the session comes up unauthorized and the login flow runs.
        let session = session_token
            .filter(|t| !t.trim().is_empty())
            .and_then(|t| BASE64.decode(t).ok())
            .and_then(|bytes| Session::load(&bytes).ok())
            .unwrap_or_else(|| {
                debug!("starting with a fresh session");
                Session::new()
            });

        let client = Client::connect(Config {
            session,
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            params: InitParams {
                catch_up: false,
                ..Default::default()
            },
        })
        .await
        .map_err(transport)?;

        self.state.lock().await.client = Some(client);
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool> {
        self.client().await?.is_authorized().await.map_err(transport)
    }

    async fn request_login_code(&self, phone: &str) -> Result<()> {
        let client = self.client().await?;
        let token = client
            .request_login_code(phone)
            .await
            .map_err(classify_login_failure)?;
        self.state.lock().await.login_token = Some(token);
        Ok(())
    }

    async fn sign_in_with_code(&self, code: &str) -> Result<SignInOutcome> {
        let client = self.client().await?;
        let token = self
            .state
            .lock()
            .await
            .login_token
            .take()
            .ok_or_else(|| Error::Transport("no login code was requested".to_string()))?;

        match client.sign_in(&token, code).await {
            Ok(_user) => Ok(SignInOutcome::Authorized),
            Err(SignInError::PasswordRequired(password_token)) => {
                let hint = password_token.hint().map(|h| h.to_string());
                let mut st = self.state.lock().await;
                st.password_token = Some(password_token);
                Ok(SignInOutcome::PasswordRequired { hint })
            }
            Err(SignInError::InvalidCode) => {
                // The code request is still live; keep the token so the user
                // can retry the same step.
                self.state.lock().await.login_token = Some(token);
                Err(Error::AuthRejected(
                    "the verification code was not accepted".to_string(),
                ))
            }
            Err(e) => Err(classify_login_failure(e)),
        }
    }

    async fn check_password(&self, password: &str) -> Result<()> {
        let client = self.client().await?;
        let token = self
            .state
            .lock()
            .await
            .password_token
            .take()
            .ok_or_else(|| Error::Transport("no second-factor challenge is active".to_string()))?;

        match client.check_password(token, password).await {
            Ok(_user) => Ok(()),
            Err(SignInError::InvalidPassword) => Err(Error::AuthRejected(
                "the password was not accepted".to_string(),
            )),
            Err(e) => Err(classify_login_failure(e)),
        }
    }

    async fn export_session_token(&self) -> Result<String> {
        let client = self.client().await?;
        Ok(BASE64.encode(client.session().save()))
    }

    async fn sign_out(&self) -> Result<()> {
        let client = self.client().await?;
        client.sign_out().await.map_err(transport)?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        // Dropping the last client handle closes the connection.
        let mut st = self.state.lock().await;
        st.client = None;
        st.login_token = None;
        st.password_token = None;
        Ok(())
    }

    async fn next_event(&self) -> Result<RawMessageEvent> {
        let client = self.client().await?;
        loop {
            let update = client.next_update().await.map_err(transport)?;
            if let Update::NewMessage(message) = update {
                if message.outgoing() {
                    continue;
                }
                return Ok(raw_event_from(&message));
            }
        }
    }
}

fn raw_event_from(message: &grammers_client::types::Message) -> RawMessageEvent {
    let chat = message.chat();
    let sender = message
        .sender()
        .map(|peer| peer_label(&peer))
        .filter(|label| !label.is_empty());
    let chat_title = Some(chat.name().to_string()).filter(|title| !title.is_empty());

    RawMessageEvent {
        id: i64::from(message.id()),
        text: message.text().to_string(),
        sender,
        chat_title,
        chat_id: ChatId::new(chat.id().to_string()),
        timestamp: message.date(),
    }
}

fn peer_label(peer: &grammers_client::types::Chat) -> String {
    match peer.username() {
        Some(username) if !username.is_empty() => username.to_string(),
        _ => peer.name().to_string(),
    }
}

fn transport<E: std::fmt::Display>(e: E) -> Error {
    Error::Transport(e.to_string())
}

fn classify_login_failure<E: std::fmt::Display>(e: E) -> Error {
    let text = e.to_string();
    if REJECTED_MARKERS.iter().any(|marker| text.contains(marker)) {
        Error::AuthRejected(text)
    } else {
        Error::Transport(text)
    }
}
