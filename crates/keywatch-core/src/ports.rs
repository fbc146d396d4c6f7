use async_trait::async_trait;

use crate::{
    domain::{RawMessageEvent, SignInOutcome},
    Result,
};

/// Platform connection port.
///
/// The MTProto wire protocol lives behind this trait; the adapter crate
/// implements it over a real client, and tests script it. Login tokens and
/// second-factor challenges are adapter-internal state, never seen by the
/// core.
#[async_trait]
pub trait TelegramPort: Send + Sync {
    /// Opens the transport, restoring the given persisted session if present.
    /// A token the platform no longer accepts is not an error; the session
    /// simply comes up unauthorized.
    async fn connect(&self, session_token: Option<&str>) -> Result<()>;

    async fn is_authorized(&self) -> Result<bool>;

    /// Asks the platform to send a verification code to `phone`.
    async fn request_login_code(&self, phone: &str) -> Result<()>;

    async fn sign_in_with_code(&self, code: &str) -> Result<SignInOutcome>;

    async fn check_password(&self, password: &str) -> Result<()>;

    /// Serializes the live session into an opaque token for the credential
    /// store.
    async fn export_session_token(&self) -> Result<String>;

    async fn sign_out(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Waits for the next incoming message event. Pends while the connection
    /// is idle; fails with `Transport` when the connection is lost.
    async fn next_event(&self) -> Result<RawMessageEvent>;
}

/// Opaque storage for the persisted session token.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn session_token(&self) -> Result<Option<String>>;
    async fn store(&self, token: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// Authentication UI callback. The login driver awaits these; a logout from
/// another task aborts the wait through the pending request's token.
#[async_trait]
pub trait AuthPrompt: Send + Sync {
    async fn request_code(&self) -> Result<String>;
    async fn request_password(&self, hint: Option<&str>) -> Result<String>;
}

/// Notification sound sink. The core emits sound-file identifiers only;
/// resolving them to audio and playing it is the shell's job.
#[async_trait]
pub trait SoundSink: Send + Sync {
    async fn play(&self, sound_file: &str) -> Result<()>;
}
