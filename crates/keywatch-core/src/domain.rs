use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telegram chat id, kept as an opaque string so user, group and channel ids
/// (and whatever shape the platform migrates to) all key the exclusion set
/// the same way.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Connection/authentication state of a session. Exactly one instance exists
/// per `SessionManager`; transitions are serialized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    Disconnected,
    Connecting,
    AwaitingPhone,
    AwaitingCode,
    AwaitingPassword,
    Authenticated,
    Failed(String),
}

impl AuthState {
    pub fn name(&self) -> &'static str {
        match self {
            AuthState::Disconnected => "disconnected",
            AuthState::Connecting => "connecting",
            AuthState::AwaitingPhone => "awaiting phone",
            AuthState::AwaitingCode => "awaiting code",
            AuthState::AwaitingPassword => "awaiting password",
            AuthState::Authenticated => "authenticated",
            AuthState::Failed(_) => "failed",
        }
    }
}

/// Result of submitting a login code: either fully signed in, or the account
/// has a second factor and the flow moves on to the password step. The
/// second factor is a state transition signal, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignInOutcome {
    Authorized,
    PasswordRequired { hint: Option<String> },
}

/// A message event as the platform adapter produces it. Sender and chat
/// metadata are optional; the normalizer substitutes fallback labels.
#[derive(Clone, Debug)]
pub struct RawMessageEvent {
    pub id: i64,
    pub text: String,
    pub sender: Option<String>,
    pub chat_title: Option<String>,
    pub chat_id: ChatId,
    pub timestamp: DateTime<Utc>,
}

/// Canonical display-ready message. Never mutated after construction;
/// re-filtering derives a new record from the raw event instead of patching
/// one that is already in flight.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageRecord {
    pub id: i64,
    pub text: String,
    pub sender_label: String,
    pub chat_label: String,
    pub chat_id: ChatId,
    pub timestamp: DateTime<Utc>,
    /// Configured keywords found in `text`, in configured order.
    pub matched_keywords: Vec<String>,
    /// False when the chat is excluded; the record is retained but neither
    /// displayed nor voiced.
    pub visible: bool,
}

/// An excluded channel. `name` is descriptive only; exclusion keys on `id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub id: ChatId,
}

/// Ordered sound rule: the first enabled mapping whose keyword set intersects
/// a record's matched keywords supplies the notification sound.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundMapping {
    pub keywords: Vec<String>,
    pub sound_file: String,
    pub enabled: bool,
}

/// What the pipeline hands to the UI/notification collaborator: the annotated
/// record plus the resolved sound id, if any.
#[derive(Clone, Debug)]
pub struct Notification {
    pub record: MessageRecord,
    pub sound: Option<String>,
}
