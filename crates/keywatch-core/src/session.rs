use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    config::Settings,
    domain::{AuthState, SignInOutcome},
    errors::Error,
    ports::{AuthPrompt, CredentialStore, TelegramPort},
    subscription::{self, EventSubscription},
    Result,
};

/// An outstanding request for a verification code. At most one exists per
/// session: created by `submit_phone`, consumed by `submit_code`, abandoned
/// by `logout` or a transport failure. The token aborts a login driver that
/// is suspended waiting for the user to type the code.
#[derive(Debug)]
pub struct PendingCodeRequest {
    pub id: u64,
    abandoned: CancellationToken,
}

struct SessionState {
    auth: AuthState,
    pending_code: Option<PendingCodeRequest>,
    next_request_id: u64,
    subscription: Option<CancellationToken>,
}

/// Owns the connection lifecycle and the phone/code/password state machine.
///
/// All transitions go through one mutex, applied one at a time; platform
/// calls run with the lock released so a logout issued from another task can
/// always proceed.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    port: Arc<dyn TelegramPort>,
    store: Arc<dyn CredentialStore>,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(port: Arc<dyn TelegramPort>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                port,
                store,
                state: Mutex::new(SessionState {
                    auth: AuthState::Disconnected,
                    pending_code: None,
                    next_request_id: 1,
                    subscription: None,
                }),
            }),
        }
    }

    pub async fn state(&self) -> AuthState {
        self.inner.state.lock().await.auth.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        matches!(self.inner.state.lock().await.auth, AuthState::Authenticated)
    }

    /// Opens the transport and restores the persisted session when the stored
    /// token is still valid; otherwise the session comes up waiting for a
    /// phone number. Idempotent while already authenticated.
    pub async fn connect(&self) -> Result<AuthState> {
        {
            let mut st = self.inner.state.lock().await;
            match st.auth {
                AuthState::Authenticated => return Ok(AuthState::Authenticated),
                AuthState::Connecting => return Err(Error::AlreadyPending),
                AuthState::Disconnected | AuthState::Failed(_) => {}
                _ => return Err(Error::invalid_state("connect", &st.auth)),
            }
            st.auth = AuthState::Connecting;
        }

        let token = match self.inner.store.session_token().await {
            Ok(token) => token,
            Err(e) => return self.fail(e).await,
        };

        if let Err(e) = self.inner.port.connect(token.as_deref()).await {
            return self.fail(e).await;
        }

        let authorized = match self.inner.port.is_authorized().await {
            Ok(authorized) => authorized,
            Err(e) => return self.fail(e).await,
        };

        let next = if authorized {
            // The platform may rotate session keys during connect.
            self.persist_session_token().await;
            AuthState::Authenticated
        } else {
            AuthState::AwaitingPhone
        };

        let mut st = self.inner.state.lock().await;
        st.auth = next.clone();
        Ok(next)
    }

    /// Starts a login: asks the platform to send a verification code to the
    /// given phone number. Only one login sequence may be in flight.
    pub async fn submit_phone(&self, phone: &str) -> Result<u64> {
        let request_id = {
            let mut st = self.inner.state.lock().await;
            if st.auth != AuthState::AwaitingPhone {
                return Err(Error::invalid_state("submit_phone", &st.auth));
            }
            if st.pending_code.is_some() {
                return Err(Error::AlreadyPending);
            }
            let id = st.next_request_id;
            st.next_request_id += 1;
            // Reserve the slot before the platform call so a concurrent
            // submit_phone observes the outstanding request.
            st.pending_code = Some(PendingCodeRequest {
                id,
                abandoned: CancellationToken::new(),
            });
            id
        };

        match self.inner.port.request_login_code(phone).await {
            Ok(()) => {
                // The platform call ran with the lock released; a concurrent
                // logout may have abandoned this login in the meantime. Only
                // transition if the request is still ours.
                let mut st = self.inner.state.lock().await;
                let still_ours = st.auth == AuthState::AwaitingPhone
                    && st.pending_code.as_ref().map(|p| p.id) == Some(request_id);
                if !still_ours {
                    return Err(Error::Cancelled);
                }
                st.auth = AuthState::AwaitingCode;
                Ok(request_id)
            }
            Err(e @ Error::AuthRejected(_)) => {
                // Stay in AwaitingPhone so the user can retry the same step.
                let mut st = self.inner.state.lock().await;
                if st.pending_code.as_ref().map(|p| p.id) == Some(request_id) {
                    if let Some(pending) = st.pending_code.take() {
                        pending.abandoned.cancel();
                    }
                }
                Err(e)
            }
            Err(e) => self.fail(e).await,
        }
    }

    /// Resolves the outstanding code request with the user-provided code.
    /// `PasswordRequired` is a transition to the second-factor step, not an
    /// error.
    pub async fn submit_code(&self, code: &str) -> Result<SignInOutcome> {
        let pending = {
            let mut st = self.inner.state.lock().await;
            if st.auth != AuthState::AwaitingCode {
                return Err(Error::invalid_state("submit_code", &st.auth));
            }
            match st.pending_code.take() {
                Some(pending) => pending,
                None => return Err(Error::invalid_state("submit_code", &st.auth)),
            }
        };

        match self.inner.port.sign_in_with_code(code).await {
            Ok(SignInOutcome::Authorized) => {
                // Re-validate under the lock: a concurrent logout may have
                // torn the login down while the platform call was in flight,
                // and it must not be clobbered back to Authenticated.
                let mut st = self.inner.state.lock().await;
                if st.auth != AuthState::AwaitingCode {
                    pending.abandoned.cancel();
                    return Err(Error::Cancelled);
                }
                st.auth = AuthState::Authenticated;
                // The lock is held across the persist so a logout cannot slip
                // between the transition and the token write.
                self.persist_session_token().await;
                Ok(SignInOutcome::Authorized)
            }
            Ok(SignInOutcome::PasswordRequired { hint }) => {
                let mut st = self.inner.state.lock().await;
                if st.auth != AuthState::AwaitingCode {
                    pending.abandoned.cancel();
                    return Err(Error::Cancelled);
                }
                st.auth = AuthState::AwaitingPassword;
                Ok(SignInOutcome::PasswordRequired { hint })
            }
            Err(e @ Error::AuthRejected(_)) => {
                // The code request is still live on the platform side; re-arm
                // it so the user can retry the same step, unless the login
                // was torn down underneath us.
                let mut st = self.inner.state.lock().await;
                if st.auth == AuthState::AwaitingCode && st.pending_code.is_none() {
                    st.pending_code = Some(pending);
                    Err(e)
                } else {
                    pending.abandoned.cancel();
                    Err(Error::Cancelled)
                }
            }
            Err(e) => {
                pending.abandoned.cancel();
                self.fail(e).await
            }
        }
    }

    /// Completes a second-factor login. The password is used for this one
    /// attempt and dropped, success or failure; a wrong password leaves the
    /// session waiting for another try.
    pub async fn submit_password(&self, password: &str) -> Result<()> {
        {
            let st = self.inner.state.lock().await;
            if st.auth != AuthState::AwaitingPassword {
                return Err(Error::invalid_state("submit_password", &st.auth));
            }
        }

        match self.inner.port.check_password(password).await {
            Ok(()) => {
                let mut st = self.inner.state.lock().await;
                if st.auth != AuthState::AwaitingPassword {
                    return Err(Error::Cancelled);
                }
                st.auth = AuthState::Authenticated;
                // Lock held across the persist, as in submit_code.
                self.persist_session_token().await;
                Ok(())
            }
            Err(e @ Error::AuthRejected(_)) => Err(e),
            Err(e) => self.fail(e).await,
        }
    }

    /// Drives the whole interactive flow: phone, then code, then password
    /// when the account has a second factor. The code wait is aborted when
    /// the pending request is abandoned by a concurrent logout.
    pub async fn login(&self, phone: &str, prompt: &dyn AuthPrompt) -> Result<()> {
        self.submit_phone(phone).await?;

        let abandoned = {
            let st = self.inner.state.lock().await;
            match &st.pending_code {
                Some(pending) => pending.abandoned.clone(),
                None => return Err(Error::Cancelled),
            }
        };

        let code = tokio::select! {
            _ = abandoned.cancelled() => return Err(Error::Cancelled),
            code = prompt.request_code() => code?,
        };

        match self.submit_code(&code).await? {
            SignInOutcome::Authorized => Ok(()),
            SignInOutcome::PasswordRequired { hint } => {
                // Unlike the code wait, the password prompt is not tied to
                // the abandonment token; a logout during this wait surfaces
                // when submit_password re-checks the state.
                let password = prompt.request_password(hint.as_deref()).await?;
                self.submit_password(&password).await
            }
        }
    }

    /// Starts the live message pipeline. Requires an authenticated session;
    /// a second subscription replaces (and cancels) the first.
    pub async fn subscribe(
        &self,
        settings: watch::Receiver<Arc<Settings>>,
    ) -> Result<EventSubscription> {
        let cancel = CancellationToken::new();
        {
            let mut st = self.inner.state.lock().await;
            if st.auth != AuthState::Authenticated {
                return Err(Error::NotAuthenticated);
            }
            if let Some(previous) = st.subscription.replace(cancel.clone()) {
                previous.cancel();
            }
        }
        Ok(subscription::spawn(self.clone(), settings, cancel))
    }

    /// Tears the session down: cancels the subscription and any pending code
    /// request, signs out, clears the stored token, returns to Disconnected.
    ///
    /// Valid from Authenticated and Failed, and from the awaiting states as
    /// the abandonment path for an in-flight login.
    pub async fn logout(&self) -> Result<()> {
        {
            let mut st = self.inner.state.lock().await;
            if matches!(st.auth, AuthState::Disconnected | AuthState::Connecting) {
                return Err(Error::invalid_state("logout", &st.auth));
            }
            if let Some(subscription) = st.subscription.take() {
                subscription.cancel();
            }
            if let Some(pending) = st.pending_code.take() {
                pending.abandoned.cancel();
            }
        }

        if let Err(e) = self.inner.port.sign_out().await {
            warn!(error = %e, "sign-out failed; clearing local session anyway");
        }
        if let Err(e) = self.inner.port.disconnect().await {
            warn!(error = %e, "disconnect failed");
        }
        self.inner.store.clear().await?;

        let mut st = self.inner.state.lock().await;
        st.auth = AuthState::Disconnected;
        Ok(())
    }

    pub(crate) fn port(&self) -> Arc<dyn TelegramPort> {
        self.inner.port.clone()
    }

    /// Transport failure observed by the event pump: the session attempt is
    /// over until an explicit reconnect.
    pub(crate) async fn mark_failed(&self, reason: String) {
        let mut st = self.inner.state.lock().await;
        if st.auth == AuthState::Disconnected {
            return; // a completed logout outranks a late failure
        }
        if let Some(subscription) = st.subscription.take() {
            subscription.cancel();
        }
        if let Some(pending) = st.pending_code.take() {
            pending.abandoned.cancel();
        }
        st.auth = AuthState::Failed(reason);
    }

    async fn fail<T>(&self, e: Error) -> Result<T> {
        self.mark_failed(e.to_string()).await;
        Err(e)
    }

    async fn persist_session_token(&self) {
        match self.inner.port.export_session_token().await {
            Ok(token) => {
                if let Err(e) = self.inner.store.store(&token).await {
                    warn!(error = %e, "failed to persist session token");
                }
            }
            Err(e) => warn!(error = %e, "failed to export session token"),
        }
    }
}
