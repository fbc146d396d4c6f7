use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::Settings,
    domain::{Notification, RawMessageEvent},
    errors::Error,
    filter, normalize,
    session::SessionManager,
    sound,
};

/// A live feed of processed message notifications.
///
/// Lazy, unbounded and non-restartable: once cancelled (explicitly, by
/// logout, or by a replacement subscription) it never yields again; items
/// already queued are discarded, not delivered.
#[derive(Debug)]
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<Notification>,
    cancel: CancellationToken,
}

impl EventSubscription {
    /// Waits for the next notification; `None` once the subscription ends.
    pub async fn recv(&mut self) -> Option<Notification> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Stops the feed. No notification is delivered after this returns, even
    /// for events that were already in flight.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Runs the normalize → filter → resolve steps against one settings snapshot.
pub fn process(raw: &RawMessageEvent, settings: &Settings) -> Notification {
    let record = filter::apply(normalize::normalize(raw), settings);
    let sound = sound::resolve(&record, &settings.sound_mappings, &settings.default_sound);
    Notification { record, sound }
}

pub(crate) fn spawn(
    session: SessionManager,
    settings: watch::Receiver<Arc<Settings>>,
    cancel: CancellationToken,
) -> EventSubscription {
    let (tx, rx) = mpsc::unbounded_channel();
    let pump_cancel = cancel.clone();

    tokio::spawn(async move {
        let port = session.port();
        loop {
            let raw = tokio::select! {
                biased;
                _ = pump_cancel.cancelled() => break,
                event = port.next_event() => match event {
                    Ok(raw) => raw,
                    Err(Error::Transport(reason)) => {
                        warn!(%reason, "event stream lost");
                        if !pump_cancel.is_cancelled() {
                            session.mark_failed(reason).await;
                        }
                        break;
                    }
                    Err(e) => {
                        // One bad event must never stall the stream.
                        warn!(error = %e, "dropping unprocessable event");
                        continue;
                    }
                },
            };

            let snapshot = settings.borrow().clone();
            let notification = process(&raw, &snapshot);
            debug!(
                chat = %notification.record.chat_id,
                matched = notification.record.matched_keywords.len(),
                visible = notification.record.visible,
                "message processed"
            );
            if tx.send(notification).is_err() {
                break; // consumer dropped the subscription
            }
        }
    });

    EventSubscription { rx, cancel }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuthState, Channel, ChatId, SoundMapping};
    use crate::testutil::{raw_event, MemoryStore, ScriptedPort};
    use std::time::Duration;
    use tokio::time::timeout;

    type EventSender = mpsc::UnboundedSender<crate::Result<RawMessageEvent>>;

    fn alert_settings() -> Settings {
        let mut settings = Settings::default();
        settings.add_keyword("shahed");
        settings.add_keyword("rocket");
        settings.add_excluded_channel(Channel {
            name: "muted".to_string(),
            id: ChatId::new("42"),
        });
        settings.add_sound_mapping(SoundMapping {
            keywords: vec!["shahed".to_string()],
            sound_file: "siren.mp3".to_string(),
            enabled: true,
        });
        settings.default_sound = "beep.mp3".to_string();
        settings
    }

    async fn authenticated_session() -> (SessionManager, EventSender) {
        let (port, events) = ScriptedPort::with_events();
        *port.authorized.lock().await = true;
        let session = SessionManager::new(port, Arc::new(MemoryStore::default()));
        session.connect().await.unwrap();
        (session, events)
    }

    fn snapshots(settings: Settings) -> (watch::Sender<Arc<Settings>>, watch::Receiver<Arc<Settings>>) {
        watch::channel(Arc::new(settings))
    }

    async fn next(subscription: &mut EventSubscription) -> Notification {
        timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("timed out waiting for a notification")
            .expect("subscription ended unexpectedly")
    }

    #[test]
    fn process_matches_filters_and_resolves() {
        let settings = alert_settings();

        let heard = process(&raw_event(1, "Shahed spotted", "99"), &settings);
        assert_eq!(heard.record.matched_keywords, vec!["shahed"]);
        assert!(heard.record.visible);
        assert_eq!(heard.sound.as_deref(), Some("siren.mp3"));

        let muted = process(&raw_event(2, "Shahed spotted", "42"), &settings);
        assert_eq!(muted.record.matched_keywords, vec!["shahed"]);
        assert!(!muted.record.visible);
        assert_eq!(muted.sound, None);
    }

    #[test]
    fn process_is_silent_without_matches() {
        let note = process(&raw_event(1, "all quiet today", "99"), &alert_settings());
        assert!(note.record.matched_keywords.is_empty());
        assert_eq!(note.sound, None);
    }

    #[tokio::test]
    async fn subscribing_unauthenticated_fails() {
        let port = Arc::new(ScriptedPort::new());
        let session = SessionManager::new(port, Arc::new(MemoryStore::default()));
        let (_tx, rx) = snapshots(Settings::default());

        let err = session.subscribe(rx).await.unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated));
    }

    #[tokio::test]
    async fn notifications_flow_in_receipt_order() {
        let (session, events) = authenticated_session().await;
        let (_tx, rx) = snapshots(alert_settings());
        let mut subscription = session.subscribe(rx).await.unwrap();

        events.send(Ok(raw_event(1, "rocket launch", "99"))).unwrap();
        events.send(Ok(raw_event(2, "nothing here", "99"))).unwrap();

        let first = next(&mut subscription).await;
        assert_eq!(first.record.id, 1);
        assert_eq!(first.record.matched_keywords, vec!["rocket"]);
        assert_eq!(first.sound.as_deref(), Some("beep.mp3"));

        let second = next(&mut subscription).await;
        assert_eq!(second.record.id, 2);
        assert_eq!(second.sound, None);
    }

    #[tokio::test]
    async fn cancellation_discards_events_already_in_flight() {
        let (session, events) = authenticated_session().await;
        let (_tx, rx) = snapshots(alert_settings());
        let mut subscription = session.subscribe(rx).await.unwrap();

        events.send(Ok(raw_event(1, "shahed", "99"))).unwrap();
        events.send(Ok(raw_event(2, "shahed", "99"))).unwrap();
        // Let the pump push both into the queue before cancelling.
        tokio::time::sleep(Duration::from_millis(50)).await;

        subscription.cancel();
        assert!(subscription.recv().await.is_none());
        assert!(subscription.recv().await.is_none());
    }

    #[tokio::test]
    async fn a_second_subscription_replaces_the_first() {
        let (session, events) = authenticated_session().await;
        let (_tx, rx) = snapshots(alert_settings());

        let mut first = session.subscribe(rx.clone()).await.unwrap();
        let mut second = session.subscribe(rx).await.unwrap();
        // Give the first pump a moment to observe its cancellation and
        // release the event source.
        tokio::time::sleep(Duration::from_millis(50)).await;

        events.send(Ok(raw_event(1, "rocket", "99"))).unwrap();

        assert!(first.recv().await.is_none());
        assert_eq!(next(&mut second).await.record.id, 1);
    }

    #[tokio::test]
    async fn a_bad_event_is_dropped_and_the_stream_continues() {
        let (session, events) = authenticated_session().await;
        let (_tx, rx) = snapshots(alert_settings());
        let mut subscription = session.subscribe(rx).await.unwrap();

        events
            .send(Err(Error::AuthRejected("malformed update".to_string())))
            .unwrap();
        events.send(Ok(raw_event(7, "rocket", "99"))).unwrap();

        assert_eq!(next(&mut subscription).await.record.id, 7);
        assert_eq!(session.state().await, AuthState::Authenticated);
    }

    #[tokio::test]
    async fn a_transport_error_fails_the_session_and_ends_the_stream() {
        let (session, events) = authenticated_session().await;
        let (_tx, rx) = snapshots(alert_settings());
        let mut subscription = session.subscribe(rx).await.unwrap();

        events
            .send(Err(Error::Transport("connection reset".to_string())))
            .unwrap();

        assert!(subscription.recv().await.is_none());
        assert!(matches!(session.state().await, AuthState::Failed(_)));
    }

    #[tokio::test]
    async fn settings_updates_apply_only_to_subsequent_messages() {
        let (session, events) = authenticated_session().await;
        let mut initial = Settings::default();
        initial.add_keyword("alpha");
        let (tx, rx) = snapshots(initial);
        let mut subscription = session.subscribe(rx).await.unwrap();

        events.send(Ok(raw_event(1, "alpha beta", "99"))).unwrap();
        assert_eq!(
            next(&mut subscription).await.record.matched_keywords,
            vec!["alpha"]
        );

        let mut updated = Settings::default();
        updated.add_keyword("beta");
        tx.send(Arc::new(updated)).unwrap();

        events.send(Ok(raw_event(2, "alpha beta", "99"))).unwrap();
        assert_eq!(
            next(&mut subscription).await.record.matched_keywords,
            vec!["beta"]
        );
    }
}
