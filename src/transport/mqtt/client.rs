//! rumqttc-backed broker client and its event-loop task.
//!
//! The client owns a background task that polls the MQTT event loop,
//! publishes connection-state changes on a watch channel and forwards
//! control-topic payloads onto the dispatcher's mpsc channel. On a network
//! failure the task parks in `Disconnected` until a reconnect is requested
//! via [`MqttBrokerClient::reconnect`] - the scheduler drives recovery, one
//! attempt per cycle, so failure behavior stays deterministic and testable.

use super::connection::{client_id, configure_mqtt_options, to_qos, ConnectionState, MqttError};
use crate::config::AgentConfig;
use crate::transport::BrokerClient;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// What an MQTT event means to this agent.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EventKind {
    /// ConnAck received, session usable
    Connected,
    /// SubAck accepting the control subscription
    SubscriptionConfirmed,
    /// SubAck carrying a failure reason code
    SubscriptionRejected,
    /// Payload arrived on the control topic
    ControlMessage(Bytes),
    /// Publish on some other topic, ignored
    ForeignMessage,
    /// Broker-initiated disconnect
    BrokerDisconnect,
    /// Keep-alives, acks of our own publishes, outgoing traffic
    Other,
}

/// Whether every granted reason code in a SubAck is a success grant.
fn suback_accepted(return_codes: &[SubscribeReasonCode]) -> bool {
    return_codes.iter().all(|code| {
        matches!(code, SubscribeReasonCode::Success(_))
    })
}

/// Classify an MQTT event. Pure routing decision, no I/O.
pub(crate) fn classify_event(event: &Event, control_topic: &str) -> EventKind {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => EventKind::Connected,
        Event::Incoming(Packet::SubAck(suback)) => {
            if suback_accepted(&suback.return_codes) {
                EventKind::SubscriptionConfirmed
            } else {
                EventKind::SubscriptionRejected
            }
        }
        Event::Incoming(Packet::Publish(publish)) => {
            if publish.topic.as_ref() == control_topic.as_bytes() {
                EventKind::ControlMessage(publish.payload.clone())
            } else {
                EventKind::ForeignMessage
            }
        }
        Event::Incoming(Packet::Disconnect(_)) => EventKind::BrokerDisconnect,
        _ => EventKind::Other,
    }
}

type SharedCommandSender = Arc<StdMutex<Option<mpsc::Sender<Bytes>>>>;

/// MQTT broker client for the telemetry agent.
///
/// The pending event loop sits behind a mutex until `connect` hands it to
/// the background task; rumqttc's event loop is `Send` but not `Sync`, and
/// the mutex is what keeps this struct shareable across tasks.
pub struct MqttBrokerClient {
    client: AsyncClient,
    event_loop: StdMutex<Option<EventLoop>>,
    control_topic: String,
    qos: QoS,
    subscribe_wanted: Arc<AtomicBool>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    resume_tx: watch::Sender<u64>,
    command_tx: SharedCommandSender,
    event_loop_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl MqttBrokerClient {
    pub fn new(config: &AgentConfig) -> Self {
        let options = configure_mqtt_options(config);
        let (client, event_loop) = AsyncClient::new(options, 10);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let (resume_tx, _) = watch::channel(0u64);

        MqttBrokerClient {
            client,
            event_loop: StdMutex::new(Some(event_loop)),
            control_topic: config.control_topic.clone(),
            qos: to_qos(config.broker_qos),
            subscribe_wanted: Arc::new(AtomicBool::new(false)),
            state_tx,
            state_rx,
            shutdown_tx,
            resume_tx,
            command_tx: Arc::new(StdMutex::new(None)),
            event_loop_handle: StdMutex::new(None),
        }
    }

    /// Wait until the state machine reaches a publishable state, or fail on
    /// timeout / an observed drop back to `Disconnected`. The state seen on
    /// entry does not fail fast: the event-loop task may not have announced
    /// `Connecting` yet when the caller starts waiting.
    async fn wait_for_connected(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let waited = tokio::time::timeout(timeout, async {
            let mut initial = true;
            loop {
                if state_rx.borrow().is_connected() {
                    return Ok(());
                }
                if !initial && *state_rx.borrow() == ConnectionState::Disconnected {
                    return Err(MqttError::ConnectionFailed(
                        "connection attempt failed".to_string(),
                    ));
                }
                initial = false;
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "state channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailed(format!(
                "no ConnAck within {}s",
                timeout.as_secs()
            ))),
        }
    }

    fn take_event_loop_handle(&self) -> Option<JoinHandle<()>> {
        match self.event_loop_handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Background task polling the MQTT event loop.
struct EventLoopTask {
    event_loop: EventLoop,
    client: AsyncClient,
    control_topic: String,
    qos: QoS,
    subscribe_wanted: Arc<AtomicBool>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    resume_rx: watch::Receiver<u64>,
    command_tx: SharedCommandSender,
}

impl EventLoopTask {
    async fn run(mut self) {
        let _ = self.state_tx.send(ConnectionState::Connecting);
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                event = self.event_loop.poll() => match event {
                    Ok(event) => self.handle_event(&event).await,
                    Err(e) => {
                        warn!(error = %e, "mqtt connection lost");
                        let _ = self.state_tx.send(ConnectionState::Disconnected);
                        // Park until the scheduler requests a reconnect.
                        if !self.wait_for_resume().await {
                            break;
                        }
                        let _ = self.state_tx.send(ConnectionState::Connecting);
                    }
                }
            }
        }
        let _ = self.state_tx.send(ConnectionState::Disconnected);
        debug!("mqtt event loop stopped");
    }

    async fn handle_event(&mut self, event: &Event) {
        match classify_event(event, &self.control_topic) {
            EventKind::Connected => {
                info!("mqtt session established");
                let _ = self.state_tx.send(ConnectionState::Connected);
                if self.subscribe_wanted.load(Ordering::SeqCst) {
                    let topic = self.control_topic.clone();
                    if let Err(e) = self.client.subscribe(topic, self.qos).await {
                        warn!(error = %e, topic = %self.control_topic,
                            "control topic re-subscription failed, continuing publish-only");
                    }
                }
            }
            EventKind::SubscriptionConfirmed => {
                info!(topic = %self.control_topic, "subscribed to control topic");
                let _ = self.state_tx.send(ConnectionState::Subscribed);
            }
            EventKind::SubscriptionRejected => {
                // Stays in Connected: publish-only operation remains valid.
                warn!(
                    topic = %self.control_topic,
                    "broker rejected control subscription, continuing publish-only"
                );
            }
            EventKind::ControlMessage(payload) => {
                let sender = match self.command_tx.lock() {
                    Ok(guard) => guard.clone(),
                    Err(poisoned) => poisoned.into_inner().clone(),
                };
                forward_command(sender, payload).await;
            }
            EventKind::BrokerDisconnect => {
                warn!("broker closed the session");
                let _ = self.state_tx.send(ConnectionState::Disconnected);
            }
            EventKind::ForeignMessage | EventKind::Other => {}
        }
    }

    /// Block in the disconnected state until a reconnect request or shutdown.
    /// Returns false when the loop should exit.
    async fn wait_for_resume(&mut self) -> bool {
        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        return false;
                    }
                }
                changed = self.resume_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    debug!("reconnect requested, resuming event loop");
                    return true;
                }
            }
        }
    }
}

/// Hand an inbound control payload to the dispatcher's channel. Takes the
/// sender by value so the await does not borrow the event-loop task.
async fn forward_command(sender: Option<mpsc::Sender<Bytes>>, payload: Bytes) {
    match sender {
        Some(tx) => {
            if let Err(e) = tx.send(payload).await {
                warn!(error = %e, "command channel closed, inbound message dropped");
            }
        }
        None => warn!("inbound command dropped: no dispatcher attached"),
    }
}

#[async_trait::async_trait]
impl BrokerClient for MqttBrokerClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = match self.event_loop.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
        .ok_or_else(|| MqttError::ConnectionFailed("event loop already started".to_string()))?;

        let task = EventLoopTask {
            event_loop,
            client: self.client.clone(),
            control_topic: self.control_topic.clone(),
            qos: self.qos,
            subscribe_wanted: self.subscribe_wanted.clone(),
            state_tx: self.state_tx.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
            resume_rx: self.resume_tx.subscribe(),
            command_tx: self.command_tx.clone(),
        };
        let _ = self.state_tx.send(ConnectionState::Connecting);
        let handle = tokio::spawn(task.run());
        match self.event_loop_handle.lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }

        info!(client_id = %client_id(), "connecting to mqtt broker");
        Self::wait_for_connected(self.state_rx.clone(), CONNECT_TIMEOUT).await
    }

    async fn subscribe_control(&mut self) -> Result<(), MqttError> {
        self.subscribe_wanted.store(true, Ordering::SeqCst);
        self.client
            .subscribe(self.control_topic.clone(), self.qos)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        // Wait for the SubAck so a rejected subscription is reported to the
        // caller instead of silently staying in Connected.
        let mut state_rx = self.state_rx.clone();
        let confirmed = tokio::time::timeout(SUBSCRIBE_TIMEOUT, async {
            loop {
                if *state_rx.borrow() == ConnectionState::Subscribed {
                    return true;
                }
                if state_rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await;

        match confirmed {
            Ok(true) => Ok(()),
            _ => Err(MqttError::SubscriptionFailed(
                format!("no SubAck for {} within {}s", self.control_topic, SUBSCRIBE_TIMEOUT.as_secs())
                    .into(),
            )),
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: u8) -> Result<(), MqttError> {
        let state = *self.state_rx.borrow();
        if !state.is_connected() {
            return Err(MqttError::NotConnected { state });
        }
        self.client
            .publish(topic, to_qos(qos), false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    async fn reconnect(&self) -> bool {
        if self.state_rx.borrow().is_connected() {
            return true;
        }
        self.resume_tx.send_modify(|n| *n = n.wrapping_add(1));
        Self::wait_for_connected(self.state_rx.clone(), RECONNECT_TIMEOUT)
            .await
            .is_ok()
    }

    async fn disconnect(&self) {
        // Best-effort teardown; each step may fail if the link is already
        // gone and none of that may stop the shutdown path.
        if let Err(e) = self.client.unsubscribe(self.control_topic.clone()).await {
            debug!(error = %e, "unsubscribe during shutdown failed");
        }
        // Dropping the sender closes the command channel, letting the
        // dispatcher drain in-flight commands and exit on its own.
        match self.command_tx.lock() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "disconnect during shutdown failed");
        }
        if let Some(handle) = self.take_event_loop_handle() {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => debug!("mqtt event loop shut down cleanly"),
                Ok(Err(e)) if !e.is_cancelled() => warn!(error = %e, "mqtt event loop task failed"),
                Err(_) => warn!("mqtt event loop did not stop in time, aborting"),
                _ => {}
            }
        }
        let _ = self.state_tx.send(ConnectionState::Disconnected);
        info!("mqtt client disconnected");
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    fn set_command_sender(&self, sender: mpsc::Sender<Bytes>) {
        match self.command_tx.lock() {
            Ok(mut guard) => *guard = Some(sender),
            Err(poisoned) => *poisoned.into_inner() = Some(sender),
        }
    }
}

impl Drop for MqttBrokerClient {
    fn drop(&mut self) {
        // Explicit disconnect() is the graceful path; this only stops the
        // background task when the client is dropped without one.
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.take_event_loop_handle() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish, SubAck,
    };

    const CONTROL: &str = "office/sht40/control";

    fn publish_event(topic: &str, payload: &str) -> Event {
        Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from(topic.to_string()),
            pkid: 1,
            payload: Bytes::from(payload.to_string()),
            properties: None,
        }))
    }

    #[test]
    fn client_is_shareable_across_tasks() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MqttBrokerClient>();
    }

    #[test]
    fn granted_suback_classifies_as_confirmed() {
        let event = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 1,
            return_codes: vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
            properties: None,
        }));
        assert_eq!(
            classify_event(&event, CONTROL),
            EventKind::SubscriptionConfirmed
        );
    }

    #[test]
    fn rejected_suback_is_not_confirmed() {
        for code in [
            SubscribeReasonCode::NotAuthorized,
            SubscribeReasonCode::Unspecified,
            SubscribeReasonCode::TopicFilterInvalid,
            SubscribeReasonCode::QuotaExceeded,
        ] {
            let event = Event::Incoming(Packet::SubAck(SubAck {
                pkid: 1,
                return_codes: vec![code],
                properties: None,
            }));
            assert_eq!(
                classify_event(&event, CONTROL),
                EventKind::SubscriptionRejected,
                "code {code:?} should reject"
            );
        }
    }

    #[test]
    fn mixed_suback_grants_reject_as_a_whole() {
        assert!(suback_accepted(&[
            SubscribeReasonCode::Success(QoS::AtMostOnce),
            SubscribeReasonCode::Success(QoS::ExactlyOnce)
        ]));
        assert!(!suback_accepted(&[
            SubscribeReasonCode::Success(QoS::AtLeastOnce),
            SubscribeReasonCode::NotAuthorized
        ]));
        // An empty grant list carries no failure.
        assert!(suback_accepted(&[]));
    }

    #[test]
    fn connack_classifies_as_connected() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(classify_event(&event, CONTROL), EventKind::Connected);
    }

    #[test]
    fn control_topic_publish_carries_payload() {
        let event = publish_event(CONTROL, r#"{"command":"publishTelemetry"}"#);
        match classify_event(&event, CONTROL) {
            EventKind::ControlMessage(payload) => {
                assert_eq!(payload.as_ref(), br#"{"command":"publishTelemetry"}"#);
            }
            other => panic!("expected ControlMessage, got {other:?}"),
        }
    }

    #[test]
    fn publish_on_other_topic_is_foreign() {
        let event = publish_event("office/other", "x");
        assert_eq!(classify_event(&event, CONTROL), EventKind::ForeignMessage);
    }

    #[test]
    fn broker_disconnect_is_classified() {
        let event = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(classify_event(&event, CONTROL), EventKind::BrokerDisconnect);
    }

    #[tokio::test]
    async fn wait_for_connected_succeeds_on_state_change() {
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(ConnectionState::Connected);
        });
        let result =
            MqttBrokerClient::wait_for_connected(rx, Duration::from_millis(200)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn wait_for_connected_times_out() {
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        // Keep the sender alive so the channel stays open without progress.
        let _keepalive = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(tx);
        });
        let result =
            MqttBrokerClient::wait_for_connected(rx, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(MqttError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn wait_for_connected_fails_fast_on_drop_to_disconnected() {
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(ConnectionState::Disconnected);
        });
        let result =
            MqttBrokerClient::wait_for_connected(rx, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(MqttError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn publish_fails_before_connect() {
        let client = MqttBrokerClient::new(&AgentConfig::test_config());
        let result = client.publish("t", b"{}".to_vec(), 1).await;
        assert!(matches!(result, Err(MqttError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn initial_state_is_disconnected() {
        let client = MqttBrokerClient::new(&AgentConfig::test_config());
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
    }
}
