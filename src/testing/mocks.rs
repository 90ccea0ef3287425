//! Scriptable in-memory implementations of [`BrokerClient`] and
//! [`SensorReader`].
//!
//! Both mocks are cheap clones over shared state, so a test can keep a
//! handle while the agent owns another: flip broker reachability, inject a
//! one-shot publish failure, deliver control payloads, or script sensor
//! failures, then assert on everything published.

use crate::sensor::{Sample, SensorError, SensorReader};
use crate::transport::{BrokerClient, ConnectionState, MqttError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct MockBrokerInner {
    state: Mutex<ConnectionState>,
    reachable: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_next_publish: AtomicBool,
    reconnect_attempts: AtomicU64,
    published: Mutex<Vec<(String, Vec<u8>, u8)>>,
    command_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
}

/// In-memory broker double. Clones share state.
#[derive(Clone)]
pub struct MockBroker {
    inner: Arc<MockBrokerInner>,
}

impl MockBroker {
    /// A broker that is already connected and reachable.
    pub fn connected() -> Self {
        Self::with_state(ConnectionState::Connected, true)
    }

    /// A broker that is down and stays down until
    /// [`MockBroker::set_reachable`] flips it.
    pub fn disconnected() -> Self {
        Self::with_state(ConnectionState::Disconnected, false)
    }

    fn with_state(state: ConnectionState, reachable: bool) -> Self {
        MockBroker {
            inner: Arc::new(MockBrokerInner {
                state: Mutex::new(state),
                reachable: AtomicBool::new(reachable),
                fail_subscribe: AtomicBool::new(false),
                fail_next_publish: AtomicBool::new(false),
                reconnect_attempts: AtomicU64::new(0),
                published: Mutex::new(Vec::new()),
                command_tx: Mutex::new(None),
            }),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.inner.state) = state;
    }

    /// Control whether connect/reconnect attempts succeed. Making the broker
    /// unreachable also drops the current connection.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
        if !reachable {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Make control-topic subscription attempts fail.
    pub fn fail_subscribe(&self) {
        self.inner.fail_subscribe.store(true, Ordering::SeqCst);
    }

    /// Make exactly the next publish fail.
    pub fn fail_next_publish(&self) {
        self.inner.fail_next_publish.store(true, Ordering::SeqCst);
    }

    /// Everything published so far, as (topic, payload, qos).
    pub fn published(&self) -> Vec<(String, Vec<u8>, u8)> {
        lock(&self.inner.published).clone()
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Deliver a payload as if it arrived on the control topic. Panics if no
    /// command sender was registered yet.
    pub async fn inject_command(&self, payload: &[u8]) {
        let sender = lock(&self.inner.command_tx)
            .clone()
            .expect("no command sender registered");
        sender
            .send(Bytes::copy_from_slice(payload))
            .await
            .expect("command channel closed");
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), MqttError> {
        if self.inner.reachable.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Connected);
            Ok(())
        } else {
            Err(MqttError::ConnectionFailed(
                "mock broker unreachable".to_string(),
            ))
        }
    }

    async fn subscribe_control(&mut self) -> Result<(), MqttError> {
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(MqttError::SubscriptionFailed(
                "scripted subscription failure".into(),
            ));
        }
        if self.is_connected() {
            self.set_state(ConnectionState::Subscribed);
            Ok(())
        } else {
            Err(MqttError::SubscriptionFailed("not connected".into()))
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: u8) -> Result<(), MqttError> {
        let state = self.connection_state();
        if !state.is_connected() {
            return Err(MqttError::NotConnected { state });
        }
        if self.inner.fail_next_publish.swap(false, Ordering::SeqCst) {
            return Err(MqttError::PublishFailed("scripted publish failure".into()));
        }
        lock(&self.inner.published).push((topic.to_string(), payload, qos));
        Ok(())
    }

    async fn reconnect(&self) -> bool {
        if self.connection_state().is_connected() {
            return true;
        }
        self.inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.reachable.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Connected);
            true
        } else {
            false
        }
    }

    async fn disconnect(&self) {
        // Mirrors the real client: dropping the sender closes the command
        // channel so the dispatcher drains and exits.
        *lock(&self.inner.command_tx) = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn connection_state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    fn set_command_sender(&self, sender: mpsc::Sender<Bytes>) {
        *lock(&self.inner.command_tx) = Some(sender);
    }
}

struct MockSensorInner {
    sample: Mutex<Sample>,
    failing: AtomicBool,
    reads: AtomicU64,
}

/// Sensor double returning a fixed sample or a scripted failure. Clones
/// share state.
#[derive(Clone)]
pub struct MockSensor {
    inner: Arc<MockSensorInner>,
}

impl MockSensor {
    /// Always returns the same reading.
    pub fn steady(temperature_c: f64, relative_humidity: f64) -> Self {
        MockSensor {
            inner: Arc::new(MockSensorInner {
                sample: Mutex::new(Sample {
                    temperature_c,
                    relative_humidity,
                }),
                failing: AtomicBool::new(false),
                reads: AtomicU64::new(0),
            }),
        }
    }

    /// Every read fails until [`MockSensor::set_failing`] flips it back.
    pub fn failing() -> Self {
        let sensor = Self::steady(21.5, 40.0);
        sensor.set_failing(true);
        sensor
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_sample(&self, temperature_c: f64, relative_humidity: f64) {
        *lock(&self.inner.sample) = Sample {
            temperature_c,
            relative_humidity,
        };
    }

    pub fn reads(&self) -> u64 {
        self.inner.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorReader for MockSensor {
    async fn sample(&self) -> Result<Sample, SensorError> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        if self.inner.failing.load(Ordering::SeqCst) {
            Err(SensorError::ReadFailed(
                "scripted sensor failure".to_string(),
            ))
        } else {
            Ok(*lock(&self.inner.sample))
        }
    }
}
