//! Periodic budget usage feedback.
//!
//! For every configured budget the publisher looks up the latest reading of
//! the monitoring device and publishes how much of the daily budget has been
//! used, as a percentage, to `{feedback.topic_prefix}/{feedback_device_id}`.
//!
//! ```toml
//! [feedback]
//! enabled = true
//! interval = 60
//! topic_prefix = "budget"
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deepwatt_store::Store;
use rumqttc::{AsyncClient, QoS};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Errors that can occur while publishing feedback.
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("Failed to read budgets: {0}")]
    Store(#[from] deepwatt_store::Error),

    #[error("Failed to publish feedback: {0}")]
    Publish(#[from] rumqttc::ClientError),
}

/// Destination for feedback messages.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    /// Publish `payload` on `topic`, at most once and not retained.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), FeedbackError>;
}

/// Never waits for room in the client's request channel. While the broker is
/// unreachable the channel is not drained, so a full channel fails the
/// publish instead of blocking the round.
#[async_trait]
impl FeedbackSink for AsyncClient {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), FeedbackError> {
        self.try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}

/// Budget consumption of one monitoring device.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetUsage {
    pub monitoring_device_id: String,
    pub feedback_device_id: String,
    pub usage_percentage: f64,
}

/// Compute usage for every budget that has a reading and a positive threshold.
pub fn compute_usage(store: &Store) -> deepwatt_store::Result<Vec<BudgetUsage>> {
    let mut usage = Vec::new();

    for budget in store.list_budgets()? {
        let Some(reading) = store.latest_reading(&budget.monitoring_device_id)? else {
            debug!(
                device_id = %budget.monitoring_device_id,
                "No readings yet, skipping budget feedback"
            );
            continue;
        };

        let Some(usage_percentage) = budget.usage_percentage(reading.daily_energy) else {
            debug!(
                device_id = %budget.monitoring_device_id,
                threshold = budget.threshold,
                "Non-positive threshold, skipping budget feedback"
            );
            continue;
        };

        usage.push(BudgetUsage {
            monitoring_device_id: budget.monitoring_device_id,
            feedback_device_id: budget.feedback_device_id,
            usage_percentage,
        });
    }

    Ok(usage)
}

/// Topic for a feedback device.
pub fn feedback_topic(prefix: &str, feedback_device_id: &str) -> String {
    format!("{}/{}", prefix, feedback_device_id)
}

/// Text payload for a usage percentage.
pub fn format_usage(usage_percentage: f64) -> String {
    format!("{:.2}", usage_percentage)
}

/// Compute and publish usage for every budget once. Returns the number sent.
///
/// A failed publish is logged and does not stop the remaining budgets.
pub async fn publish_once(state: &AppState, sink: &dyn FeedbackSink) -> Result<usize, FeedbackError> {
    let usage = {
        let store = state.store.lock().await;
        compute_usage(&store)?
    };

    let prefix = &state.config.feedback.topic_prefix;
    let mut sent = 0;
    for entry in usage {
        let topic = feedback_topic(prefix, &entry.feedback_device_id);
        match sink.publish(&topic, format_usage(entry.usage_percentage)).await {
            Ok(()) => {
                sent += 1;
                debug!(
                    device_id = %entry.monitoring_device_id,
                    topic = %topic,
                    usage = entry.usage_percentage,
                    "Published budget feedback"
                );
            }
            Err(e) => warn!(topic = %topic, error = %e, "Failed to publish budget feedback"),
        }
    }

    Ok(sent)
}

/// Background task publishing budget feedback on a fixed interval.
pub struct FeedbackPublisher {
    state: Arc<AppState>,
    sink: Arc<dyn FeedbackSink>,
}

impl FeedbackPublisher {
    pub fn new(state: Arc<AppState>, sink: Arc<dyn FeedbackSink>) -> Self {
        Self { state, sink }
    }

    /// Spawn the publishing loop if feedback is enabled.
    ///
    /// Returns immediately; publishing happens in the background.
    pub fn start(self) -> Option<tokio::task::JoinHandle<()>> {
        if !self.state.config.feedback.enabled {
            info!("Budget feedback publisher is disabled");
            return None;
        }

        Some(tokio::spawn(self.run()))
    }

    async fn run(self) {
        let period = Duration::from_secs(self.state.config.feedback.interval);
        info!("Starting budget feedback publisher (interval: {:?})", period);

        let mut stop_rx = self.state.listener.subscribe_stop();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // A round in progress is abandoned on stop
                    tokio::select! {
                        result = publish_once(&self.state, self.sink.as_ref()) => {
                            if let Err(e) = result {
                                warn!("Budget feedback round failed: {}", e);
                            }
                        }
                        _ = stop_rx.changed() => {
                            info!("Budget feedback publisher received stop signal");
                            break;
                        }
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        info!("Budget feedback publisher received stop signal");
                        break;
                    }
                }
            }
        }

        info!("Budget feedback publisher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use deepwatt_store::{Budget, StoredReading};
    use time::OffsetDateTime;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl FeedbackSink for RecordingSink {
        async fn publish(&self, topic: &str, payload: String) -> Result<(), FeedbackError> {
            self.published.lock().await.push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn create_test_state(enabled: bool) -> Arc<AppState> {
        let mut config = Config::default();
        config.feedback.enabled = enabled;
        config.feedback.interval = 1;
        AppState::new(Store::open_in_memory().unwrap(), config)
    }

    fn reading(device_id: &str, daily_energy: f64) -> StoredReading {
        StoredReading {
            id: 0,
            device_id: device_id.to_string(),
            rms_current: 1.0,
            power: 230.0,
            daily_energy,
            timestamp: 0,
            received_at: OffsetDateTime::now_utc(),
        }
    }

    fn budget(monitoring: &str, feedback: &str, threshold: f64) -> Budget {
        Budget {
            monitoring_device_id: monitoring.to_string(),
            feedback_device_id: feedback.to_string(),
            threshold,
        }
    }

    #[test]
    fn test_compute_usage_uses_latest_reading() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_budget(&budget("dev1", "lamp1", 8.0)).unwrap();
        store.insert_reading(&reading("dev1", 1.0)).unwrap();
        store.insert_reading(&reading("dev1", 2.0)).unwrap();

        let usage = compute_usage(&store).unwrap();
        assert_eq!(
            usage,
            vec![BudgetUsage {
                monitoring_device_id: "dev1".to_string(),
                feedback_device_id: "lamp1".to_string(),
                usage_percentage: 25.0,
            }]
        );
    }

    #[test]
    fn test_compute_usage_skips_missing_and_zero() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_budget(&budget("no-readings", "lamp1", 8.0)).unwrap();
        store.upsert_budget(&budget("zero", "lamp2", 0.0)).unwrap();
        store.insert_reading(&reading("zero", 3.0)).unwrap();

        assert!(compute_usage(&store).unwrap().is_empty());
    }

    #[test]
    fn test_feedback_topic_and_payload() {
        assert_eq!(feedback_topic("budget", "lamp1"), "budget/lamp1");
        assert_eq!(format_usage(25.0), "25.00");
        assert_eq!(format_usage(133.3333), "133.33");
    }

    #[tokio::test]
    async fn test_publish_once() {
        let state = create_test_state(true);
        {
            let store = state.store.lock().await;
            store.upsert_budget(&budget("dev1", "lamp1", 10.0)).unwrap();
            store.upsert_budget(&budget("dev2", "lamp2", 4.0)).unwrap();
            store.insert_reading(&reading("dev1", 5.0)).unwrap();
            store.insert_reading(&reading("dev2", 6.0)).unwrap();
        }

        let sink = RecordingSink::default();
        let sent = publish_once(&state, &sink).await.unwrap();
        assert_eq!(sent, 2);

        let published = sink.published.lock().await;
        assert_eq!(
            *published,
            vec![
                ("budget/lamp1".to_string(), "50.00".to_string()),
                ("budget/lamp2".to_string(), "150.00".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_publisher_disabled() {
        let state = create_test_state(false);
        let publisher = FeedbackPublisher::new(state, Arc::new(RecordingSink::default()));
        assert!(publisher.start().is_none());
    }

    #[tokio::test]
    async fn test_publisher_runs_until_stopped() {
        let state = create_test_state(true);
        {
            let store = state.store.lock().await;
            store.upsert_budget(&budget("dev1", "lamp1", 10.0)).unwrap();
            store.insert_reading(&reading("dev1", 1.0)).unwrap();
        }

        let sink = Arc::new(RecordingSink::default());
        let handle = FeedbackPublisher::new(Arc::clone(&state), sink.clone())
            .start()
            .unwrap();

        // The first tick fires immediately.
        for _ in 0..50 {
            if !sink.published.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!sink.published.lock().await.is_empty());

        state.listener.signal_stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("publisher should stop")
            .unwrap();
    }

    /// Sink whose publish never completes.
    struct StalledSink;

    #[async_trait]
    impl FeedbackSink for StalledSink {
        async fn publish(&self, _topic: &str, _payload: String) -> Result<(), FeedbackError> {
            std::future::pending().await
        }
    }

    fn unreachable_client(capacity: usize) -> (AsyncClient, rumqttc::EventLoop) {
        let options = rumqttc::MqttOptions::new("feedback-test", "127.0.0.1", 1);
        AsyncClient::new(options, capacity)
    }

    #[tokio::test]
    async fn test_client_sink_does_not_wait_on_full_channel() {
        let state = create_test_state(true);
        {
            let store = state.store.lock().await;
            for (device, lamp) in [("dev1", "lamp1"), ("dev2", "lamp2"), ("dev3", "lamp3")] {
                store.upsert_budget(&budget(device, lamp, 10.0)).unwrap();
                store.insert_reading(&reading(device, 1.0)).unwrap();
            }
        }

        // The event loop is kept alive but never polled.
        let (client, _eventloop) = unreachable_client(1);
        let sent = tokio::time::timeout(Duration::from_secs(5), publish_once(&state, &client))
            .await
            .expect("publish round should not block")
            .unwrap();
        assert_eq!(sent, 1);
    }

    #[tokio::test]
    async fn test_publisher_stops_with_full_client_channel() {
        let state = create_test_state(true);
        {
            let store = state.store.lock().await;
            store.upsert_budget(&budget("dev1", "lamp1", 10.0)).unwrap();
            store.upsert_budget(&budget("dev2", "lamp2", 10.0)).unwrap();
            store.insert_reading(&reading("dev1", 1.0)).unwrap();
            store.insert_reading(&reading("dev2", 2.0)).unwrap();
        }

        let (client, _eventloop) = unreachable_client(1);
        let handle = FeedbackPublisher::new(Arc::clone(&state), Arc::new(client))
            .start()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        state.listener.signal_stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("publisher should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_publisher_stops_during_stalled_round() {
        let state = create_test_state(true);
        {
            let store = state.store.lock().await;
            store.upsert_budget(&budget("dev1", "lamp1", 10.0)).unwrap();
            store.insert_reading(&reading("dev1", 1.0)).unwrap();
        }

        let handle = FeedbackPublisher::new(Arc::clone(&state), Arc::new(StalledSink))
            .start()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        state.listener.signal_stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("publisher should stop")
            .unwrap();
    }
}
