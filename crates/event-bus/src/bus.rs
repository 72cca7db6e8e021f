//! Event Bus Implementation

use bench_core::{ProcessedFrame, SensorCommand, SensorId, SensorSample, TestMetaData};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Per-topic channel depth. Steady-state rates are small (at most ~100 raw
/// lines/s across all sensors and 4 frames/s), so this absorbs long pauses.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// The closed set of topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Raw lines from the serial readers: `(sensor, line)`.
    SerialData,
    /// Pre-offset samples from the sensor manager.
    SensorRawUpdate,
    /// Post-offset samples from the sensor manager.
    SensorUpdate,
    /// Commands addressed to the sensor manager.
    SensorCommand,
    /// Fixed-rate fused frames from the data processor.
    ProcessedData,
    /// Test lifecycle notifications.
    TestLifecycle,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::SerialData,
        Topic::SensorRawUpdate,
        Topic::SensorUpdate,
        Topic::SensorCommand,
        Topic::ProcessedData,
        Topic::TestLifecycle,
    ];

    const fn slot(self) -> usize {
        match self {
            Topic::SerialData => 0,
            Topic::SensorRawUpdate => 1,
            Topic::SensorUpdate => 2,
            Topic::SensorCommand => 3,
            Topic::ProcessedData => 4,
            Topic::TestLifecycle => 5,
        }
    }
}

/// Every payload that can cross the bus.
#[derive(Debug, Clone)]
pub enum Event {
    SerialData { sensor: SensorId, line: String },
    SensorRawUpdate(SensorSample),
    SensorUpdate(SensorSample),
    SensorCommand(SensorCommand),
    ProcessedData(ProcessedFrame),
    TestPrepared(TestMetaData),
    TestStarted(TestMetaData),
    TestStopped(TestMetaData),
    TestFinalized(TestMetaData),
    /// True while a test is recording.
    TestStateChanged(bool),
    HistoryUpdated,
}

impl Event {
    /// Topic this event is delivered on.
    pub fn topic(&self) -> Topic {
        match self {
            Event::SerialData { .. } => Topic::SerialData,
            Event::SensorRawUpdate(_) => Topic::SensorRawUpdate,
            Event::SensorUpdate(_) => Topic::SensorUpdate,
            Event::SensorCommand(_) => Topic::SensorCommand,
            Event::ProcessedData(_) => Topic::ProcessedData,
            Event::TestPrepared(_)
            | Event::TestStarted(_)
            | Event::TestStopped(_)
            | Event::TestFinalized(_)
            | Event::TestStateChanged(_)
            | Event::HistoryUpdated => Topic::TestLifecycle,
        }
    }
}

/// Cheaply cloneable bus handle. Publishing is safe from any thread; events
/// arrive at each topic's subscribers in publish order.
#[derive(Debug, Clone)]
pub struct EventBus {
    channels: Arc<[broadcast::Sender<Event>; Topic::ALL.len()]>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let channels = std::array::from_fn(|_| broadcast::channel(capacity).0);
        Self {
            channels: Arc::new(channels),
        }
    }

    /// Publish an event on its topic. A topic with no subscribers drops the
    /// event silently.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        let _ = self.channels[topic.slot()].send(event);
    }

    /// Subscribe to one topic. The receiver observes events published after
    /// this call, in FIFO order. Dropping the receiver unsubscribes;
    /// subscribing or unsubscribing during a delivery never disturbs other
    /// receivers.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.channels[topic.slot()].subscribe()
    }

    /// Current subscriber count for a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.channels[topic.slot()].receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
