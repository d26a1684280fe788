//! One periodic read of a device source.

use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use twox_hash::XxHash64;

use edgelink_core::models::{AutoEvent, Event, Reading};
use edgelink_core::{Value, ValueType};

use crate::codec;
use crate::dispatcher::CommandDispatcher;
use crate::publisher::PublishPool;

/// Comparable form of a reading.
#[derive(Debug, Clone, PartialEq)]
enum Snapshot {
    Hash(u64),
    Numbers(Vec<f64>),
    Text(String),
}

impl Snapshot {
    fn of(reading: &Reading) -> Self {
        if reading.value_type == ValueType::Binary {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(&reading.binary_value);
            return Self::Hash(hasher.finish());
        }
        if reading.value_type.is_numeric() || reading.value_type.is_numeric_array() {
            let numbers = codec::parse_value(reading.value_type, &reading.value)
                .ok()
                .and_then(|v| numbers_of(&v));
            if let Some(numbers) = numbers {
                return Self::Numbers(numbers);
            }
        }
        match &reading.object_value {
            Some(object) => Self::Text(object.to_string()),
            None => Self::Text(reading.value.clone()),
        }
    }

    fn differs(&self, other: &Self, threshold: f64) -> bool {
        match (self, other) {
            (Self::Numbers(a), Self::Numbers(b)) => {
                a.len() != b.len() || a.iter().zip(b).any(|(x, y)| (x - y).abs() > threshold)
            }
            (a, b) => a != b,
        }
    }
}

fn numbers_of(value: &Value) -> Option<Vec<f64>> {
    value
        .as_f64()
        .map(|v| vec![v])
        .or_else(|| value.numeric_components())
}

/// Last published reading per resource, for on-change filtering.
#[derive(Debug, Default)]
pub(crate) struct ChangeFilter {
    threshold: f64,
    last: HashMap<String, Snapshot>,
}

impl ChangeFilter {
    pub(crate) fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.max(0.0),
            last: HashMap::new(),
        }
    }

    /// Whether `event` differs from what was last published.
    ///
    /// A different set of resources renews every entry. Otherwise only the
    /// readings that moved beyond the threshold are stored, so drift below
    /// the threshold is measured against the last stored value.
    pub(crate) fn should_publish(&mut self, event: &Event) -> bool {
        let current: HashMap<String, Snapshot> = event
            .readings
            .iter()
            .map(|r| (r.resource_name.clone(), Snapshot::of(r)))
            .collect();

        let previous_names: HashSet<&String> = self.last.keys().collect();
        let current_names: HashSet<&String> = current.keys().collect();
        if previous_names != current_names {
            self.last = current;
            return true;
        }

        let mut changed = false;
        for (name, snapshot) in current {
            let moved = self
                .last
                .get(&name)
                .map_or(true, |prev| prev.differs(&snapshot, self.threshold));
            if moved {
                self.last.insert(name, snapshot);
                changed = true;
            }
        }
        changed
    }
}

/// Handle of a running executor.
pub(crate) struct ExecutorHandle {
    pub(crate) source: String,
    token: CancellationToken,
}

impl ExecutorHandle {
    pub(crate) fn stop(&self) {
        self.token.cancel();
    }
}

/// Spawns the loop reading `auto_event.source_name` every `interval`.
pub(crate) fn spawn(
    device: String,
    auto_event: AutoEvent,
    interval: Duration,
    dispatcher: Arc<CommandDispatcher>,
    pool: PublishPool,
    token: CancellationToken,
) -> ExecutorHandle {
    let handle = ExecutorHandle {
        source: auto_event.source_name.clone(),
        token: token.clone(),
    };
    tokio::spawn(async move {
        let mut filter = auto_event
            .on_change
            .then(|| ChangeFilter::new(auto_event.on_change_threshold));
        let source = auto_event.source_name;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(device = %device, source = %source, ?interval, "AutoEvent executor started");
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let event = match dispatcher.get_command(&device, &source, "", true).await {
                Ok(event) => event,
                Err(e) => {
                    warn!(device = %device, source = %source, error = %e, "AutoEvent read failed");
                    continue;
                }
            };
            if token.is_cancelled() {
                break;
            }
            if let Some(filter) = filter.as_mut() {
                if !filter.should_publish(&event) {
                    trace!(device = %device, source = %source, "Readings unchanged, skipping publish");
                    continue;
                }
            }
            let correlation_id = uuid::Uuid::new_v4().to_string();
            if let Err(e) = pool.submit(event, correlation_id).await {
                warn!(device = %device, source = %source, error = %e, "Failed to queue AutoEvent");
                break;
            }
        }
        debug!(device = %device, source = %source, "AutoEvent executor stopped");
    });
    handle
}
