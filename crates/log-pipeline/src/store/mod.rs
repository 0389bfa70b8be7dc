//! Storage abstraction for events and sensor resume positions.
//!
//! The [`EventStore`] trait is the only way the aggregator touches durable
//! state. Production code uses [`SqliteEventStore`]; unit tests use
//! `MockEventStore`, which can inject write failures.
//!
//! ```text
//!   ┌────────────┐
//!   │ Aggregator │
//!   └─────┬──────┘
//!         ▼
//!   ┌────────────┐
//!   │ EventStore │ (trait)
//!   └────────────┘
//!      │       │
//!      ▼       ▼
//!  ┌──────┐ ┌──────┐
//!  │SQLite│ │ Mock │
//!  └──────┘ └──────┘
//! ```

pub mod sqlite;

pub use sqlite::SqliteEventStore;

use std::future::Future;

use chrono::{DateTime, Utc};

use logwarden_core::event::{Event, SensorState};
use logwarden_core::types::Country;

use crate::error::LogPipelineError;

/// Durable storage for events and per-(node, sensor) resume positions.
///
/// The aggregator is the only writer. Implementations must be safe to
/// share across tasks.
pub trait EventStore: Send + Sync + 'static {
    /// Ensures the event and sensor-state tables exist.
    fn migrate(&self) -> impl Future<Output = Result<(), LogPipelineError>> + Send;

    /// Inserts one event record.
    fn insert_event(
        &self,
        event: &Event,
    ) -> impl Future<Output = Result<(), LogPipelineError>> + Send;

    /// Returns every event that has not been included in a report yet.
    fn unreported_events(
        &self,
    ) -> impl Future<Output = Result<Vec<Event>, LogPipelineError>> + Send;

    /// Stamps one event as reported.
    fn mark_reported(
        &self,
        event_id: &str,
        reported_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), LogPipelineError>> + Send;

    /// Returns every stored event, used by relocation.
    fn all_events(&self) -> impl Future<Output = Result<Vec<Event>, LogPipelineError>> + Send;

    /// Replaces the country fields of one event.
    fn update_location(
        &self,
        event_id: &str,
        country: &Country,
    ) -> impl Future<Output = Result<(), LogPipelineError>> + Send;

    /// Looks up the resume position for `(node_name, sensor_name)`.
    fn sensor_state(
        &self,
        node_name: &str,
        sensor_name: &str,
    ) -> impl Future<Output = Result<Option<SensorState>, LogPipelineError>> + Send;

    /// Creates a resume position row.
    fn create_sensor_state(
        &self,
        state: &SensorState,
    ) -> impl Future<Output = Result<(), LogPipelineError>> + Send;

    /// Updates the position of an existing row.
    fn update_sensor_state(
        &self,
        state: &SensorState,
    ) -> impl Future<Output = Result<(), LogPipelineError>> + Send;
}

/// In-memory store with failure injection for unit tests.
#[cfg(test)]
#[derive(Default)]
pub struct MockEventStore {
    /// Stored events in insertion order.
    pub events: std::sync::Mutex<Vec<Event>>,
    /// Stored resume positions.
    pub states: std::sync::Mutex<Vec<SensorState>>,
    /// Addresses whose insert fails.
    pub failing_addresses: Vec<String>,
    /// Number of create_sensor_state calls.
    pub state_creates: std::sync::atomic::AtomicUsize,
    /// Number of update_sensor_state calls.
    pub state_updates: std::sync::atomic::AtomicUsize,
    /// Number of insert_event calls, counted before the delay.
    pub inserts: std::sync::atomic::AtomicUsize,
    /// Artificial latency for every insert.
    pub insert_delay: Option<std::time::Duration>,
}

#[cfg(test)]
impl MockEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes inserts for `address` fail.
    pub fn failing_for(mut self, address: &str) -> Self {
        self.failing_addresses.push(address.to_owned());
        self
    }

    /// Makes every insert sleep for `delay` first.
    pub fn with_insert_delay(mut self, delay: std::time::Duration) -> Self {
        self.insert_delay = Some(delay);
        self
    }

    /// Seeds a resume position.
    pub fn with_state(self, state: SensorState) -> Self {
        if let Ok(mut states) = self.states.lock() {
            states.push(state);
        }
        self
    }

    pub fn stored_events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn insert_calls(&self) -> usize {
        self.inserts.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.state_creates
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.state_updates
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
fn poisoned() -> LogPipelineError {
    LogPipelineError::Storage("mock store mutex poisoned".to_owned())
}

#[cfg(test)]
impl EventStore for MockEventStore {
    async fn migrate(&self) -> Result<(), LogPipelineError> {
        Ok(())
    }

    async fn insert_event(&self, event: &Event) -> Result<(), LogPipelineError> {
        self.inserts
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_addresses.contains(&event.address) {
            return Err(LogPipelineError::Storage(format!(
                "mock insert failure for {}",
                event.address
            )));
        }
        self.events.lock().map_err(|_| poisoned())?.push(event.clone());
        Ok(())
    }

    async fn unreported_events(&self) -> Result<Vec<Event>, LogPipelineError> {
        Ok(self
            .events
            .lock()
            .map_err(|_| poisoned())?
            .iter()
            .filter(|e| e.reported_at.is_none())
            .cloned()
            .collect())
    }

    async fn mark_reported(
        &self,
        event_id: &str,
        reported_at: DateTime<Utc>,
    ) -> Result<(), LogPipelineError> {
        let mut events = self.events.lock().map_err(|_| poisoned())?;
        if let Some(event) = events.iter_mut().find(|e| e.id == event_id) {
            event.reported_at = Some(reported_at);
        }
        Ok(())
    }

    async fn all_events(&self) -> Result<Vec<Event>, LogPipelineError> {
        Ok(self.stored_events())
    }

    async fn update_location(
        &self,
        event_id: &str,
        country: &Country,
    ) -> Result<(), LogPipelineError> {
        let mut events = self.events.lock().map_err(|_| poisoned())?;
        if let Some(event) = events.iter_mut().find(|e| e.id == event_id) {
            event.country_code = country.code.clone();
            event.country_name = country.name.clone();
        }
        Ok(())
    }

    async fn sensor_state(
        &self,
        node_name: &str,
        sensor_name: &str,
    ) -> Result<Option<SensorState>, LogPipelineError> {
        Ok(self
            .states
            .lock()
            .map_err(|_| poisoned())?
            .iter()
            .find(|s| s.node_name == node_name && s.sensor_name == sensor_name)
            .cloned())
    }

    async fn create_sensor_state(&self, state: &SensorState) -> Result<(), LogPipelineError> {
        self.state_creates
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.states.lock().map_err(|_| poisoned())?.push(state.clone());
        Ok(())
    }

    async fn update_sensor_state(&self, state: &SensorState) -> Result<(), LogPipelineError> {
        self.state_updates
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut states = self.states.lock().map_err(|_| poisoned())?;
        if let Some(existing) = states
            .iter_mut()
            .find(|s| s.node_name == state.node_name && s.sensor_name == state.sensor_name)
        {
            existing.last_position = state.last_position;
        }
        Ok(())
    }
}
