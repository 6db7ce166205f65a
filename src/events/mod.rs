//! Per-task progress broadcasting.
//!
//! Each running task gets its own broadcast channel pair: one for
//! fine-grained `AgentEvent` progress, one for stage and pipeline
//! completion payloads. Delivery is at-most-once with no replay; a
//! subscriber that joins late or lags past the channel capacity misses
//! events rather than stalling the publisher. Publishing to a task with
//! no subscribers is not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::pipeline::types::{RunStatus, StageResult};

/// Default broadcast channel capacity per task.
const DEFAULT_CAPACITY: usize = 64;

/// A progress event emitted during a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Task the event belongs to.
    pub task_id: Uuid,
    /// Which agent emitted it ("pipeline" for run-level events).
    pub agent_id: String,
    /// Step marker: "start", "complete", or "error".
    pub step: String,
    /// Human-readable progress message.
    pub message: String,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Optional reference to produced output (e.g., a stage name).
    pub output_ref: Option<String>,
}

impl AgentEvent {
    /// Create a new event stamped with the current time.
    pub fn new(
        task_id: Uuid,
        agent_id: impl Into<String>,
        step: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            agent_id: agent_id.into(),
            step: step.into(),
            message: message.into(),
            timestamp: Utc::now(),
            output_ref: None,
        }
    }

    /// Attach an output reference.
    pub fn with_output_ref(mut self, output_ref: impl Into<String>) -> Self {
        self.output_ref = Some(output_ref.into());
        self
    }
}

/// Terminal payloads delivered on the completion channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CompletionEvent {
    /// A single stage reached a terminal status.
    Stage {
        task_id: Uuid,
        agent_id: String,
        result: StageResult,
    },
    /// The whole run reached a terminal status.
    Pipeline {
        task_id: Uuid,
        status: RunStatus,
        results: Vec<StageResult>,
    },
}

struct TaskChannels {
    events: broadcast::Sender<AgentEvent>,
    completions: broadcast::Sender<CompletionEvent>,
}

/// Keyed fan-out of task progress to live subscribers.
pub struct EventBroadcaster {
    channels: Mutex<HashMap<Uuid, TaskChannels>>,
    capacity: usize,
}

impl EventBroadcaster {
    /// Create a broadcaster with per-task channel capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Return the configured per-task channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks with live channels.
    pub fn active_tasks(&self) -> usize {
        self.channels
            .lock()
            .expect("event channel map poisoned")
            .len()
    }

    /// Subscribe to progress events for a task.
    ///
    /// Creates the task's channels on first use, so subscribing before the
    /// run starts guarantees no events are missed.
    pub fn subscribe(&self, task_id: Uuid) -> broadcast::Receiver<AgentEvent> {
        let mut channels = self.channels.lock().expect("event channel map poisoned");
        self.entry(&mut channels, task_id).events.subscribe()
    }

    /// Subscribe to stage and pipeline completion payloads for a task.
    pub fn subscribe_completions(&self, task_id: Uuid) -> broadcast::Receiver<CompletionEvent> {
        let mut channels = self.channels.lock().expect("event channel map poisoned");
        self.entry(&mut channels, task_id).completions.subscribe()
    }

    /// Publish a progress event to the task's subscribers.
    ///
    /// A task with no channel or no receivers is not an error; the event
    /// is simply dropped.
    pub fn publish(&self, event: AgentEvent) {
        let channels = self.channels.lock().expect("event channel map poisoned");
        if let Some(task) = channels.get(&event.task_id) {
            // Ignore "no receiver" as a non-error.
            let _ = task.events.send(event);
        }
    }

    /// Publish a completion payload to the task's subscribers.
    pub fn publish_completion(&self, event: CompletionEvent) {
        let task_id = match &event {
            CompletionEvent::Stage { task_id, .. } => *task_id,
            CompletionEvent::Pipeline { task_id, .. } => *task_id,
        };

        let channels = self.channels.lock().expect("event channel map poisoned");
        if let Some(task) = channels.get(&task_id) {
            let _ = task.completions.send(event);
        }
    }

    /// Drop the task's channels, disconnecting any remaining subscribers.
    pub fn unsubscribe(&self, task_id: Uuid) {
        self.channels
            .lock()
            .expect("event channel map poisoned")
            .remove(&task_id);
    }

    fn entry<'a>(
        &self,
        channels: &'a mut HashMap<Uuid, TaskChannels>,
        task_id: Uuid,
    ) -> &'a TaskChannels {
        channels.entry(task_id).or_insert_with(|| {
            let (events, _) = broadcast::channel(self.capacity);
            let (completions, _) = broadcast::channel(self.capacity);
            TaskChannels { events, completions }
        })
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
