use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::workflow::{StepId, WorkflowId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Submission,
    Decision,
    Delegation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub workflow_id: Option<WorkflowId>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        workflow_id: Option<WorkflowId>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { workflow_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub workflow_id: Option<WorkflowId>,
    pub step_id: Option<StepId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        context: &AuditContext,
        event_type: impl Into<String>,
        category: AuditCategory,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            workflow_id: context.workflow_id.clone(),
            step_id: None,
            correlation_id: context.correlation_id.clone(),
            event_type: event_type.into(),
            category,
            actor: context.actor.clone(),
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn for_step(mut self, step_id: StepId) -> Self {
        self.step_id = Some(step_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Notification collaborator. Emission is fire-and-forget: sinks must not
/// fail the operation that produced the event.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Forwards every event to the `tracing` subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        tracing::info!(
            event_name = %event.event_type,
            correlation_id = %event.correlation_id,
            workflow_id = event.workflow_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown"),
            step_id = event.step_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
            actor = %event.actor,
            metadata = %metadata,
            "workflow notification"
        );
    }
}

/// Holds events until the caller confirms the operation that produced them
/// was stored, then forwards them to `inner`. Events still buffered when the
/// operation fails are dropped with [`BufferedAuditSink::discard`].
pub struct BufferedAuditSink<S> {
    inner: S,
    pending: Mutex<Vec<AuditEvent>>,
}

impl<S> BufferedAuditSink<S>
where
    S: AuditSink,
{
    pub fn new(inner: S) -> Self {
        Self { inner, pending: Mutex::new(Vec::new()) }
    }

    pub fn pending(&self) -> usize {
        self.lock_pending().len()
    }

    /// Forwards every buffered event in emission order. Returns how many
    /// were delivered.
    pub fn flush(&self) -> usize {
        let events = std::mem::take(&mut *self.lock_pending());
        let delivered = events.len();
        for event in events {
            self.inner.emit(event);
        }
        delivered
    }

    /// Drops every buffered event. Returns how many were dropped.
    pub fn discard(&self) -> usize {
        std::mem::take(&mut *self.lock_pending()).len()
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<AuditEvent>> {
        match self.pending.lock() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<S> AuditSink for BufferedAuditSink<S>
where
    S: AuditSink,
{
    fn emit(&self, event: AuditEvent) {
        self.lock_pending().push(event);
    }
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn emit(&self, event: AuditEvent) {
        (**self).emit(event);
    }
}
