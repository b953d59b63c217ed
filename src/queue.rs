// Offline operation queue
// Mutations recorded while offline, persisted through the key-value store and
// replayed strictly in enqueue order once connectivity returns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{QueueExhaustedError, StorageError, TransportError};
use crate::model::{CreateReservation, ReservationPatch};
use crate::storage::KeyValueStore;

const PENDING_KEY: &str = "offline_queue:pending";
const DEAD_KEY: &str = "offline_queue:dead";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
    Cancel,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayload {
    // Local id handed to the caller until the server assigns the real one
    pub provisional_id: String,
    pub reservation: CreateReservation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    pub reservation_id: String,
    pub patch: ReservationPatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPayload {
    pub reservation_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    Create(CreatePayload),
    Update(UpdatePayload),
    Cancel(CancelPayload),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Create(_) => OperationKind::Create,
            Operation::Update(_) => OperationKind::Update,
            Operation::Cancel(_) => OperationKind::Cancel,
        }
    }

    // Target reservation; the provisional id for creates
    pub fn reservation_id(&self) -> &str {
        match self {
            Operation::Create(p) => &p.provisional_id,
            Operation::Update(p) => &p.reservation_id,
            Operation::Cancel(p) => &p.reservation_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: Uuid,
    pub operation: Operation,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl QueuedOperation {
    pub fn new(operation: Operation) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }
}

// Applies one queued operation against the server
#[async_trait]
pub trait ReplayHandler: Send + Sync {
    async fn replay(&self, operation: &QueuedOperation) -> Result<(), TransportError>;
}

#[derive(Debug, Default)]
pub struct DrainReport {
    // Successfully replayed, in replay order
    pub replayed: Vec<QueuedOperation>,
    // Moved to the dead-letter list during this drain
    pub dead: Vec<QueueExhaustedError>,
    // Error that stopped the drain with operations still pending
    pub blocked_by: Option<TransportError>,
    pub remaining: usize,
}

impl DrainReport {
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueuedOperation>,
    dead: Vec<QueuedOperation>,
}

pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    max_retries: u32,
    state: Mutex<QueueState>,
    // Serializes drains so two replays never interleave
    drain_lock: Mutex<()>,
}

impl OfflineQueue {
    // Restores whatever a previous process left behind
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        config: &QueueConfig,
    ) -> Result<Self, StorageError> {
        let pending: VecDeque<QueuedOperation> = match store.get(PENDING_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => VecDeque::new(),
        };
        let dead: Vec<QueuedOperation> = match store.get(DEAD_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        if !pending.is_empty() {
            info!(pending = pending.len(), dead = dead.len(), "restored offline queue");
        }

        Ok(Self {
            store,
            max_retries: config.max_retries,
            state: Mutex::new(QueueState { pending, dead }),
            drain_lock: Mutex::new(()),
        })
    }

    async fn persist_pending(&self, state: &QueueState) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&state.pending)?;
        self.store.set(PENDING_KEY, raw).await
    }

    async fn persist_dead(&self, state: &QueueState) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&state.dead)?;
        self.store.set(DEAD_KEY, raw).await
    }

    // Appends the operation and persists the queue; nothing is kept in memory
    // if the write fails.
    pub async fn enqueue(&self, operation: Operation) -> Result<QueuedOperation, StorageError> {
        let queued = QueuedOperation::new(operation);
        let mut state = self.state.lock().await;
        state.pending.push_back(queued.clone());
        if let Err(e) = self.persist_pending(&state).await {
            state.pending.pop_back();
            return Err(e);
        }
        debug!(
            operation_id = %queued.id,
            kind = %queued.kind(),
            reservation_id = queued.operation.reservation_id(),
            depth = state.pending.len(),
            "operation queued"
        );
        Ok(queued)
    }

    // Replays pending operations one at a time in FIFO order. A failure below the
    // retry ceiling leaves the operation at the head and stops the drain; at the
    // ceiling the operation is dead-lettered and the drain moves on.
    pub async fn drain<H>(&self, handler: &H) -> Result<DrainReport, StorageError>
    where
        H: ReplayHandler + ?Sized,
    {
        let _drain = self.drain_lock.lock().await;
        let mut report = DrainReport::default();

        loop {
            let head = self.state.lock().await.pending.front().cloned();
            let Some(operation) = head else {
                break;
            };

            let result = handler.replay(&operation).await;

            let mut state = self.state.lock().await;
            match result {
                Ok(()) => {
                    state.pending.pop_front();
                    self.persist_pending(&state).await?;
                    debug!(operation_id = %operation.id, kind = %operation.kind(), "operation replayed");
                    report.replayed.push(operation);
                }
                Err(err) => {
                    let Some(entry) = state.pending.front_mut() else {
                        break;
                    };
                    entry.retry_count += 1;

                    if entry.retry_count >= self.max_retries {
                        let Some(dead) = state.pending.pop_front() else {
                            break;
                        };
                        warn!(
                            operation_id = %dead.id,
                            kind = %dead.kind(),
                            retries = dead.retry_count,
                            error = %err,
                            "operation exhausted retries, moved to dead letters"
                        );
                        // Dead list is written first; the operation stays on disk in at least one list
                        state.dead.push(dead.clone());
                        self.persist_dead(&state).await?;
                        self.persist_pending(&state).await?;
                        report.dead.push(QueueExhaustedError {
                            operation: dead,
                            last_error: err.to_string(),
                        });
                    } else {
                        warn!(
                            operation_id = %entry.id,
                            retries = entry.retry_count,
                            error = %err,
                            "replay failed, draining stopped"
                        );
                        self.persist_pending(&state).await?;
                        report.blocked_by = Some(err);
                        break;
                    }
                }
            }
        }

        report.remaining = self.state.lock().await.pending.len();
        info!(
            replayed = report.replayed.len(),
            dead = report.dead.len(),
            remaining = report.remaining,
            "offline queue drained"
        );
        Ok(report)
    }

    pub async fn pending(&self) -> Vec<QueuedOperation> {
        self.state.lock().await.pending.iter().cloned().collect()
    }

    pub async fn dead_letters(&self) -> Vec<QueuedOperation> {
        self.state.lock().await.dead.clone()
    }

    pub async fn clear_dead_letters(&self) -> Result<usize, StorageError> {
        let mut state = self.state.lock().await;
        let cleared = state.dead.len();
        state.dead.clear();
        self.store.remove(DEAD_KEY).await?;
        Ok(cleared)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
