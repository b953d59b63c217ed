// Reservation client facade
//
// Reads are cache-first. Writes go straight to the API while online and are
// queued for later replay while offline or while earlier queued work on the
// same reservation is still waiting. Server pushes from the realtime
// channel overwrite or invalidate cached entries as they arrive; there is no
// locking per reservation id, so whichever write lands last wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{
    detail_key, filter_hash, list_key, rates_key, CacheStatsReport, CacheStore, LIST_PREFIX,
};
use crate::config::{BookingPolicy, ClientConfig};
use crate::connectivity::{Connectivity, ConnectivityWatcher, Transition};
use crate::error::{
    ClientError, QueueExhaustedError, ReservationError, TransportError, ValidationError,
};
use crate::format;
use crate::model::{
    CancelReservation, CreateReservation, RateDetails, RateQuery, Reservation, ReservationFilters,
    ReservationPage, ReservationPatch,
};
use crate::queue::{
    CreatePayload, DrainReport, OfflineQueue, Operation, QueuedOperation, ReplayHandler,
    UpdatePayload,
};
use crate::realtime::{
    spawn_connector, ConnectionState, EventKind, RealtimeEvent, RealtimeHandle, RealtimeHub,
    Subscription, Topic,
};
use crate::storage::KeyValueStore;
use crate::transport::{ApiRequest, HttpTransport, Transport};
use crate::validation;

pub const PROVISIONAL_PREFIX: &str = "pending-";

const EVENT_CAPACITY: usize = 256;

pub fn is_provisional(reservation_id: &str) -> bool {
    reservation_id.starts_with(PROVISIONAL_PREFIX)
}

// Realtime namespace scoped to a single reservation
pub fn reservation_namespace(reservation_id: &str) -> String {
    format!("reservation:{}", reservation_id)
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Reservation(Reservation),
    List(ReservationPage),
    Rates(Vec<RateDetails>),
}

impl CachedValue {
    fn mentions(&self, reservation_id: &str) -> bool {
        match self {
            CachedValue::Reservation(r) => r.id == reservation_id,
            CachedValue::List(page) => page.contains(reservation_id),
            CachedValue::Rates(_) => false,
        }
    }
}

// A create accepted while offline. The id is local until the queue syncs it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReservation {
    pub provisional_id: String,
    pub payload: CreateReservation,
    pub operation_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(Reservation),
    Queued(PendingReservation),
}

impl CreateOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, CreateOutcome::Queued(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated(Reservation),
    Queued(QueuedOperation),
}

impl UpdateOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, UpdateOutcome::Queued(_))
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    ReservationChanged(Reservation),
    ReservationCancelled(String),
    Synced {
        provisional_id: String,
        reservation: Reservation,
    },
    OperationDead(QueueExhaustedError),
    ConnectivityChanged(Transition),
}

// Last realtime change applied per reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Updated(DateTime<Utc>),
    Cancelled,
}

struct Inner {
    me: Weak<Inner>,
    transport: Arc<dyn Transport>,
    cache: CacheStore<CachedValue>,
    queue: OfflineQueue,
    connectivity: Connectivity,
    hub: RealtimeHub,
    namespace: String,
    policy: BookingPolicy,
    events: broadcast::Sender<ClientEvent>,
    // provisional id -> server id, filled in as queued creates sync
    provisional: DashMap<String, String>,
    applied: DashMap<String, Applied>,
    watches: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Inner {
    fn emit(&self, event: ClientEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn resolve(&self, reservation_id: &str) -> String {
        self.provisional
            .get(reservation_id)
            .map(|id| id.value().clone())
            .unwrap_or_else(|| reservation_id.to_string())
    }

    async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, TransportError> {
        self.transport.send(request).await?.json()
    }

    fn store_reservation(&self, reservation: &Reservation) {
        self.cache.put(
            detail_key(&reservation.id),
            CachedValue::Reservation(reservation.clone()),
        );
        self.invalidate_lists_with(&reservation.id);
    }

    fn invalidate_lists_with(&self, reservation_id: &str) -> usize {
        self.cache.invalidate_where(|key, value| {
            key.starts_with(LIST_PREFIX) && value.mentions(reservation_id)
        })
    }

    // Drops everything cached about the reservation and stops watching it
    fn forget(&self, reservation_id: &str) {
        self.cache.invalidate(&detail_key(reservation_id));
        let lists = self.invalidate_lists_with(reservation_id);
        debug!(reservation_id, lists, "reservation evicted from cache");
        self.unwatch(reservation_id);
    }

    fn watch(&self, reservation_id: &str) {
        let mut watches = self.watches.lock();
        if watches.contains_key(reservation_id) {
            return;
        }
        let namespace = reservation_namespace(reservation_id);
        let subscription = self.hub.subscribe_many([
            Topic::new(namespace.clone(), EventKind::ReservationUpdated),
            Topic::new(namespace, EventKind::ReservationCancelled),
        ]);
        let task = tokio::spawn(forward_events(self.me.clone(), subscription));
        watches.insert(reservation_id.to_string(), task);
    }

    fn unwatch(&self, reservation_id: &str) {
        let task = self.watches.lock().remove(reservation_id);
        if let Some(task) = task {
            task.abort();
        }
    }

    // False when the same change already arrived on another namespace
    fn first_delivery(&self, reservation_id: &str, change: Applied) -> bool {
        match self.applied.entry(reservation_id.to_string()) {
            Entry::Occupied(mut last) => {
                if *last.get() == change {
                    return false;
                }
                last.insert(change);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(change);
                true
            }
        }
    }

    fn apply_realtime(&self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::ReservationUpdated(reservation) => {
                if let Err(e) = reservation.validate() {
                    warn!(reservation_id = %reservation.id, error = %e, "ignoring invalid pushed reservation");
                    return;
                }
                if !self.first_delivery(&reservation.id, Applied::Updated(reservation.updated_at)) {
                    debug!(reservation_id = %reservation.id, "duplicate push skipped");
                    return;
                }
                debug!(reservation_id = %reservation.id, "applying pushed update");
                self.store_reservation(&reservation);
                self.emit(ClientEvent::ReservationChanged(reservation));
            }
            RealtimeEvent::ReservationCancelled(reservation_id) => {
                if !self.first_delivery(&reservation_id, Applied::Cancelled) {
                    debug!(%reservation_id, "duplicate cancellation skipped");
                    return;
                }
                debug!(%reservation_id, "applying pushed cancellation");
                self.forget(&reservation_id);
                self.emit(ClientEvent::ReservationCancelled(reservation_id));
            }
        }
    }

    async fn post_create(&self, payload: &CreateReservation) -> Result<Reservation, TransportError> {
        let request = ApiRequest::post("/reservations", payload)?;
        let reservation: Reservation = self.call(request).await?;
        self.cache.put(
            detail_key(&reservation.id),
            CachedValue::Reservation(reservation.clone()),
        );
        // A new reservation may belong to any cached listing
        self.cache.invalidate_prefix(LIST_PREFIX);
        self.watch(&reservation.id);
        Ok(reservation)
    }

    async fn put_update(
        &self,
        reservation_id: &str,
        patch: &ReservationPatch,
    ) -> Result<Reservation, TransportError> {
        let request = ApiRequest::put(format!("/reservations/{}", reservation_id), patch)?;
        let reservation: Reservation = self.call(request).await?;
        self.store_reservation(&reservation);
        Ok(reservation)
    }

    async fn post_cancel(
        &self,
        reservation_id: &str,
        reason: &str,
    ) -> Result<Reservation, TransportError> {
        let body = CancelReservation {
            reason: reason.to_string(),
        };
        let request =
            ApiRequest::post(format!("/reservations/cancellations/{}", reservation_id), &body)?;
        let reservation: Reservation = self.call(request).await?;
        self.forget(reservation_id);
        Ok(reservation)
    }

    // Whether a queued operation still targets the reservation
    async fn has_queued(&self, reservation_id: &str) -> bool {
        self.queue
            .pending()
            .await
            .iter()
            .any(|queued| self.resolve(queued.operation.reservation_id()) == reservation_id)
    }

    fn spawn_drain(&self) {
        let me = self.me.clone();
        tokio::spawn(async move {
            if let Some(inner) = me.upgrade() {
                replay_pending(&inner).await;
            }
        });
    }

    async fn drain(&self) -> Result<DrainReport, ReservationError> {
        if !self.connectivity.is_online() {
            let remaining = self.queue.len().await;
            debug!(remaining, "offline, skipping queue drain");
            return Ok(DrainReport {
                remaining,
                ..DrainReport::default()
            });
        }

        let report = self.queue.drain(self).await?;
        for dead in &report.dead {
            self.emit(ClientEvent::OperationDead(dead.clone()));
        }
        Ok(report)
    }
}

#[async_trait]
impl ReplayHandler for Inner {
    async fn replay(&self, queued: &QueuedOperation) -> Result<(), TransportError> {
        match &queued.operation {
            Operation::Create(payload) => {
                let reservation = self.post_create(&payload.reservation).await?;
                self.provisional
                    .insert(payload.provisional_id.clone(), reservation.id.clone());
                info!(
                    provisional_id = %payload.provisional_id,
                    reservation_id = %reservation.id,
                    "queued reservation synced"
                );
                self.emit(ClientEvent::Synced {
                    provisional_id: payload.provisional_id.clone(),
                    reservation,
                });
            }
            Operation::Update(payload) => {
                let reservation_id = self.resolve(&payload.reservation_id);
                let reservation = self.put_update(&reservation_id, &payload.patch).await?;
                self.emit(ClientEvent::ReservationChanged(reservation));
            }
            Operation::Cancel(payload) => {
                let reservation_id = self.resolve(&payload.reservation_id);
                self.post_cancel(&reservation_id, &payload.reason).await?;
                self.emit(ClientEvent::ReservationCancelled(reservation_id));
            }
        }
        Ok(())
    }
}

async fn forward_events(inner: Weak<Inner>, mut subscription: Subscription) {
    while let Some(event) = subscription.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.apply_realtime(event);
    }
}

async fn follow_connectivity(inner: Weak<Inner>, mut watcher: ConnectivityWatcher) {
    while let Some(transition) = watcher.next_transition().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.emit(ClientEvent::ConnectivityChanged(transition));
        if transition == Transition::WentOnline {
            replay_pending(&inner).await;
        }
    }
}

async fn replay_pending(inner: &Inner) {
    match inner.drain().await {
        Ok(report) if !report.is_complete() => {
            warn!(remaining = report.remaining, "offline queue not fully drained")
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "offline queue drain failed"),
    }
}

fn not_found_or(reservation_id: &str, err: TransportError) -> ReservationError {
    match err.status() {
        Some(404) => ReservationError::NotFound(reservation_id.to_string()),
        _ => ReservationError::Transport(err),
    }
}

pub struct ReservationClient {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    connector: Mutex<Option<RealtimeHandle>>,
}

impl ReservationClient {
    // HTTP transport plus the WebSocket channel when a realtime URL is configured
    pub async fn connect(
        config: ClientConfig,
        store: Arc<dyn KeyValueStore>,
        connectivity: Connectivity,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(&config)?);
        let hub = RealtimeHub::new();
        let connector = spawn_connector(config.realtime_config.clone(), hub.clone());
        Self::assemble(config, transport, store, connectivity, hub, connector).await
    }

    // Caller-supplied transport; realtime events are fed through `realtime()`
    pub async fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        connectivity: Connectivity,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        Self::assemble(config, transport, store, connectivity, RealtimeHub::new(), None).await
    }

    async fn assemble(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        connectivity: Connectivity,
        hub: RealtimeHub,
        connector: Option<RealtimeHandle>,
    ) -> Result<Self, ClientError> {
        let queue = OfflineQueue::open(store, &config.queue_config).await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let namespace = config.realtime_config.namespace.clone();

        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            transport,
            cache: CacheStore::new(&config.cache_config),
            queue,
            connectivity: connectivity.clone(),
            hub,
            namespace,
            policy: config.booking_policy.clone(),
            events,
            provisional: DashMap::new(),
            applied: DashMap::new(),
            watches: Mutex::new(HashMap::new()),
        });

        let updates = inner.hub.subscribe_many([
            Topic::new(inner.namespace.clone(), EventKind::ReservationUpdated),
            Topic::new(inner.namespace.clone(), EventKind::ReservationCancelled),
        ]);
        let mut tasks = vec![tokio::spawn(forward_events(Arc::downgrade(&inner), updates))];
        tasks.push(tokio::spawn(follow_connectivity(
            Arc::downgrade(&inner),
            connectivity.watch(),
        )));

        // Operations left behind by a previous run
        if connectivity.is_online() && !inner.queue.is_empty().await {
            let weak = Arc::downgrade(&inner);
            tasks.push(tokio::spawn(async move {
                if let Some(inner) = weak.upgrade() {
                    replay_pending(&inner).await;
                }
            }));
        }

        info!(
            base_url = %config.base_url,
            online = connectivity.is_online(),
            realtime = connector.is_some(),
            "reservation client ready"
        );

        Ok(Self {
            inner,
            tasks: Mutex::new(tasks),
            connector: Mutex::new(connector),
        })
    }

    fn check_stay(&self, payload: &CreateReservation) -> Result<(), ValidationError> {
        let nights =
            format::nights_between(payload.check_in.date_naive(), payload.check_out.date_naive());
        let max = self.inner.policy.max_stay_nights;
        if nights > max as i64 {
            return Err(ValidationError::StayTooLong { nights, max });
        }
        Ok(())
    }

    fn check_amount(&self, amount: Option<f64>) -> Result<(), ValidationError> {
        match amount {
            Some(amount) => validation::validate_amount(
                amount,
                &self.inner.policy.currency,
                self.inner.policy.max_amount,
            ),
            None => Ok(()),
        }
    }

    pub async fn create(&self, payload: CreateReservation) -> Result<CreateOutcome, ReservationError> {
        validation::validate_create(&payload)?;
        self.check_stay(&payload)?;
        self.check_amount(payload.total_amount)?;

        if !self.inner.connectivity.is_online() {
            let provisional_id = format!("{}{}", PROVISIONAL_PREFIX, Uuid::new_v4());
            let queued = self
                .inner
                .queue
                .enqueue(Operation::Create(CreatePayload {
                    provisional_id: provisional_id.clone(),
                    reservation: payload.clone(),
                }))
                .await?;
            info!(%provisional_id, "offline, reservation create queued");
            return Ok(CreateOutcome::Queued(PendingReservation {
                provisional_id,
                payload,
                operation_id: queued.id,
            }));
        }

        let reservation = self.inner.post_create(&payload).await?;
        info!(reservation_id = %reservation.id, "reservation created");
        Ok(CreateOutcome::Created(reservation))
    }

    pub async fn read(&self, reservation_id: &str) -> Result<Reservation, ReservationError> {
        validation::validate_required("reservationId", reservation_id)?;
        let reservation_id = self.inner.resolve(reservation_id);
        if is_provisional(&reservation_id) {
            // Not on the server until the queue syncs it
            return Err(ReservationError::NotFound(reservation_id));
        }

        let key = detail_key(&reservation_id);
        if let Some(CachedValue::Reservation(reservation)) = self.inner.cache.get(&key) {
            return Ok(reservation);
        }

        let request = ApiRequest::get(format!("/reservations/{}", reservation_id));
        let reservation: Reservation = self
            .inner
            .call(request)
            .await
            .map_err(|e| not_found_or(&reservation_id, e))?;
        self.inner
            .cache
            .put(key, CachedValue::Reservation(reservation.clone()));
        Ok(reservation)
    }

    pub async fn list(&self, filters: &ReservationFilters) -> Result<ReservationPage, ReservationError> {
        let query = filters.to_query();
        let key = list_key(&filter_hash(&query));
        if let Some(CachedValue::List(page)) = self.inner.cache.get(&key) {
            return Ok(page);
        }

        let request = ApiRequest::get("/reservations").with_query(query);
        let page: ReservationPage = self.inner.call(request).await?;
        self.inner.cache.put(key, CachedValue::List(page.clone()));
        Ok(page)
    }

    pub async fn update(
        &self,
        reservation_id: &str,
        patch: ReservationPatch,
    ) -> Result<UpdateOutcome, ReservationError> {
        validation::validate_required("reservationId", reservation_id)?;
        if patch.is_empty() {
            return Err(ValidationError::RequiredField {
                field: "patch".to_string(),
            }
            .into());
        }
        let resolved = self.inner.resolve(reservation_id);
        let current = match self.inner.cache.peek(&detail_key(&resolved)) {
            Some(CachedValue::Reservation(reservation)) => Some(reservation),
            _ => None,
        };
        validation::validate_patch(&patch, current.as_ref())?;
        self.check_amount(patch.total_amount)?;

        let online = self.inner.connectivity.is_online();
        // Earlier queued operations on the same reservation (an unsynced create
        // included) must reach the server first
        if !online || is_provisional(&resolved) || self.inner.has_queued(&resolved).await {
            let queued = self
                .inner
                .queue
                .enqueue(Operation::Update(UpdatePayload {
                    reservation_id: resolved.clone(),
                    patch,
                }))
                .await?;
            info!(reservation_id = %resolved, online, "reservation update queued");
            if online {
                self.inner.spawn_drain();
            }
            return Ok(UpdateOutcome::Queued(queued));
        }

        let reservation = self
            .inner
            .put_update(&resolved, &patch)
            .await
            .map_err(|e| not_found_or(&resolved, e))?;
        Ok(UpdateOutcome::Updated(reservation))
    }

    // Never queued: cancellation needs the server's answer
    pub async fn cancel(&self, reservation_id: &str, reason: &str) -> Result<Reservation, ReservationError> {
        validation::validate_required("reservationId", reservation_id)?;
        validation::validate_required("reason", reason)?;
        let resolved = self.inner.resolve(reservation_id);

        let reservation = self
            .inner
            .post_cancel(&resolved, reason)
            .await
            .map_err(|e| not_found_or(&resolved, e))?;
        info!(reservation_id = %resolved, "reservation cancelled");
        Ok(reservation)
    }

    pub async fn rates(&self, query: &RateQuery) -> Result<Vec<RateDetails>, ReservationError> {
        validation::validate_required("roomId", &query.room_id)?;
        if query.end_date <= query.start_date {
            return Err(ValidationError::InvalidDateRange.into());
        }

        let params = query.to_query();
        let key = rates_key(&filter_hash(&params));
        if let Some(CachedValue::Rates(rates)) = self.inner.cache.get(&key) {
            return Ok(rates);
        }

        let request = ApiRequest::get("/reservations/rates").with_query(params);
        let rates: Vec<RateDetails> = self.inner.call(request).await?;
        self.inner.cache.put(key, CachedValue::Rates(rates.clone()));
        Ok(rates)
    }

    // Replays queued operations now; a no-op while offline. The first operation
    // dead-lettered by this drain is returned as an error.
    pub async fn sync(&self) -> Result<DrainReport, ReservationError> {
        let mut report = self.inner.drain().await?;
        if report.dead.is_empty() {
            return Ok(report);
        }
        Err(ReservationError::QueueExhausted(report.dead.remove(0)))
    }

    pub async fn pending_operations(&self) -> Vec<QueuedOperation> {
        self.inner.queue.pending().await
    }

    pub async fn dead_letters(&self) -> Vec<QueuedOperation> {
        self.inner.queue.dead_letters().await
    }

    pub async fn clear_dead_letters(&self) -> Result<usize, ReservationError> {
        Ok(self.inner.queue.clear_dead_letters().await?)
    }

    // Server id for a synced provisional id
    pub fn resolve_id(&self, provisional_id: &str) -> Option<String> {
        self.inner
            .provisional
            .get(provisional_id)
            .map(|id| id.value().clone())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    // Raw realtime events of one kind in the client's namespace
    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        self.inner
            .hub
            .subscribe(Topic::new(self.inner.namespace.clone(), kind))
    }

    pub fn realtime(&self) -> &RealtimeHub {
        &self.inner.hub
    }

    pub fn realtime_state(&self) -> Option<ConnectionState> {
        self.connector.lock().as_ref().map(RealtimeHandle::state)
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    pub fn cached_reservation(&self, reservation_id: &str) -> Option<Reservation> {
        match self.inner.cache.peek(&detail_key(reservation_id)) {
            Some(CachedValue::Reservation(reservation)) => Some(reservation),
            _ => None,
        }
    }

    pub fn cache_stats(&self) -> CacheStatsReport {
        self.inner.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    // Stops background work and releases every realtime subscription
    pub async fn shutdown(&self) {
        let mut handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        handles.extend(self.inner.watches.lock().drain().map(|(_, task)| task));
        for task in &handles {
            task.abort();
        }
        for task in handles {
            let _ = task.await;
        }

        let connector = self.connector.lock().take();
        if let Some(connector) = connector {
            connector.shutdown().await;
        }
        info!("reservation client shut down");
    }
}

impl Drop for ReservationClient {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for (_, task) in self.inner.watches.lock().drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReservationStatus;
    use crate::queue::OperationKind;
    use crate::storage::MemoryStore;
    use crate::transport::mock_server::{sample_reservation, MockServer};
    use crate::transport::Method;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::time::Duration;
    use tokio::sync::broadcast::error::RecvError;

    fn new_payload() -> CreateReservation {
        CreateReservation {
            guest_id: "guest-1".to_string(),
            room_id: "room-101".to_string(),
            check_in: Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap(),
            check_out: Utc.with_ymd_and_hms(2024, 6, 3, 11, 0, 0).unwrap(),
            occupants: 2,
            special_requests: Some(vec!["late arrival".to_string()]),
            total_amount: Some(300.0),
        }
    }

    async fn client_with(server: &Arc<MockServer>, online: bool) -> (ReservationClient, Connectivity) {
        let connectivity = Connectivity::new(online);
        let client = ReservationClient::with_transport(
            ClientConfig::default(),
            server.clone(),
            Arc::new(MemoryStore::new()),
            connectivity.clone(),
        )
        .await
        .unwrap();
        (client, connectivity)
    }

    async fn next_matching<F>(events: &mut broadcast::Receiver<ClientEvent>, matches: F) -> ClientEvent
    where
        F: Fn(&ClientEvent) -> bool,
    {
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) if matches(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("event stream closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("expected client event")
    }

    // Waits for the head of the queue to have failed `retries` times
    async fn wait_for_head_retries(client: &ReservationClient, retries: u32) {
        for _ in 0..500 {
            let pending = client.pending_operations().await;
            if pending.first().map(|op| op.retry_count) == Some(retries) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue head never reached {} retries", retries);
    }

    #[tokio::test]
    async fn test_online_create_caches_and_skips_queue() {
        let server = Arc::new(MockServer::new());
        let (client, _connectivity) = client_with(&server, true).await;

        let outcome = client.create(new_payload()).await.unwrap();
        let CreateOutcome::Created(reservation) = outcome else {
            panic!("expected a created reservation, got {:?}", outcome);
        };
        assert_eq!(reservation.id, "res-1");
        assert_eq!(reservation.status, ReservationStatus::Pending);

        assert!(client.pending_operations().await.is_empty());
        assert_eq!(server.request_count(), 1);
        assert_eq!(client.cached_reservation("res-1"), Some(reservation));

        let topic = Topic::new(reservation_namespace("res-1"), EventKind::ReservationUpdated);
        assert_eq!(client.realtime().subscriber_count(&topic), 1);
    }

    #[tokio::test]
    async fn test_offline_create_enqueues_exactly_one_operation() {
        let server = Arc::new(MockServer::new());
        let (client, _connectivity) = client_with(&server, false).await;

        let outcome = client.create(new_payload()).await.unwrap();
        assert!(outcome.is_queued());
        let CreateOutcome::Queued(pending) = outcome else {
            unreachable!()
        };
        assert!(pending.provisional_id.starts_with(PROVISIONAL_PREFIX));
        assert_eq!(pending.payload, new_payload());

        let queued = client.pending_operations().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, pending.operation_id);
        assert_eq!(queued[0].kind(), OperationKind::Create);
        assert_eq!(server.request_count(), 0);

        let err = client.read(&pending.provisional_id).await.unwrap_err();
        assert!(matches!(err, ReservationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_validation_failure_touches_nothing() {
        let server = Arc::new(MockServer::new());
        for online in [true, false] {
            let (client, _connectivity) = client_with(&server, online).await;

            let mut payload = new_payload();
            payload.guest_id = "  ".to_string();
            let err = client.create(payload).await.unwrap_err();
            assert!(matches!(
                err,
                ReservationError::Validation(ValidationError::RequiredField { .. })
            ));

            let mut payload = new_payload();
            payload.check_out = payload.check_in;
            let err = client.create(payload).await.unwrap_err();
            assert!(matches!(
                err,
                ReservationError::Validation(ValidationError::InvalidDateRange)
            ));

            let mut payload = new_payload();
            payload.total_amount = Some(1_000_000.001);
            let err = client.create(payload).await.unwrap_err();
            let ReservationError::Validation(validation) = err else {
                panic!("expected validation error");
            };
            assert_eq!(validation.code(), "AMOUNT_OUT_OF_RANGE");

            assert!(client.pending_operations().await.is_empty());
            assert_eq!(client.cache_stats().items_count, 0);
        }
        assert_eq!(server.request_count(), 0);
    }

    #[tokio::test]
    async fn test_stay_longer_than_policy_is_rejected() {
        let server = Arc::new(MockServer::new());
        let (client, _connectivity) = client_with(&server, true).await;

        let mut payload = new_payload();
        payload.check_out = Utc.with_ymd_and_hms(2024, 7, 15, 11, 0, 0).unwrap();
        let err = client.create(payload).await.unwrap_err();
        assert!(matches!(
            err,
            ReservationError::Validation(ValidationError::StayTooLong { nights: 44, max: 30 })
        ));
    }

    #[tokio::test]
    async fn test_read_is_cache_first() {
        let server = Arc::new(MockServer::new());
        server.insert(sample_reservation("res-1"));
        let (client, _connectivity) = client_with(&server, true).await;

        let first = client.read("res-1").await.unwrap();
        let second = client.read("res-1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(server.request_count(), 1);

        let stats = client.cache_stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_refetches_after_ttl() {
        let server = Arc::new(MockServer::new());
        server.insert(sample_reservation("res-1"));
        let (client, _connectivity) = client_with(&server, true).await;

        client.read("res-1").await.unwrap();
        tokio::time::advance(Duration::from_secs(15 * 60)).await;
        client.read("res-1").await.unwrap();
        assert_eq!(server.request_count(), 2);
    }

    #[tokio::test]
    async fn test_read_missing_reservation() {
        let server = Arc::new(MockServer::new());
        let (client, _connectivity) = client_with(&server, true).await;

        let err = client.read("res-404").await.unwrap_err();
        assert!(matches!(err, ReservationError::NotFound(id) if id == "res-404"));
        assert!(client.cached_reservation("res-404").is_none());
    }

    #[tokio::test]
    async fn test_transport_errors_are_surfaced() {
        let server = Arc::new(MockServer::new());
        server.insert(sample_reservation("res-1"));
        server.set_outage(true);
        let (client, _connectivity) = client_with(&server, true).await;

        let err = client.read("res-1").await.unwrap_err();
        assert!(matches!(
            err,
            ReservationError::Transport(TransportError::Network(_))
        ));

        let err = client.create(new_payload()).await.unwrap_err();
        assert!(matches!(err, ReservationError::Transport(_)));
        assert!(client.pending_operations().await.is_empty(), "online failures are not queued");
    }

    #[tokio::test]
    async fn test_list_is_cached_by_filters() {
        let server = Arc::new(MockServer::new());
        server.insert(sample_reservation("res-1"));
        let mut other = sample_reservation("res-2");
        other.room_id = "room-202".to_string();
        server.insert(other);
        let (client, _connectivity) = client_with(&server, true).await;

        let filters = ReservationFilters {
            room_id: Some("room-101".to_string()),
            status: Some(ReservationStatus::Confirmed),
            ..Default::default()
        };
        let page = client.list(&filters).await.unwrap();
        assert_eq!(page.total, 1);
        assert!(page.contains("res-1"));

        client.list(&filters.clone()).await.unwrap();
        assert_eq!(server.request_count(), 1);

        let all = client.list(&ReservationFilters::default()).await.unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(server.request_count(), 2);
    }

    #[tokio::test]
    async fn test_cancel_invalidates_detail_and_lists() {
        let server = Arc::new(MockServer::new());
        server.insert(sample_reservation("res-1"));
        let mut other = sample_reservation("res-2");
        other.room_id = "room-202".to_string();
        server.insert(other);
        let (client, _connectivity) = client_with(&server, true).await;

        client.read("res-1").await.unwrap();
        client.list(&ReservationFilters::default()).await.unwrap();
        let unrelated = ReservationFilters {
            room_id: Some("room-202".to_string()),
            ..Default::default()
        };
        client.list(&unrelated).await.unwrap();
        assert_eq!(server.request_count(), 3);

        let cancelled = client.cancel("res-1", "guest request").await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("guest request"));
        assert!(client.cached_reservation("res-1").is_none());

        // detail and the list holding res-1 refetch; the room-202 list stays cached
        client.read("res-1").await.unwrap();
        client.list(&ReservationFilters::default()).await.unwrap();
        client.list(&unrelated).await.unwrap();
        assert_eq!(server.request_count(), 6);
        assert_eq!(
            server.requests()[4],
            (Method::Get, "/reservations/res-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_cancel_is_never_queued() {
        let server = Arc::new(MockServer::new());
        server.set_outage(true);
        let (client, _connectivity) = client_with(&server, false).await;

        let err = client.cancel("res-1", "guest request").await.unwrap_err();
        assert!(matches!(err, ReservationError::Transport(_)));
        assert!(client.pending_operations().await.is_empty());
        assert_eq!(server.request_count(), 1, "cancel always goes to the network");
    }

    #[tokio::test]
    async fn test_cancel_conflict_is_a_transport_error() {
        let server = Arc::new(MockServer::new());
        let mut done = sample_reservation("res-1");
        done.status = ReservationStatus::CheckedOut;
        server.insert(done);
        let (client, _connectivity) = client_with(&server, true).await;

        let err = client.cancel("res-1", "too late").await.unwrap_err();
        let ReservationError::Transport(transport) = err else {
            panic!("expected transport error");
        };
        assert_eq!(transport.status(), Some(409));
    }

    #[tokio::test]
    async fn test_update_online_overwrites_detail() {
        let server = Arc::new(MockServer::new());
        server.insert(sample_reservation("res-1"));
        let (client, _connectivity) = client_with(&server, true).await;
        client.read("res-1").await.unwrap();

        let patch = ReservationPatch {
            occupants: Some(3),
            ..Default::default()
        };
        let outcome = client.update("res-1", patch).await.unwrap();
        let UpdateOutcome::Updated(updated) = outcome else {
            panic!("expected an applied update");
        };
        assert_eq!(updated.occupants, 3);
        assert_eq!(client.cached_reservation("res-1").unwrap().occupants, 3);
        assert!(client.pending_operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_backwards_status_against_cached_record() {
        let server = Arc::new(MockServer::new());
        server.insert(sample_reservation("res-1"));
        let (client, _connectivity) = client_with(&server, true).await;
        client.read("res-1").await.unwrap();

        let patch = ReservationPatch {
            status: Some(ReservationStatus::Pending),
            ..Default::default()
        };
        let err = client.update("res-1", patch).await.unwrap_err();
        assert!(matches!(
            err,
            ReservationError::Validation(ValidationError::InvalidStatusTransition { .. })
        ));
        assert_eq!(server.request_count(), 1);

        let err = client
            .update("res-1", ReservationPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_offline_is_queued() {
        let server = Arc::new(MockServer::new());
        let (client, _connectivity) = client_with(&server, false).await;

        let patch = ReservationPatch {
            occupants: Some(3),
            ..Default::default()
        };
        let outcome = client.update("res-1", patch.clone()).await.unwrap();
        let UpdateOutcome::Queued(queued) = outcome else {
            panic!("expected a queued update");
        };
        assert_eq!(
            queued.operation,
            Operation::Update(UpdatePayload {
                reservation_id: "res-1".to_string(),
                patch,
            })
        );
        assert_eq!(server.request_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_drains_queue_in_order() {
        let server = Arc::new(MockServer::new());
        let (client, connectivity) = client_with(&server, false).await;
        let mut events = client.subscribe_events();

        let CreateOutcome::Queued(pending) = client.create(new_payload()).await.unwrap() else {
            panic!("expected a queued create");
        };
        let patch = ReservationPatch {
            occupants: Some(3),
            ..Default::default()
        };
        assert!(client
            .update(&pending.provisional_id, patch)
            .await
            .unwrap()
            .is_queued());
        assert_eq!(client.pending_operations().await.len(), 2);

        connectivity.set_online(true);

        let synced = next_matching(&mut events, |e| matches!(e, ClientEvent::Synced { .. })).await;
        let ClientEvent::Synced {
            provisional_id,
            reservation,
        } = synced
        else {
            unreachable!()
        };
        assert_eq!(provisional_id, pending.provisional_id);
        assert_eq!(reservation.id, "res-1");

        next_matching(&mut events, |e| {
            matches!(e, ClientEvent::ReservationChanged(r) if r.occupants == 3)
        })
        .await;

        assert!(client.pending_operations().await.is_empty());
        assert_eq!(client.resolve_id(&pending.provisional_id).as_deref(), Some("res-1"));
        assert_eq!(server.reservation("res-1").unwrap().occupants, 3);
        assert_eq!(
            server.requests(),
            vec![
                (Method::Post, "/reservations".to_string()),
                (Method::Put, "/reservations/res-1".to_string()),
            ]
        );

        // The provisional id now reads through to the server record
        assert_eq!(client.read(&pending.provisional_id).await.unwrap().occupants, 3);
    }

    #[tokio::test]
    async fn test_sync_is_a_no_op_while_offline() {
        let server = Arc::new(MockServer::new());
        let (client, _connectivity) = client_with(&server, false).await;
        client.create(new_payload()).await.unwrap();

        let report = client.sync().await.unwrap();
        assert!(report.replayed.is_empty());
        assert_eq!(report.remaining, 1);
        assert_eq!(server.request_count(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_operation_is_reported() {
        let server = Arc::new(MockServer::new());
        let (client, connectivity) = client_with(&server, false).await;
        let mut events = client.subscribe_events();

        client.create(new_payload()).await.unwrap();
        server.fail_next_requests((0..3).map(|_| TransportError::Network("reset".to_string())));
        connectivity.set_online(true);
        wait_for_head_retries(&client, 1).await;

        let report = client.sync().await.unwrap();
        assert!(report.blocked_by.is_some());
        assert_eq!(report.remaining, 1);

        let err = client.sync().await.unwrap_err();
        let ReservationError::QueueExhausted(returned) = err else {
            panic!("expected an exhausted operation, got {:?}", err);
        };
        assert_eq!(returned.operation.kind(), OperationKind::Create);

        let dead = next_matching(&mut events, |e| matches!(e, ClientEvent::OperationDead(_))).await;
        let ClientEvent::OperationDead(exhausted) = dead else {
            unreachable!()
        };
        assert_eq!(exhausted.operation.retry_count, 3);
        assert_eq!(exhausted.operation.id, returned.operation.id);
        assert!(exhausted.last_error.contains("reset"));

        assert_eq!(client.dead_letters().await.len(), 1);
        assert!(client.pending_operations().await.is_empty());
        assert_eq!(client.clear_dead_letters().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_online_update_waits_behind_queued_update() {
        let server = Arc::new(MockServer::new());
        server.insert(sample_reservation("res-1"));
        let (client, connectivity) = client_with(&server, false).await;

        let older = ReservationPatch {
            occupants: Some(3),
            ..Default::default()
        };
        assert!(client.update("res-1", older).await.unwrap().is_queued());

        // The reconnect drain fails once and leaves the older update at the head
        server.fail_next_requests([TransportError::Network("reset".to_string())]);
        connectivity.set_online(true);
        wait_for_head_retries(&client, 1).await;

        let newer = ReservationPatch {
            occupants: Some(5),
            ..Default::default()
        };
        let outcome = client.update("res-1", newer).await.unwrap();
        assert!(outcome.is_queued(), "newer update must not overtake the queued one");

        for _ in 0..20 {
            if client.pending_operations().await.is_empty() {
                break;
            }
            client.sync().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(client.pending_operations().await.is_empty());
        assert_eq!(server.reservation("res-1").unwrap().occupants, 5);
        assert_eq!(client.cached_reservation("res-1").unwrap().occupants, 5);
    }

    #[tokio::test]
    async fn test_online_update_without_queued_work_is_sent_directly() {
        let server = Arc::new(MockServer::new());
        server.insert(sample_reservation("res-1"));
        server.insert(sample_reservation("res-2"));
        let (client, connectivity) = client_with(&server, false).await;

        let patch = ReservationPatch {
            occupants: Some(3),
            ..Default::default()
        };
        client.update("res-1", patch.clone()).await.unwrap();
        server.fail_next_requests([TransportError::Network("reset".to_string())]);
        connectivity.set_online(true);
        wait_for_head_retries(&client, 1).await;

        // Queued work on res-1 does not hold back res-2
        let outcome = client.update("res-2", patch).await.unwrap();
        assert!(!outcome.is_queued());
        assert_eq!(server.reservation("res-2").unwrap().occupants, 3);
    }

    #[tokio::test]
    async fn test_same_push_on_both_namespaces_is_applied_once() {
        let server = Arc::new(MockServer::new());
        let (client, _connectivity) = client_with(&server, true).await;
        let CreateOutcome::Created(created) = client.create(new_payload()).await.unwrap() else {
            panic!("expected a created reservation");
        };
        let mut events = client.subscribe_events();

        let mut pushed = created.clone();
        pushed.occupants = 4;
        pushed.updated_at = created.updated_at + chrono::Duration::minutes(5);
        let event = RealtimeEvent::ReservationUpdated(pushed.clone());
        client.realtime().publish("reservations", event.clone());
        client
            .realtime()
            .publish(&reservation_namespace(&created.id), event);

        let mut changed = 0;
        while let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_millis(200), events.recv()).await
        {
            if matches!(event, ClientEvent::ReservationChanged(_)) {
                changed += 1;
            }
        }
        assert_eq!(changed, 1);
        assert_eq!(client.cached_reservation(&created.id), Some(pushed.clone()));

        // A later change to the same reservation still comes through
        let mut later = pushed;
        later.occupants = 1;
        later.updated_at = later.updated_at + chrono::Duration::minutes(5);
        client
            .realtime()
            .publish("reservations", RealtimeEvent::ReservationUpdated(later));
        next_matching(&mut events, |e| {
            matches!(e, ClientEvent::ReservationChanged(r) if r.occupants == 1)
        })
        .await;

        let cancelled = RealtimeEvent::ReservationCancelled(created.id.clone());
        client
            .realtime()
            .publish(&reservation_namespace(&created.id), cancelled.clone());
        client.realtime().publish("reservations", cancelled);

        let mut cancellations = 0;
        while let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_millis(200), events.recv()).await
        {
            if matches!(event, ClientEvent::ReservationCancelled(_)) {
                cancellations += 1;
            }
        }
        assert_eq!(cancellations, 1);
    }

    #[tokio::test]
    async fn test_realtime_update_overwrites_cached_detail() {
        let server = Arc::new(MockServer::new());
        server.insert(sample_reservation("res-1"));
        let (client, _connectivity) = client_with(&server, true).await;
        let mut events = client.subscribe_events();

        client.read("res-1").await.unwrap();
        client.list(&ReservationFilters::default()).await.unwrap();

        let mut pushed = sample_reservation("res-1");
        pushed.status = ReservationStatus::CheckedIn;
        client
            .realtime()
            .publish("reservations", RealtimeEvent::ReservationUpdated(pushed.clone()));

        next_matching(&mut events, |e| matches!(e, ClientEvent::ReservationChanged(_))).await;
        assert_eq!(client.cached_reservation("res-1"), Some(pushed));

        // the list that held res-1 was dropped and refetches
        client.list(&ReservationFilters::default()).await.unwrap();
        assert_eq!(server.request_count(), 3);
    }

    #[tokio::test]
    async fn test_realtime_cancel_evicts_reservation() {
        let server = Arc::new(MockServer::new());
        let (client, _connectivity) = client_with(&server, true).await;
        let mut events = client.subscribe_events();

        let CreateOutcome::Created(created) = client.create(new_payload()).await.unwrap() else {
            panic!("expected a created reservation");
        };
        client
            .realtime()
            .publish(&reservation_namespace(&created.id), RealtimeEvent::ReservationCancelled(created.id.clone()));

        let event = next_matching(&mut events, |e| matches!(e, ClientEvent::ReservationCancelled(_))).await;
        assert!(matches!(event, ClientEvent::ReservationCancelled(id) if id == created.id));
        assert!(client.cached_reservation(&created.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_write_received_after_push_wins() {
        let server = Arc::new(MockServer::new());
        server.insert(sample_reservation("res-1"));
        let (client, _connectivity) = client_with(&server, true).await;
        client.read("res-1").await.unwrap();
        let mut events = client.subscribe_events();
        server.set_delay(50);

        let mut pushed = sample_reservation("res-1");
        pushed.occupants = 4;
        let patch = ReservationPatch {
            occupants: Some(3),
            ..Default::default()
        };

        // The push lands while the update request is still in flight
        let push = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            client
                .realtime()
                .publish("reservations", RealtimeEvent::ReservationUpdated(pushed.clone()));
            next_matching(&mut events, |e| {
                matches!(e, ClientEvent::ReservationChanged(r) if r.occupants == 4)
            })
            .await;
        };
        let (outcome, ()) = tokio::join!(client.update("res-1", patch), push);

        assert!(!outcome.unwrap().is_queued());
        assert_eq!(client.cached_reservation("res-1").unwrap().occupants, 3);
    }

    #[tokio::test]
    async fn test_push_received_after_local_write_wins() {
        let server = Arc::new(MockServer::new());
        server.insert(sample_reservation("res-1"));
        let (client, _connectivity) = client_with(&server, true).await;
        let mut events = client.subscribe_events();

        let patch = ReservationPatch {
            occupants: Some(3),
            ..Default::default()
        };
        client.update("res-1", patch).await.unwrap();

        let mut pushed = sample_reservation("res-1");
        pushed.occupants = 4;
        client
            .realtime()
            .publish("reservations", RealtimeEvent::ReservationUpdated(pushed));
        next_matching(&mut events, |e| {
            matches!(e, ClientEvent::ReservationChanged(r) if r.occupants == 4)
        })
        .await;

        assert_eq!(client.cached_reservation("res-1").unwrap().occupants, 4);
    }

    #[tokio::test]
    async fn test_rates_are_cached() {
        let server = Arc::new(MockServer::new());
        let (client, _connectivity) = client_with(&server, true).await;

        let query = RateQuery {
            room_id: "room-101".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
        };
        let rates = client.rates(&query).await.unwrap();
        assert_eq!(rates.len(), 2);
        assert!(rates.iter().all(|r| r.is_discounted()));
        assert_eq!(rates[0].total_rate, 110.0);

        client.rates(&query).await.unwrap();
        assert_eq!(server.request_count(), 1);

        let backwards = RateQuery {
            end_date: query.start_date,
            ..query
        };
        assert!(matches!(
            client.rates(&backwards).await,
            Err(ReservationError::Validation(ValidationError::InvalidDateRange))
        ));
    }

    #[tokio::test]
    async fn test_connectivity_changes_are_broadcast() {
        let server = Arc::new(MockServer::new());
        let (client, connectivity) = client_with(&server, true).await;
        let mut events = client.subscribe_events();

        connectivity.set_online(false);
        let event = next_matching(&mut events, |e| matches!(e, ClientEvent::ConnectivityChanged(_))).await;
        assert!(matches!(
            event,
            ClientEvent::ConnectivityChanged(Transition::WentOffline)
        ));
        assert!(!client.is_online());
    }

    #[tokio::test]
    async fn test_queue_restored_on_startup_is_replayed() {
        let server = Arc::new(MockServer::new());
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());

        {
            let client = ReservationClient::with_transport(
                ClientConfig::default(),
                server.clone(),
                store.clone(),
                Connectivity::new(false),
            )
            .await
            .unwrap();
            client.create(new_payload()).await.unwrap();
        }

        let client = ReservationClient::with_transport(
            ClientConfig::default(),
            server.clone(),
            store,
            Connectivity::new(true),
        )
        .await
        .unwrap();

        for _ in 0..50 {
            if client.pending_operations().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(client.pending_operations().await.is_empty());
        assert!(server.reservation("res-1").is_some());
    }

    #[tokio::test]
    async fn test_shutdown_releases_subscriptions() {
        let server = Arc::new(MockServer::new());
        let (client, _connectivity) = client_with(&server, true).await;
        client.create(new_payload()).await.unwrap();
        assert!(!client.realtime().active_topics().is_empty());

        client.shutdown().await;
        assert!(client.realtime().active_topics().is_empty());
        assert_eq!(client.realtime_state(), None);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = ClientConfig {
            timeout_ms: 0,
            ..ClientConfig::default()
        };
        let result = ReservationClient::with_transport(
            config,
            Arc::new(MockServer::new()),
            Arc::new(MemoryStore::new()),
            Connectivity::new(true),
        )
        .await;
        assert!(matches!(result, Err(ClientError::ConfigError(_))));
    }
}
