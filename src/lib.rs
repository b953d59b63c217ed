// Offline-aware reservation client for the hotel management API

// Domain types and the rules around them
pub mod format;
pub mod model;
pub mod validation;

// Ambient pieces
pub mod config;
pub mod error;

// Client building blocks
pub mod cache;
pub mod connectivity;
pub mod queue;
pub mod realtime;
pub mod storage;
pub mod transport;

// Public facade composing the above
pub mod client;

// Re-export key types for convenience
pub use cache::{CacheStatsReport, CacheStore};
pub use client::{
    CachedValue, ClientEvent, CreateOutcome, PendingReservation, ReservationClient, UpdateOutcome,
};
pub use config::{BookingPolicy, CacheConfig, ClientConfig, QueueConfig, RealtimeConfig, RetryConfig};
pub use connectivity::{Connectivity, Transition};
pub use error::{
    ClientError, QueueExhaustedError, ReservationError, StorageError, TransportError,
    ValidationError,
};
pub use model::{
    CancelReservation, CreateReservation, PaymentStatus, RateDetails, RateQuery, Reservation,
    ReservationFilters, ReservationPage, ReservationPatch, ReservationStatus,
};
pub use queue::{DrainReport, Operation, OperationKind, QueuedOperation};
pub use realtime::{ConnectionState, EventKind, RealtimeEvent, RealtimeHub, Subscription, Topic};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
