//! # Beacon Core
//!
//! Domain types, traits, and error definitions for the Beacon context
//! orchestration and resilience layer. This crate has **no runtime
//! machinery of its own**. It defines the domain model that the cache,
//! context and resilience crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here:
//! - [`ContextProvider`] supplies one slice of situational data
//! - [`DurableStorage`] backs the durable cache tier
//! - [`BackendClient`] streams responses from the AI backend
//!
//! Implementations live in their respective crates (or in the embedding
//! application), which keeps the dependency graph pointing inward.

pub mod backend;
pub mod clock;
pub mod context;
pub mod error;
pub mod event;
pub mod storage;

// Re-export key types at crate root for ergonomics
pub use backend::{BackendClient, BackendRequest, BackendResponse, StreamChunk};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{ContextProvider, ContextRecord, TriggerKind};
pub use error::{Error, ProviderError, Result, StorageError};
pub use event::{EventEmitter, SubscriptionId};
pub use storage::DurableStorage;
