//! order_events Library
//!
//! Event-sourced order aggregates: an append-only event store with optimistic
//! concurrency, snapshots, and checkpointed projections into read models.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod domain;
pub mod event_store;
pub mod handlers;
pub mod jobs;
pub mod projection;
pub mod snapshot;
pub mod telemetry;

mod error;

pub use config::Config;
pub use domain::{DomainError, Money, MoneyError, OperationContext, OrderEvent};
pub use error::{AppError, AppResult};
