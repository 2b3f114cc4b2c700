//! Command Handlers module
//!
//! Command handlers that orchestrate business operations. Each handler loads
//! an aggregate, runs the operation and persists the raised events.

mod commands;
mod order_handler;
mod repository;


pub use commands::*;
pub use order_handler::OrderCommandHandler;
pub use repository::AggregateRepository;
