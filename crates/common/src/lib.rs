//! Shared building blocks for the AgentDesk services: configuration, the
//! PostgreSQL pool, the common error type and persisted row types.

pub mod config;
pub mod db;
pub mod error;
pub mod types;
