//! # Scheduler Testing Utils
//!
//! Shared testing utilities for the task orchestrator workspace.
//!
//! - **Mock Repositories**: in-memory implementations of the ledger, schedule
//!   and task repositories
//! - **Distributed Lock**: a lock table that several simulated replicas can share
//! - **Message Queue Mock**: records publishes and can be told to fail them
//! - **Database Test Containers**: PostgreSQL with the workspace migrations applied
//! - **Test Data Builders**: tasks, schedules, executions and responses
//!
//! ```rust,ignore
//! use scheduler_testing_utils::mocks::*;
//! use scheduler_testing_utils::containers::DatabaseTestContainer;
//! ```

pub mod builders;
pub mod containers;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use containers::*;
pub use helpers::*;
pub use mocks::*;
