//! Event-sourced document catalog with a follower-maintained link index.
//!
//! Documents are persisted as append-only streams of immutable events and
//! a secondary read index is derived by replaying those events, in strict
//! global order and exactly once, through a follower pipeline. The crate
//! provides:
//!
//! - [`store`] - append-only [`EventStore`](store::EventStore) with
//!   optimistic concurrency, global positions and tracking records
//! - [`notification`] - the globally ordered
//!   [`NotificationLog`](notification::NotificationLog) feed
//! - [`aggregate`] - command-side primitives (`Aggregate`, `Handle`,
//!   `HandleCreate`)
//! - [`application`] - the [`Application`](application::Application)
//!   command/query façade
//! - [`follower`] - [`Policy`](follower::Policy) dispatch and the
//!   exactly-once [`Follower`](follower::Follower)
//! - [`system`] - [`Runner`](system::Runner) lifecycle for the pump tasks
//! - [`domain`], [`documents`], [`service`] - the document/index domain and
//!   its service layer
//!
//! # Example
//!
//! ```
//! use docledger::service::DocumentService;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let service = DocumentService::start();
//!
//! let id = service.create("user guide").unwrap();
//! service.wait_until_caught_up().await.unwrap();
//!
//! let all = service.get_all().unwrap();
//! assert_eq!(all.len(), 1);
//! assert_eq!(all[0].id, id);
//!
//! service.shutdown().await.unwrap();
//! # }
//! ```

pub mod aggregate;
pub mod application;
pub mod documents;
pub mod domain;
pub mod event;
pub mod follower;
pub mod notification;
pub mod service;
pub mod store;
pub mod system;

pub use aggregate::{Aggregate, Handle, HandleCreate, Versioned};
pub use application::{Application, CommandError, LoadError};
pub use event::{DecodeError, DomainEvent};
pub use follower::{Follower, Policy, ReplayError};
pub use notification::NotificationLog;
pub use store::{ConcurrencyConflict, EventStore};
pub use system::{PumpConfig, Runner, RunnerError, System};
