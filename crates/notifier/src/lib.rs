//! Task notification delivery queue.
//!
//! Turns "a task reached a terminal state" into a notification that is
//! delivered at least once, with bounded retries, while any number of
//! dispatchers poll the same store.
//!
//! - [`writer`]: lifecycle writers (task bound, task finished)
//! - [`store`]: record store, eligibility selector, lease claimer, outcome recorder
//! - [`dispatcher`]: the polling loop driving claims and deliveries
//! - [`merge`]: pure merge rules shared by every store

pub mod clock;
pub mod dispatcher;
pub mod merge;
pub mod resolver;
pub mod retry;
pub mod sender;
pub mod store;
pub mod writer;

pub use clock::{Clock, FixedClock, SystemClock};
pub use dispatcher::{DispatchSummary, Dispatcher, DispatcherConfig};
pub use store::{
    ClaimOptions, InMemoryNotificationStore, NotificationStore, PgNotificationStore, SelectOptions,
};
pub use writer::{BindTask, NotificationWriter, TerminalTask};
