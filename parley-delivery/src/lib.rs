//! Delivery of queued list mail.
//!
//! The [`Dispatcher`] claims `Outgoing` entries from the durable queue,
//! hands them to a [`Transport`] in recipient batches and records the
//! results:
//!
//! - Delivered recipients are done
//! - Transient failures are retried with backoff from [`RetryPolicy`]
//! - Permanent failures, and transient ones out of attempts, land in `Error`
//!
//! An entry whose recipients fare differently is split so each child
//! carries only the recipients that share its fate.

mod config;
mod dispatcher;
mod error;
mod retry;
mod transport;

pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, Folded, Settled, TickReport};
pub use error::{DeliveryError, PermanentError, SystemError, TransientError};
pub use retry::RetryPolicy;
pub use transport::{DeliveryStatus, OutboundMessage, RecipientOutcome, Transport};
