//! Parley takes mail addressed to a list, decides what should happen to it
//! and gets it delivered.
//!
//! [`Parley::submit`] is the way in: list requests (`list+subscribe@...`,
//! `help` in a message body, ...) are answered, posts run through the
//! filter chain and end up durably queued. [`Parley::run`] drives a
//! [`Dispatcher`](parley_delivery::Dispatcher) over that queue until
//! shutdown. [`QueueInspector`] is the operator's view of the queue.

mod config;
mod controller;
mod error;
mod inspect;
mod replies;
mod requests;
mod submission;

pub use config::{CONFIG_ENV, ParleyConfig, SubmissionConfig};
pub use controller::Parley;
pub use error::{InspectError, SubmissionError};
pub use inspect::{EntrySummary, QueueInspector};
pub use replies::Reply;
pub use submission::{Submission, SubmissionReceipt};
