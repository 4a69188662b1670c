//! Append-only message log.
//!
//! Every observed message is written as one self-describing frame in append
//! order. Queries are full scans with an optional topic and time filter; no
//! index is kept.

mod frame;
mod message_log;
mod query;

pub use message_log::MessageLog;
pub use query::{MessageFilter, MessageIter, MessageQuery};
