//! Streaming broker between agents and the message log
//!
//! Every agent holds one bidirectional `StreamMetrics` call. The broker turns
//! that call into a [`session::StreamSession`] which runs two paths at once:
//!
//! ```text
//!   Agent ──metrics──► receive task ──► ProducerAdapter (shared) ──► metrics topic
//!     ▲
//!     └──commands──── send loop ◄── CommandSubscriber (per session) ◄── commands topic
//! ```
//!
//! ## Components
//!
//! - **ProducerAdapter**: the process-wide publishing client, keyed by agent id
//! - **CommandSubscriber**: one per session, unique identity, reads from the earliest offset
//! - **StreamSession**: owns the connection, the receive task and the send loop
//! - **SessionRegistry**: live sessions by agent id
//! - **CommandPublisher**: writes operator commands onto the commands topic
//!
//! ## Failure containment
//!
//! A failed publish drops one record, a bad command record is skipped, and a
//! broken connection ends one session. Nothing here stops the process.

pub mod commands;
pub mod messages;
pub mod producer;
pub mod registry;
pub mod session;
pub mod subscriber;
