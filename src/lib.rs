#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Mailbox replication brain, IMAP quoting codec, and CRLF/LF
//! line-ending stream adapters.
//!
//! Three independent, single-threaded components pulled out of a mail
//! server's dsync replication pipeline:
//!
//! - [`brain`], a two-party state machine that synchronizes a user's
//!   mailboxes between a master and a slave endpoint over a
//!   [`channel::Channel`].
//! - [`quoter`], a bit-exact IMAP wire-quoting codec.
//! - [`stream`], CRLF/LF line-ending stream adapters that preserve
//!   accurate byte accounting across short downstream writes.
//!
//! None of the three shares state with the others; pick the module
//! you need.

pub mod brain;
pub mod channel;
pub mod error;
pub mod quoter;
pub mod stream;

pub use brain::{Brain, BrainFlags, Guid, MailboxState, Role, SyncType};
pub use channel::{Channel, HandshakeSettings, NextMailbox, RecvResult, SendResult};
pub use error::{Error, Result};
pub use quoter::quote_append;
pub use stream::{CrlfStream, Sink};
