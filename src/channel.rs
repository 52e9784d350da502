//! The external message-channel abstraction the replication brain
//! drives its state machine over.
//!
//! `Channel` bounds exactly what [`crate::brain::Brain`] needs from its
//! transport: a handshake, a streamed mailbox-state exchange, and a
//! handful of opaque per-step operations (mailbox tree exchange,
//! deletes, mailbox negotiation, per-mail sync) whose internals are an
//! external collaborator's concern, not this crate's. A concrete
//! transport (TCP, a pipe to a remote `doveadm` process, ...) is out
//! of scope; only an in-memory test implementation lives in this
//! crate, under `tests/`.

use crate::brain::{BrainFlags, Guid, MailboxState, SyncType};

/// Settings exchanged in the initial handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeSettings {
    pub namespace_prefix: Option<String>,
    pub sync_box: String,
    pub sync_type: SyncType,
    pub brain_flags: BrainFlags,
}

/// Outcome of offering the channel a message it might not have buffer
/// space for right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Accepted; more sends may proceed immediately.
    Ok,
    /// Accepted, but the send buffer is now full; the caller should
    /// stop sending and resume on the next `run_io`.
    Full,
}

/// Outcome of polling the channel for the next message in a streamed
/// sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvResult<T> {
    /// A message was available.
    Ok(T),
    /// The peer sent an explicit end-of-list marker.
    Finished,
    /// Nothing is available yet; try again once the channel wakes us.
    Empty,
}

/// Whether mailbox negotiation found another mailbox to synchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextMailbox {
    /// Another mailbox was negotiated; the brain should run
    /// per-message sync for it.
    Mailbox,
    /// No mailboxes remain; the session is complete.
    Done,
}

/// The bidirectional message channel a [`crate::brain::Brain`] drives.
///
/// Implementations are synchronous: every method either completes or
/// reports that it would have to block (`Full`/`Empty`), matching the
/// source's non-blocking `dsync-ibc` callback style rather than
/// wrapping the brain's cooperative scheduler in an async runtime it
/// doesn't otherwise need. The brain's owner calls
/// [`crate::brain::Brain::run_io`] directly whenever it learns the
/// channel might have made progress (a readable socket, a woken
/// condvar, ...), the Rust equivalent of the source's
/// `dsync_ibc_set_io_callback` registration, without the indirection
/// of a stored function pointer.
pub trait Channel {
    fn send_handshake(&mut self, settings: HandshakeSettings);
    fn recv_handshake(&mut self) -> Option<HandshakeSettings>;

    fn send_mailbox_state(&mut self, state: MailboxState) -> SendResult;
    fn recv_mailbox_state(&mut self) -> RecvResult<MailboxState>;
    fn send_end_of_list(&mut self);

    /// Send the local mailbox tree. Out of scope: a real
    /// implementation negotiates folder hierarchy, UIDVALIDITYs and
    /// highest-modseqs here; this crate treats it as one opaque step.
    fn send_mailbox_tree(&mut self);
    /// Receive the remote mailbox tree. Returns `true` once it has
    /// been fully received.
    fn recv_mailbox_tree(&mut self) -> bool;
    /// Send the local mailbox tombstone (deletion) list.
    fn send_mailbox_tree_deletes(&mut self);
    /// Receive the remote tombstone list. Returns `true` once fully
    /// received.
    fn recv_mailbox_tree_deletes(&mut self) -> bool;

    /// Negotiate the next mailbox to synchronize, or report that none
    /// remain.
    fn negotiate_next_mailbox(&mut self) -> NextMailbox;
    /// Run per-message synchronization for the mailbox negotiated by
    /// the last call to [`Channel::negotiate_next_mailbox`]. Returns
    /// `true` once that mailbox's mail sync has finished.
    fn sync_mails(&mut self) -> bool;

    /// Whether `guid` names a mailbox that currently exists in the
    /// local tree. Consulted by `Brain::get_state` to garbage-collect
    /// stale entries from the exported sync state.
    fn mailbox_exists(&self, guid: Guid) -> bool;

    fn has_failed(&self) -> bool;
    fn has_pending_data(&self) -> bool;
    fn close_mail_streams(&mut self);
}
