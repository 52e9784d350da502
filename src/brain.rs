//! The dsync replication brain: a two-party state machine that
//! synchronizes a user's mailboxes between a master and a slave
//! endpoint across a [`Channel`].
//!
//! The brain never blocks. Its owner calls [`Brain::run_io`] whenever
//! the channel signals that progress might be possible; `run_io`
//! drains every step it can make right now and returns, leaving the
//! brain parked in whatever state it reached. This mirrors
//! `dsync_brain_run_io` in the source almost line for line. The
//! `changed`/`try_pending` dance exists so that a step which produced
//! no state change but left buffered input unread gets one more
//! chance before the loop gives up.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::channel::{Channel, HandshakeSettings, NextMailbox, RecvResult, SendResult};
use crate::error::{Error, Result};

/// A 16-byte mailbox identifier, unique within a user's mailbox tree.
pub type Guid = [u8; 16];

/// How much of a mailbox's message state is being resynchronized.
///
/// `Unknown` is legal only transiently, between a slave's construction
/// and the moment it receives the master's handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncType {
    Unknown,
    Full,
    Changed,
    State,
}

/// Per-session replication flags.
///
/// Modeled as a plain struct of `bool` fields, mirroring
/// `dsync_brain_set_flags`'s per-bit unpacking, rather than a packed
/// bitset integer (nothing downstream of construction needs the
/// packed representation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrainFlags {
    pub send_guid_requests: bool,
    pub mails_have_guids: bool,
    pub backup_send: bool,
    pub backup_recv: bool,
    pub debug: bool,
    pub sync_all_namespaces: bool,
}

impl BrainFlags {
    /// Swap `backup_send`/`backup_recv`. The handshake a master sends
    /// carries the complementary direction, so a `backup_send` master
    /// pairs with a `backup_recv` slave.
    #[must_use]
    const fn inverted_backup(self) -> Self {
        Self {
            backup_send: self.backup_recv,
            backup_recv: self.backup_send,
            ..self
        }
    }
}

/// An opaque, per-mailbox incremental-resync cursor, keyed by
/// [`Guid`]. The exported sync state is a text serialization of a
/// table of these, consumed verbatim on the next run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MailboxState {
    pub guid: Guid,
    pub cursor: String,
}

/// Which side of a dsync session a [`Brain`] is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SlaveRecvHandshake,
    MasterSendLastCommon,
    SlaveRecvLastCommon,
    SendMailboxTree,
    RecvMailboxTree,
    SendMailboxTreeDeletes,
    RecvMailboxTreeDeletes,
    MasterSendMailbox,
    SlaveRecvMailbox,
    SyncMails,
    Done,
}

impl State {
    const fn name(self) -> &'static str {
        match self {
            Self::SlaveRecvHandshake => "recv_handshake",
            Self::MasterSendLastCommon => "send_last_common",
            Self::SlaveRecvLastCommon => "recv_last_common",
            Self::SendMailboxTree => "send_mailbox_tree",
            Self::RecvMailboxTree => "recv_mailbox_tree",
            Self::SendMailboxTreeDeletes => "send_mailbox_tree_deletes",
            Self::RecvMailboxTreeDeletes => "recv_mailbox_tree_deletes",
            Self::MasterSendMailbox => "master_send_mailbox",
            Self::SlaveRecvMailbox => "slave_recv_mailbox",
            Self::SyncMails => "sync_mails",
            Self::Done => "done",
        }
    }
}

/// The replication state machine for one peer of a dsync session.
///
/// `C` is the [`Channel`] implementation the brain drives; the same
/// type parameter appears on both the master and slave side of a
/// session, though the two need not literally be the same
/// implementation.
pub struct Brain<C> {
    role: Role,
    sync_type: SyncType,
    flags: BrainFlags,
    state: State,
    channel: C,
    sync_namespace: Option<String>,
    sync_box: Option<String>,
    mailbox_states: HashMap<Guid, MailboxState>,
    /// States the channel learns about while running per-mail sync for
    /// the current mailbox. Per-mail sync is an opaque external step
    /// ([`Channel::sync_mails`]), so nothing populates this today; it
    /// is carried so `get_state`'s upsert pass has somewhere to read
    /// from once a concrete `Channel` starts reporting them.
    remote_mailbox_states: Vec<MailboxState>,
    mailbox_states_iter: Option<std::vec::IntoIter<MailboxState>>,
    failed: bool,
}

impl<C: Channel> Brain<C> {
    /// Construct a master brain and immediately send the initial
    /// handshake.
    ///
    /// If `sync_type` is [`SyncType::State`] and `saved_state` fails
    /// to parse, the corruption is recovered from by clearing the
    /// mailbox-state table and downgrading to [`SyncType::Full`] (a
    /// warning is logged) rather than failing construction.
    ///
    /// # Panics
    ///
    /// Panics if `sync_type` is [`SyncType::Unknown`], or if
    /// `sync_type` is [`SyncType::State`] and `saved_state` is empty.
    /// Both are conditions a well-behaved caller can never trigger, so
    /// they are programmer errors rather than recoverable data errors.
    #[must_use]
    pub fn master_init(
        mut channel: C,
        sync_namespace: Option<String>,
        sync_box: String,
        sync_type: SyncType,
        flags: BrainFlags,
        saved_state: &str,
    ) -> Self {
        assert!(
            sync_type != SyncType::Unknown,
            "a master brain must be constructed with a known sync type"
        );
        assert!(
            sync_type != SyncType::State || !saved_state.is_empty(),
            "SyncType::State requires a non-empty saved state"
        );

        let mut sync_type = sync_type;
        let mut mailbox_states = HashMap::new();
        let mut state = State::SendMailboxTree;

        if sync_type == SyncType::State {
            match serde_json::from_str::<Vec<MailboxState>>(saved_state) {
                Ok(states) => {
                    mailbox_states = states.into_iter().map(|s| (s.guid, s)).collect();
                    state = State::MasterSendLastCommon;
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        "saved sync state is invalid, falling back to full sync"
                    );
                    sync_type = SyncType::Full;
                }
            }
        }

        // external: dsync_brain_mailbox_trees_init(brain) happens here
        // in the source; mailbox-tree bookkeeping is out of scope.

        channel.send_handshake(HandshakeSettings {
            namespace_prefix: sync_namespace.clone(),
            sync_box: sync_box.clone(),
            sync_type,
            brain_flags: flags.inverted_backup(),
        });

        debug!(role = "master", state = state.name(), "brain: initialized");

        Self {
            role: Role::Master,
            sync_type,
            flags,
            state,
            channel,
            sync_namespace,
            sync_box: Some(sync_box),
            mailbox_states,
            remote_mailbox_states: Vec::new(),
            mailbox_states_iter: None,
            failed: false,
        }
    }

    /// Construct a slave brain. No handshake is sent; the slave waits
    /// to receive one before adopting a sync type, namespace, or box.
    #[must_use]
    pub fn slave_init(channel: C) -> Self {
        debug!(role = "slave", state = State::SlaveRecvHandshake.name(), "brain: initialized");

        Self {
            role: Role::Slave,
            sync_type: SyncType::Unknown,
            flags: BrainFlags::default(),
            state: State::SlaveRecvHandshake,
            channel,
            sync_namespace: None,
            sync_box: None,
            mailbox_states: HashMap::new(),
            remote_mailbox_states: Vec::new(),
            mailbox_states_iter: None,
            failed: false,
        }
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub const fn sync_type(&self) -> SyncType {
        self.sync_type
    }

    #[must_use]
    pub const fn flags(&self) -> BrainFlags {
        self.flags
    }

    #[must_use]
    pub fn sync_namespace(&self) -> Option<&str> {
        self.sync_namespace.as_deref()
    }

    #[must_use]
    pub fn sync_box(&self) -> Option<&str> {
        self.sync_box.as_deref()
    }

    #[must_use]
    pub const fn has_failed(&self) -> bool {
        self.failed
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Drive the state machine until no further progress is possible.
    ///
    /// Called by the owner whenever the channel signals that I/O
    /// progress might be possible. This is the idiomatic replacement
    /// for the callback `dsync_ibc_set_io_callback` registers in the
    /// source: Rust has no need for a stored function pointer when the
    /// owner can simply invoke this method directly from its own event
    /// loop.
    pub fn run_io(&mut self) {
        if self.channel.has_failed() {
            self.failed = true;
            return;
        }

        let mut try_pending = true;
        loop {
            let (mut changed, cont) = self.step();
            if !cont {
                break;
            }
            if changed {
                try_pending = true;
            } else if try_pending {
                if self.channel.has_pending_data() {
                    changed = true;
                }
                try_pending = false;
            }
            if !changed {
                break;
            }
        }
    }

    /// Run one scheduling step. Returns `(changed, continue)`: whether
    /// this step made progress, and whether the caller should keep
    /// looping (`false` once `Done` is reached or the brain has
    /// failed).
    fn step(&mut self) -> (bool, bool) {
        if self.failed {
            return (false, false);
        }
        if self.channel.has_failed() {
            self.failed = true;
            return (false, false);
        }

        debug!(role = ?self.role, state = self.state.name(), "brain: in state");

        let (changed, cont) = match self.state {
            State::SlaveRecvHandshake => (self.step_slave_recv_handshake(), true),
            State::MasterSendLastCommon => {
                self.step_master_send_last_common();
                (true, true)
            }
            State::SlaveRecvLastCommon => (self.step_slave_recv_last_common(), true),
            State::SendMailboxTree => {
                self.channel.send_mailbox_tree();
                self.state = State::RecvMailboxTree;
                (true, true)
            }
            State::RecvMailboxTree => {
                if self.channel.recv_mailbox_tree() {
                    self.state = State::SendMailboxTreeDeletes;
                    (true, true)
                } else {
                    (false, true)
                }
            }
            State::SendMailboxTreeDeletes => {
                self.channel.send_mailbox_tree_deletes();
                self.state = State::RecvMailboxTreeDeletes;
                (true, true)
            }
            State::RecvMailboxTreeDeletes => {
                if self.channel.recv_mailbox_tree_deletes() {
                    self.state = match self.role {
                        Role::Master => State::MasterSendMailbox,
                        Role::Slave => State::SlaveRecvMailbox,
                    };
                    (true, true)
                } else {
                    (false, true)
                }
            }
            State::MasterSendMailbox | State::SlaveRecvMailbox => {
                self.state = match self.channel.negotiate_next_mailbox() {
                    NextMailbox::Mailbox => State::SyncMails,
                    NextMailbox::Done => State::Done,
                };
                (true, true)
            }
            State::SyncMails => {
                if self.channel.sync_mails() {
                    self.state = match self.role {
                        Role::Master => State::MasterSendMailbox,
                        Role::Slave => State::SlaveRecvMailbox,
                    };
                    (true, true)
                } else {
                    (false, true)
                }
            }
            State::Done => (true, false),
        };

        debug!(
            role = ?self.role,
            state = self.state.name(),
            changed,
            "brain: out state"
        );

        if self.channel.has_failed() {
            self.failed = true;
            return (changed, false);
        }
        (changed, cont)
    }

    fn step_slave_recv_handshake(&mut self) -> bool {
        assert_eq!(self.role, Role::Slave);

        let Some(settings) = self.channel.recv_handshake() else {
            return false;
        };

        if self.flags.debug {
            trace!(?settings, "brain: received handshake");
        }

        self.sync_namespace = settings.namespace_prefix;
        self.sync_box = Some(settings.sync_box);
        assert_eq!(self.sync_type, SyncType::Unknown);
        self.sync_type = settings.sync_type;
        self.flags = settings.brain_flags;

        // external: dsync_brain_mailbox_trees_init(brain), out of scope.

        self.state = if self.sync_type == SyncType::State {
            State::SlaveRecvLastCommon
        } else {
            State::SendMailboxTree
        };
        true
    }

    fn step_master_send_last_common(&mut self) {
        assert_eq!(self.role, Role::Master);

        if self.mailbox_states_iter.is_none() {
            let states: Vec<MailboxState> = self.mailbox_states.values().cloned().collect();
            self.mailbox_states_iter = Some(states.into_iter());
        }

        let iter = self
            .mailbox_states_iter
            .as_mut()
            .expect("just initialized above");
        for state in iter {
            if matches!(self.channel.send_mailbox_state(state), SendResult::Full) {
                return;
            }
        }

        self.mailbox_states_iter = None;
        self.channel.send_end_of_list();
        self.state = State::SendMailboxTree;
    }

    fn step_slave_recv_last_common(&mut self) -> bool {
        assert_eq!(self.role, Role::Slave);

        let mut changed = false;
        loop {
            match self.channel.recv_mailbox_state() {
                RecvResult::Ok(state) => {
                    if self.flags.debug {
                        trace!(guid = ?state.guid, "brain: received mailbox state");
                    }
                    self.mailbox_states.insert(state.guid, state);
                    changed = true;
                }
                RecvResult::Finished => {
                    self.state = State::SendMailboxTree;
                    changed = true;
                    break;
                }
                RecvResult::Empty => break,
            }
        }
        changed
    }

    /// Export the current replication state as a serialized blob,
    /// consumable verbatim as `saved_state` on a future run.
    ///
    /// Any `MailboxState` received from the remote side during the
    /// run is folded into the local table first; entries whose GUID
    /// no longer exists in the local mailbox tree are then dropped;
    /// the table never grows to remember mailboxes that have since
    /// been deleted.
    #[must_use]
    pub fn get_state(&mut self) -> String {
        for state in self.remote_mailbox_states.drain(..) {
            self.mailbox_states.insert(state.guid, state);
        }

        let existing: std::collections::HashSet<Guid> = self
            .mailbox_states
            .keys()
            .copied()
            .filter(|guid| self.channel.mailbox_exists(*guid))
            .collect();
        self.mailbox_states.retain(|guid, _| existing.contains(guid));

        let mut states: Vec<&MailboxState> = self.mailbox_states.values().collect();
        states.sort_by_key(|s| s.guid);
        serde_json::to_string(&states).expect("mailbox state serialization cannot fail")
    }

    /// Tear the brain down, closing any open iterator and the
    /// channel's mail-stream side.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Brain`] if the channel had failed, or if the
    /// brain had not reached `Done`. Recovery is left to the caller;
    /// this crate never retries on its own.
    pub fn deinit(mut self) -> Result<()> {
        if self.channel.has_failed() || !self.is_done() {
            self.failed = true;
        }
        self.channel.close_mail_streams();
        self.mailbox_states_iter = None;

        if self.failed {
            Err(Error::Brain("replication session did not complete".into()))
        } else {
            Ok(())
        }
    }
}
