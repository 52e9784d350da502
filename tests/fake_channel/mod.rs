//! An in-memory `Channel` pair for testing [`dsync_core::brain::Brain`]
//! end to end, without a real transport.
//!
//! Mirrors the layout of the host crate's `tests/fake_imap/` fixture:
//! a small data model (here, a single `VecDeque` per direction) and a
//! builder (`FakeChannelBuilder`) in the fluent style of
//! `MailboxBuilder`.

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use dsync_core::brain::{Guid, MailboxState};
use dsync_core::channel::{Channel, HandshakeSettings, NextMailbox, RecvResult, SendResult};

enum WireMsg {
    Handshake(HandshakeSettings),
    MailboxState(MailboxState),
    EndOfList,
}

/// One side of a connected pair of in-memory channels.
pub struct FakeChannel {
    outgoing: Rc<RefCell<VecDeque<WireMsg>>>,
    incoming: Rc<RefCell<VecDeque<WireMsg>>>,
    failed: Rc<Cell<bool>>,
    local_guids: HashSet<Guid>,
    mailboxes_remaining: usize,
}

impl FakeChannel {
    /// Force this side to report a channel failure on its next poll,
    /// for exercising the brain's sticky `failed` bookkeeping.
    pub fn fail(&self) {
        self.failed.set(true);
    }
}

impl Channel for FakeChannel {
    fn send_handshake(&mut self, settings: HandshakeSettings) {
        self.outgoing
            .borrow_mut()
            .push_back(WireMsg::Handshake(settings));
    }

    fn recv_handshake(&mut self) -> Option<HandshakeSettings> {
        let mut incoming = self.incoming.borrow_mut();
        match incoming.front() {
            Some(WireMsg::Handshake(_)) => match incoming.pop_front() {
                Some(WireMsg::Handshake(settings)) => Some(settings),
                _ => unreachable!("front was just matched as a handshake"),
            },
            _ => None,
        }
    }

    fn send_mailbox_state(&mut self, state: MailboxState) -> SendResult {
        self.outgoing
            .borrow_mut()
            .push_back(WireMsg::MailboxState(state));
        SendResult::Ok
    }

    fn recv_mailbox_state(&mut self) -> RecvResult<MailboxState> {
        let mut incoming = self.incoming.borrow_mut();
        match incoming.front() {
            Some(WireMsg::MailboxState(_)) => match incoming.pop_front() {
                Some(WireMsg::MailboxState(state)) => RecvResult::Ok(state),
                _ => unreachable!("front was just matched as a mailbox state"),
            },
            Some(WireMsg::EndOfList) => {
                incoming.pop_front();
                RecvResult::Finished
            }
            _ => RecvResult::Empty,
        }
    }

    fn send_end_of_list(&mut self) {
        self.outgoing.borrow_mut().push_back(WireMsg::EndOfList);
    }

    fn send_mailbox_tree(&mut self) {}

    fn recv_mailbox_tree(&mut self) -> bool {
        true
    }

    fn send_mailbox_tree_deletes(&mut self) {}

    fn recv_mailbox_tree_deletes(&mut self) -> bool {
        true
    }

    fn negotiate_next_mailbox(&mut self) -> NextMailbox {
        if self.mailboxes_remaining == 0 {
            NextMailbox::Done
        } else {
            self.mailboxes_remaining -= 1;
            NextMailbox::Mailbox
        }
    }

    fn sync_mails(&mut self) -> bool {
        true
    }

    fn mailbox_exists(&self, guid: Guid) -> bool {
        self.local_guids.contains(&guid)
    }

    fn has_failed(&self) -> bool {
        self.failed.get()
    }

    fn has_pending_data(&self) -> bool {
        !self.incoming.borrow().is_empty()
    }

    fn close_mail_streams(&mut self) {}
}

/// Builder for a connected pair of [`FakeChannel`]s, mirroring the
/// fluent style of the host crate's `MailboxBuilder`.
#[derive(Default)]
pub struct FakeChannelBuilder {
    mailbox_guids: Vec<Guid>,
    mailboxes_to_sync: usize,
}

impl FakeChannelBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a GUID as existing in both sides' local mailbox tree,
    /// so `mailbox_exists` reports it present.
    #[must_use]
    pub fn mailbox(mut self, guid: Guid) -> Self {
        self.mailbox_guids.push(guid);
        self
    }

    /// How many mailboxes `negotiate_next_mailbox` should hand out
    /// before reporting `Done`.
    #[must_use]
    pub const fn mailboxes_to_sync(mut self, n: usize) -> Self {
        self.mailboxes_to_sync = n;
        self
    }

    /// Build the connected pair: `.0` talks to `.1` and vice versa.
    #[must_use]
    pub fn build(self) -> (FakeChannel, FakeChannel) {
        let a_to_b = Rc::new(RefCell::new(VecDeque::new()));
        let b_to_a = Rc::new(RefCell::new(VecDeque::new()));
        let guids: HashSet<Guid> = self.mailbox_guids.into_iter().collect();

        let a = FakeChannel {
            outgoing: Rc::clone(&a_to_b),
            incoming: Rc::clone(&b_to_a),
            failed: Rc::new(Cell::new(false)),
            local_guids: guids.clone(),
            mailboxes_remaining: self.mailboxes_to_sync,
        };
        let b = FakeChannel {
            outgoing: b_to_a,
            incoming: a_to_b,
            failed: Rc::new(Cell::new(false)),
            local_guids: guids,
            mailboxes_remaining: self.mailboxes_to_sync,
        };
        (a, b)
    }
}
