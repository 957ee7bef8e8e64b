use std::marker::PhantomData;

use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver, UnboundedSender};

use crate::server_to_client::{self, MessageContext};

/// Maximum wire size of one IRC line, CRLF included.
const MESSAGE_MAX_SIZE: usize = 512;

pub(crate) type SerializedMessage = Vec<u8>;

/// Sending half of a user's outbound queue. Handlers enqueue serialized
/// lines here while holding the state lock; the session task drains the
/// matching [`MailboxSink`] and owns the socket writes.
#[derive(Debug)]
pub(crate) struct Mailbox {
    sender: UnboundedSender<SerializedMessage>,
}

impl Mailbox {
    pub(crate) fn new() -> (Self, MailboxSink) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, MailboxSink { receiver })
    }

    pub(crate) fn ingest(&self, message: &server_to_client::Message<'_>, context: &MessageContext) {
        let mut mw = MessageWriter { mailbox: self };
        message.write_to(&mut mw, context);
    }
}

#[derive(Debug)]
pub struct MailboxSink {
    receiver: UnboundedReceiver<SerializedMessage>,
}

impl MailboxSink {
    pub async fn recv(&mut self) -> Option<SerializedMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<SerializedMessage, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// One server_to_client::Message may expand into several wire lines (NAMES,
/// MOTD, ban lists). This writer hands out one [`OnGoingMessage`] at a time
/// and enforces the per-line size cap.
pub(crate) struct MessageWriter<'m> {
    mailbox: &'m Mailbox,
}

impl<'m> MessageWriter<'m> {
    /// &mut self so only one line can be under construction at a time,
    /// keeping multi-line replies in order.
    pub(crate) fn new_message<'w>(&'w mut self) -> OnGoingMessage<'m, 'w> {
        OnGoingMessage {
            buf: Vec::with_capacity(MESSAGE_MAX_SIZE),
            mailbox: self.mailbox,
            phantom: PhantomData,
        }
    }
}

/// Owner must call validate() to terminate the line and enqueue it.
#[must_use]
pub(crate) struct OnGoingMessage<'m, 'w> {
    buf: Vec<u8>,
    mailbox: &'m Mailbox,
    phantom: PhantomData<&'w mut MessageWriter<'m>>,
}

impl OnGoingMessage<'_, '_> {
    #[inline]
    pub(crate) fn write<T>(mut self, bytes: &T) -> Self
    where
        T: AsRef<[u8]> + ?Sized,
    {
        self.buf.extend_from_slice(bytes.as_ref());
        self
    }

    pub(crate) fn validate(mut self) {
        // overlong lines are cut at 510 bytes so the CRLF always fits
        self.buf.truncate(MESSAGE_MAX_SIZE - 2);
        self.buf.extend_from_slice(b"\r\n");

        // the receiver being gone just means the session already ended
        let _ = self.mailbox.sender.send(self.buf);
    }
}

macro_rules! message {
    ($s:expr, $($args:expr),*) => {{
        let mut m = $s.new_message();
        $(
            m = m.write($args);
        )*
        m.validate();
    }}
}

macro_rules! message_push {
    ($m:ident, $($args:expr),*) => {{
        $(
            $m = $m.write($args);
        )*
    }}
}
