use std::collections::{BTreeSet, HashSet};

use crate::error::ServerStateError;
use crate::liveness::Liveness;
use crate::message_writer::{Mailbox, MailboxSink};
use crate::server_to_client::{self, MessageContext};
use crate::validation::BanMask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserID(uuid::Uuid);

impl UserID {
    pub(crate) fn generate() -> Self {
        UserID(uuid::Uuid::new_v4())
    }
}

/// A fully registered client: both NICK and USER have been received.
#[derive(Debug)]
pub(crate) struct RegisteredUser {
    pub(crate) user_id: UserID,
    pub(crate) nickname: String,
    pub(crate) username: String,
    pub(crate) hostname: String,
    pub(crate) away_message: Option<Vec<u8>>,
    pub(crate) liveness: Liveness,
    mailbox: Mailbox,
}

impl RegisteredUser {
    pub(crate) fn send(&self, message: &server_to_client::Message<'_>, context: &MessageContext) {
        self.mailbox.ingest(message, context);
    }

    /// `nick!user@host`, the source prefix of lines this user originates.
    pub(crate) fn mask(&self) -> String {
        format!("{}!{}@{}", self.nickname, self.username, self.hostname)
    }

    pub(crate) fn is_away(&self) -> bool {
        self.away_message.is_some()
    }
}

/// A connection that has not completed the NICK+USER handshake yet.
#[derive(Debug)]
pub(crate) struct RegisteringUser {
    pub(crate) user_id: UserID,
    pub(crate) nickname: Option<String>,
    pub(crate) username: Option<String>,
    pub(crate) hostname: String,
    mailbox: Mailbox,
}

impl RegisteringUser {
    pub(crate) fn new(hostname: String) -> (Self, MailboxSink) {
        let user_id = UserID::generate();
        let (mailbox, sink) = Mailbox::new();
        let user = Self {
            user_id,
            nickname: None,
            username: None,
            hostname,
            mailbox,
        };
        (user, sink)
    }

    pub(crate) fn send(&self, message: &server_to_client::Message<'_>, context: &MessageContext) {
        self.mailbox.ingest(message, context);
    }

    pub(crate) fn maybe_nickname(&self) -> String {
        self.nickname.clone().unwrap_or_else(|| "*".to_string())
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.nickname.is_some() && self.username.is_some()
    }

    pub(crate) fn into_registered(self, liveness: Liveness) -> Option<RegisteredUser> {
        let nickname = self.nickname?;
        let username = self.username?;
        Some(RegisteredUser {
            user_id: self.user_id,
            nickname,
            username,
            hostname: self.hostname,
            away_message: None,
            liveness,
            mailbox: self.mailbox,
        })
    }
}

#[derive(Debug)]
pub(crate) struct BanEntry {
    pub(crate) mask: BanMask,
    /// Mask of the operator who imposed the ban, kept for the audit listing.
    pub(crate) set_by: String,
}

/// One channel. Exists iff it has at least one member; the whole record
/// (topic, modes, bans) is dropped when the last member leaves.
#[derive(Debug)]
pub(crate) struct Channel {
    /// Display case of the name; the registry key is the lowercased form.
    pub(crate) name: String,
    pub(crate) topic: Option<Vec<u8>>,
    pub(crate) modes: BTreeSet<char>,
    /// Username of the creator. Never changes, confers the `~` display
    /// prefix but no enforcement privilege of its own.
    pub(crate) founder: String,
    pub(crate) users: HashSet<UserID>,
    /// Case-folded nicks with operator privilege. Checked only after
    /// membership, so a stale entry can never grant a non-member authority.
    pub(crate) operators: HashSet<String>,
    pub(crate) bans: Vec<BanEntry>,
}

impl Channel {
    pub(crate) fn new(name: &str, creator: &RegisteredUser) -> Self {
        let mut operators = HashSet::new();
        operators.insert(creator.nickname.to_ascii_lowercase());
        Self {
            name: name.to_string(),
            topic: None,
            modes: BTreeSet::new(),
            founder: creator.username.clone(),
            users: HashSet::new(),
            operators,
            bans: Vec::new(),
        }
    }

    pub(crate) fn is_operator(&self, user: &RegisteredUser) -> bool {
        self.users.contains(&user.user_id)
            && self.operators.contains(&user.nickname.to_ascii_lowercase())
    }

    pub(crate) fn is_founder(&self, user: &RegisteredUser) -> bool {
        self.founder == user.username
    }

    pub(crate) fn member_prefix(&self, user: &RegisteredUser) -> &'static str {
        if self.is_founder(user) {
            "~"
        } else if self.is_operator(user) {
            "@"
        } else {
            ""
        }
    }

    pub(crate) fn grant_operator(&mut self, nickname: &str) -> bool {
        self.operators.insert(nickname.to_ascii_lowercase())
    }

    pub(crate) fn revoke_operator(&mut self, nickname: &str) -> bool {
        self.operators.remove(&nickname.to_ascii_lowercase())
    }

    pub(crate) fn is_banned(&self, user: &RegisteredUser) -> bool {
        self.bans
            .iter()
            .any(|b| b.mask.matches(&user.nickname, &user.username, &user.hostname))
    }

    pub(crate) fn find_ban(&self, mask: &BanMask) -> Option<usize> {
        self.bans.iter().position(|b| &b.mask == mask)
    }

    pub(crate) fn ensure_member(&self, user: &RegisteredUser) -> Result<(), ServerStateError> {
        if self.users.contains(&user.user_id) {
            Ok(())
        } else {
            Err(ServerStateError::NotOnChannel {
                client: user.nickname.clone(),
                channel: self.name.clone(),
            })
        }
    }

    /// Membership first, privilege second.
    pub(crate) fn ensure_operator(&self, user: &RegisteredUser) -> Result<(), ServerStateError> {
        self.ensure_member(user)?;
        if self.operators.contains(&user.nickname.to_ascii_lowercase()) {
            Ok(())
        } else {
            Err(ServerStateError::ChanOpPrivsNeeded {
                client: user.nickname.clone(),
                channel: self.name.clone(),
            })
        }
    }

    /// Active simple mode flags as displayed by the 324 reply.
    pub(crate) fn mode_string(&self) -> String {
        if self.modes.is_empty() {
            String::new()
        } else {
            let mut s = String::with_capacity(self.modes.len() + 1);
            s.push('+');
            s.extend(self.modes.iter());
            s
        }
    }
}
