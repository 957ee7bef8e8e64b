use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::client_to_server::MessageDecodingError;
use crate::error::ServerStateError;
use crate::liveness::{Liveness, LivenessStatus};
use crate::message_writer::MailboxSink;
use crate::server_to_client::{self, BanListEntry, MessageContext};
use crate::types::{BanEntry, Channel, RegisteredUser, RegisteringUser, UserID};
use crate::user_state::{RegisteredState, RegisteringState, UserState};
use crate::validation::{channel_name_is_valid, nickname_is_valid, BanMask};

pub trait MotdProvider {
    fn motd(&self) -> Option<Vec<String>>;
}

/// Whole-server state behind a single lock. Command handlers take the lock
/// once, mutate, and enqueue any notifications into the per-user mailboxes;
/// the lock is never held across a socket write.
#[derive(Clone)]
pub struct ServerState(Arc<RwLock<ServerStateInner>>);

struct ServerStateInner {
    users: HashMap<UserID, RegisteredUser>,
    registering_users: HashMap<UserID, RegisteringUser>,
    /// Keyed by the ASCII-lowercased channel name.
    channels: HashMap<String, Channel>,

    server_name: String,
    motd_provider: Arc<dyn MotdProvider + Send + Sync>,
    keepalive_timeout: Option<Duration>,
    message_context: MessageContext,
}

impl ServerState {
    pub fn new<MP>(
        server_name: &str,
        motd_provider: Arc<MP>,
        keepalive_timeout: Option<Duration>,
    ) -> Self
    where
        MP: MotdProvider + Send + Sync + 'static,
    {
        let sv = ServerStateInner {
            users: Default::default(),
            registering_users: Default::default(),
            channels: Default::default(),

            server_name: server_name.to_owned(),
            motd_provider,
            keepalive_timeout,
            message_context: MessageContext {
                server_name: server_name.to_string(),
            },
        };
        ServerState(Arc::new(RwLock::new(sv)))
    }

    pub fn new_registering_user(&self, hostname: &str) -> (UserID, UserState, MailboxSink) {
        let mut sv = self.0.write();

        let (user, rx) = RegisteringUser::new(hostname.to_string());
        let user_id = user.user_id;
        let state = UserState::Registering(RegisteringState::new(user_id));

        sv.registering_users.insert(user.user_id, user);

        (user_id, state, rx)
    }

    pub fn keepalive_timeout(&self) -> Option<Duration> {
        self.0.read().keepalive_timeout
    }

    /// Called when a session ends for any reason. Safe to call with a state
    /// that was already torn down.
    pub fn dispose_state(&self, state: UserState) {
        match state {
            UserState::Registering(state) => {
                let mut sv = self.0.write();
                sv.registering_users.remove(&state.user_id);
            }
            UserState::Registered(state) => {
                let mut sv = self.0.write();
                sv.remove_user(state.user_id, b"Remote host closed the connection");
            }
            UserState::Disconnected => {}
        }
    }
}

impl ServerStateInner {
    fn get_ruser(&self, user_id: UserID) -> &RegisteringUser {
        #[allow(clippy::unwrap_used)]
        self.registering_users.get(&user_id).unwrap()
    }

    fn get_mut_ruser(&mut self, user_id: UserID) -> &mut RegisteringUser {
        #[allow(clippy::unwrap_used)]
        self.registering_users.get_mut(&user_id).unwrap()
    }

    fn get_mut_user(&mut self, user_id: UserID) -> &mut RegisteredUser {
        #[allow(clippy::unwrap_used)]
        self.users.get_mut(&user_id).unwrap()
    }

    fn send_error(&self, user_id: UserID, error: ServerStateError) {
        if let Some(user) = self.users.get(&user_id) {
            user.send(
                &server_to_client::Message::Err(error),
                &self.message_context,
            );
        } else if let Some(user) = self.registering_users.get(&user_id) {
            user.send(
                &server_to_client::Message::Err(error),
                &self.message_context,
            );
        }
    }

    fn find_user_by_nick(&self, nickname: &str) -> Option<&RegisteredUser> {
        self.users
            .values()
            .find(|u| u.nickname.eq_ignore_ascii_case(nickname))
    }

    fn check_nickname(
        &self,
        nickname: &str,
        user_id: Option<UserID>,
    ) -> Result<(), ServerStateError> {
        let mut client = "*".to_string();
        if let Some(user_id) = user_id {
            if let Some(user) = self.users.get(&user_id) {
                client.clone_from(&user.nickname);
            } else if let Some(user) = self.registering_users.get(&user_id) {
                client = user.maybe_nickname();
            }
        }

        if !nickname_is_valid(nickname) {
            return Err(ServerStateError::ErroneousNickname {
                client,
                nickname: nickname.into(),
            });
        }

        let another_user_has_same_nick = self
            .users
            .values()
            .filter(|u| Some(u.user_id) != user_id)
            .any(|u| u.nickname.eq_ignore_ascii_case(nickname));
        let another_ruser_has_same_nick = self
            .registering_users
            .values()
            .filter(|u| Some(u.user_id) != user_id)
            .any(|u| {
                u.nickname
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(nickname))
            });

        if another_user_has_same_nick || another_ruser_has_same_nick {
            return Err(ServerStateError::NicknameInUse {
                client,
                nickname: nickname.into(),
            });
        }

        Ok(())
    }
}

/// Functions for registering users
impl ServerState {
    pub(crate) fn ruser_sends_invalid_message(
        &self,
        user_state: RegisteringState,
        error: MessageDecodingError,
    ) -> UserState {
        let sv = self.0.read();

        let user_id = user_state.user_id;
        let client = sv.get_ruser(user_id).maybe_nickname();
        let err = ServerStateError::from_decoding_error_with_client(error, client);
        sv.send_error(user_id, err);
        UserState::Registering(user_state)
    }

    pub(crate) fn ruser_uses_nick(&self, user_state: RegisteringState, nick: &str) -> UserState {
        {
            let mut sv = self.0.write();

            let user_id = user_state.user_id;
            if let Err(err) = sv.check_nickname(nick, Some(user_id)) {
                sv.send_error(user_id, err);
                return UserState::Registering(user_state);
            }
            let user = sv.get_mut_ruser(user_id);
            user.nickname = Some(nick.into());
        }

        self.check_ruser_registration_state(user_state)
    }

    pub(crate) fn ruser_uses_username(
        &self,
        user_state: RegisteringState,
        username: &str,
    ) -> UserState {
        {
            let mut sv = self.0.write();
            let user = sv.get_mut_ruser(user_state.user_id);
            user.username = Some(username.into());
        }

        self.check_ruser_registration_state(user_state)
    }

    pub(crate) fn ruser_sends_command_but_is_not_registered(
        &self,
        user_state: RegisteringState,
    ) -> UserState {
        let sv = self.0.read();

        let user = sv.get_ruser(user_state.user_id);
        let message = server_to_client::Message::Err(ServerStateError::NotRegistered {
            client: user.maybe_nickname(),
        });
        user.send(&message, &sv.message_context);
        UserState::Registering(user_state)
    }

    fn check_ruser_registration_state(&self, user_state: RegisteringState) -> UserState {
        let mut sv = self.0.write();

        let user_id = user_state.user_id;
        let Entry::Occupied(user) = sv.registering_users.entry(user_id) else {
            return UserState::Disconnected;
        };

        if !user.get().is_ready() {
            return UserState::Registering(user_state);
        }

        let user = user.remove();
        let liveness = Liveness::new(Instant::now(), sv.keepalive_timeout);
        let Some(user) = user.into_registered(liveness) else {
            return UserState::Disconnected;
        };
        log::debug!("user registered: {}", user.mask());
        sv.user_registers(user);
        UserState::Registered(RegisteredState { user_id })
    }

    pub(crate) fn ruser_disconnects_voluntarily(
        &self,
        user_state: RegisteringState,
        reason: Option<&[u8]>,
    ) -> UserState {
        let mut sv = self.0.write();

        let user_id = user_state.user_id;
        let Entry::Occupied(user) = sv.registering_users.entry(user_id) else {
            return UserState::Disconnected;
        };
        let user = user.remove();

        let reason = closing_link(&sv.server_name, reason.unwrap_or(b"Client quit"));
        let message = server_to_client::Message::FatalError { reason: &reason };
        user.send(&message, &sv.message_context);
        UserState::Disconnected
    }
}

impl ServerStateInner {
    fn user_registers(&mut self, user: RegisteredUser) {
        let motd = self.motd_provider.motd();
        let message = server_to_client::Message::Motd {
            client: &user.nickname,
            motd: motd.as_deref(),
        };
        user.send(&message, &self.message_context);

        self.users.insert(user.user_id, user);
    }
}

/// Functions for registered users
impl ServerState {
    pub(crate) fn user_sends_invalid_message(
        &self,
        user_state: RegisteredState,
        error: MessageDecodingError,
    ) -> UserState {
        let sv = self.0.read();

        let user_id = user_state.user_id;
        let client = sv.users[&user_id].nickname.clone();
        let err = ServerStateError::from_decoding_error_with_client(error, client);
        sv.send_error(user_id, err);
        UserState::Registered(user_state)
    }

    pub(crate) fn user_sends_unknown_command(
        &self,
        user_state: RegisteredState,
        command: &str,
    ) -> UserState {
        let sv = self.0.read();

        let user = &sv.users[&user_state.user_id];
        let message = server_to_client::Message::Err(ServerStateError::UnknownCommand {
            client: user.nickname.clone(),
            command: command.to_owned(),
        });
        user.send(&message, &sv.message_context);
        UserState::Registered(user_state)
    }

    pub(crate) fn user_changes_nick(&self, user_state: RegisteredState, new_nick: &str) -> UserState {
        let mut sv = self.0.write();

        let user_id = user_state.user_id;
        if let Err(err) = sv.user_changes_nick(user_id, new_nick) {
            sv.send_error(user_id, err);
        }

        UserState::Registered(user_state)
    }

    pub(crate) fn user_joins_channel(
        &self,
        user_state: RegisteredState,
        channel_name: &str,
    ) -> UserState {
        let mut sv = self.0.write();

        let user_id = user_state.user_id;
        if let Err(err) = sv.user_joins_channel(user_id, channel_name) {
            sv.send_error(user_id, err);
        }

        UserState::Registered(user_state)
    }

    pub(crate) fn user_leaves_channel(
        &self,
        user_state: RegisteredState,
        channel_name: &str,
    ) -> UserState {
        let mut sv = self.0.write();

        let user_id = user_state.user_id;
        if let Err(err) = sv.user_leaves_channel(user_id, channel_name) {
            sv.send_error(user_id, err);
        }

        UserState::Registered(user_state)
    }

    pub(crate) fn user_messages_target(
        &self,
        user_state: RegisteredState,
        target: &str,
        content: &[u8],
    ) -> UserState {
        let sv = self.0.read();

        let user_id = user_state.user_id;
        if let Err(err) = sv.user_messages_target(user_id, target, content) {
            sv.send_error(user_id, err);
        }

        UserState::Registered(user_state)
    }

    pub(crate) fn user_wants_topic(
        &self,
        user_state: RegisteredState,
        channel_name: &str,
    ) -> UserState {
        let sv = self.0.read();

        let user_id = user_state.user_id;
        if let Err(err) = sv.user_wants_topic(user_id, channel_name) {
            sv.send_error(user_id, err);
        }

        UserState::Registered(user_state)
    }

    pub(crate) fn user_sets_topic(
        &self,
        user_state: RegisteredState,
        channel_name: &str,
        content: &[u8],
    ) -> UserState {
        let mut sv = self.0.write();

        let user_id = user_state.user_id;
        if let Err(err) = sv.user_sets_topic(user_id, channel_name, content) {
            sv.send_error(user_id, err);
        }

        UserState::Registered(user_state)
    }

    pub(crate) fn user_kicks(
        &self,
        user_state: RegisteredState,
        channel_name: &str,
        target_nick: &str,
        reason: Option<&[u8]>,
    ) -> UserState {
        let mut sv = self.0.write();

        let user_id = user_state.user_id;
        if let Err(err) = sv.user_kicks(user_id, channel_name, target_nick, reason) {
            sv.send_error(user_id, err);
        }

        UserState::Registered(user_state)
    }

    pub(crate) fn user_asks_channel_mode(
        &self,
        user_state: RegisteredState,
        channel_name: &str,
    ) -> UserState {
        let sv = self.0.read();

        let user_id = user_state.user_id;
        if let Err(err) = sv.user_asks_channel_mode(user_id, channel_name) {
            sv.send_error(user_id, err);
        }

        UserState::Registered(user_state)
    }

    pub(crate) fn user_changes_channel_mode(
        &self,
        user_state: RegisteredState,
        channel_name: &str,
        modestring: &str,
        args: &[&str],
    ) -> UserState {
        let mut sv = self.0.write();

        let user_id = user_state.user_id;
        if let Err(err) = sv.user_changes_channel_mode(user_id, channel_name, modestring, args) {
            sv.send_error(user_id, err);
        }

        UserState::Registered(user_state)
    }

    pub(crate) fn user_indicates_away(
        &self,
        user_state: RegisteredState,
        away_message: Option<&[u8]>,
    ) -> UserState {
        let mut sv = self.0.write();
        sv.user_indicates_away(user_state.user_id, away_message);
        UserState::Registered(user_state)
    }

    pub(crate) fn user_pongs(&self, user_state: RegisteredState, token: &[u8]) -> UserState {
        let mut sv = self.0.write();

        let user_id = user_state.user_id;
        if token == sv.server_name.as_bytes() {
            sv.get_mut_user(user_id).liveness.on_pong();
        } else {
            let client = sv.users[&user_id].nickname.clone();
            sv.send_error(user_id, ServerStateError::NoOrigin { client });
        }

        UserState::Registered(user_state)
    }

    pub(crate) fn user_checks_liveness(&self, user_state: RegisteredState) -> UserState {
        let mut sv = self.0.write();

        let user_id = user_state.user_id;
        let now = Instant::now();
        match sv.users[&user_id].liveness.check(now) {
            LivenessStatus::Healthy => UserState::Registered(user_state),
            LivenessStatus::SendProbe => {
                sv.get_mut_user(user_id).liveness.on_probe(now);
                let token = sv.server_name.clone().into_bytes();
                let message = server_to_client::Message::Ping { token: &token };
                sv.users[&user_id].send(&message, &sv.message_context);
                UserState::Registered(user_state)
            }
            LivenessStatus::Dead(elapsed) => {
                log::debug!(
                    "{}: no pong after {elapsed:?}, dropping",
                    sv.users[&user_id].nickname
                );
                sv.remove_user(user_id, b"Remote host closed the connection");
                UserState::Disconnected
            }
        }
    }

    pub(crate) fn user_disconnects_voluntarily(
        &self,
        user_state: RegisteredState,
        reason: Option<&[u8]>,
    ) -> UserState {
        let mut sv = self.0.write();

        let user_id = user_state.user_id;
        let reason = reason.unwrap_or(b"Client quit");

        let closing = closing_link(&sv.server_name, reason);
        let message = server_to_client::Message::FatalError { reason: &closing };
        sv.users[&user_id].send(&message, &sv.message_context);

        sv.remove_user(user_id, reason);
        UserState::Disconnected
    }
}

impl ServerStateInner {
    fn user_changes_nick(&mut self, user_id: UserID, new_nick: &str) -> Result<(), ServerStateError> {
        self.check_nickname(new_nick, Some(user_id))?;

        let user = self.get_mut_user(user_id);
        if user.nickname == new_nick {
            return Ok(());
        }

        let previous_mask = user.mask();
        let old_nick = std::mem::replace(&mut user.nickname, new_nick.to_string());

        // notify the user and every member of every channel they share,
        // exactly once each
        let mut recipients = HashSet::new();
        recipients.insert(user_id);
        for channel in self.channels.values_mut() {
            if channel.users.contains(&user_id) {
                if channel.revoke_operator(&old_nick) {
                    channel.grant_operator(new_nick);
                }
                recipients.extend(channel.users.iter().copied());
            }
        }

        let message = server_to_client::Message::Nick {
            previous_mask: &previous_mask,
            nickname: new_nick,
        };
        for user_id in recipients {
            self.users[&user_id].send(&message, &self.message_context);
        }

        Ok(())
    }

    fn user_joins_channel(
        &mut self,
        user_id: UserID,
        channel_name: &str,
    ) -> Result<(), ServerStateError> {
        let user = &self.users[&user_id];

        if !channel_name_is_valid(channel_name) {
            return Err(ServerStateError::NoSuchChannel {
                client: user.nickname.clone(),
                channel: channel_name.to_string(),
            });
        }

        let key = channel_name.to_ascii_lowercase();
        match self.channels.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let channel = entry.get_mut();
                // the ban is checked first: a banned user who is still a
                // member gets 474 on a re-join, not a silent no-op
                if channel.is_banned(user) {
                    return Err(ServerStateError::BannedFromChan {
                        client: user.nickname.clone(),
                        channel: channel.name.clone(),
                    });
                }
                if channel.users.contains(&user_id) {
                    return Ok(());
                }
                channel.users.insert(user_id);
            }
            Entry::Vacant(entry) => {
                let mut channel = Channel::new(channel_name, user);
                channel.users.insert(user_id);
                entry.insert(channel);
            }
        }

        let channel = &self.channels[&key];
        let joiner_mask = user.mask();
        let message = server_to_client::Message::Join {
            channel: &channel.name,
            user_mask: &joiner_mask,
        };
        for user_id in &channel.users {
            self.users[user_id].send(&message, &self.message_context);
        }

        if let Some(topic) = &channel.topic {
            let message = server_to_client::Message::RplTopic {
                client: &user.nickname,
                channel: &channel.name,
                topic: Some(topic.as_slice()),
            };
            user.send(&message, &self.message_context);
        }

        // joiner first, then the other members
        let mut nicknames = vec![format!("{}{}", channel.member_prefix(user), user.nickname)];
        for member_id in &channel.users {
            if *member_id == user_id {
                continue;
            }
            let member = &self.users[member_id];
            nicknames.push(format!("{}{}", channel.member_prefix(member), member.nickname));
        }
        let message = server_to_client::Message::Names {
            client: &user.nickname,
            channel: &channel.name,
            nicknames: &nicknames,
        };
        user.send(&message, &self.message_context);

        Ok(())
    }

    fn user_leaves_channel(
        &mut self,
        user_id: UserID,
        channel_name: &str,
    ) -> Result<(), ServerStateError> {
        let user = &self.users[&user_id];

        let key = channel_name.to_ascii_lowercase();
        let Some(channel) = self.channels.get_mut(&key) else {
            return Err(ServerStateError::NoSuchChannel {
                client: user.nickname.clone(),
                channel: channel_name.to_string(),
            });
        };

        channel.ensure_member(user)?;

        let mask = user.mask();
        let message = server_to_client::Message::Part {
            user_mask: &mask,
            channel: &channel.name,
        };
        for user_id in &channel.users {
            self.users[user_id].send(&message, &self.message_context);
        }

        channel.users.remove(&user_id);
        channel.revoke_operator(&user.nickname);
        if channel.users.is_empty() {
            self.channels.remove(&key);
        }

        Ok(())
    }

    fn user_messages_target(
        &self,
        user_id: UserID,
        target: &str,
        content: &[u8],
    ) -> Result<(), ServerStateError> {
        let user = &self.users[&user_id];

        if target.starts_with('#') {
            let Some(channel) = self.channels.get(&target.to_ascii_lowercase()) else {
                return Err(ServerStateError::NoSuchChannel {
                    client: user.nickname.clone(),
                    channel: target.to_string(),
                });
            };

            channel.ensure_member(user)?;

            if channel.is_banned(user) {
                return Err(ServerStateError::CannotSendToChan {
                    client: user.nickname.clone(),
                    channel: channel.name.clone(),
                });
            }

            let mask = user.mask();
            let message = server_to_client::Message::PrivMsg {
                from_mask: &mask,
                target: &channel.name,
                content,
            };
            channel
                .users
                .iter()
                .filter(|&uid| *uid != user_id)
                .flat_map(|uid| self.users.get(uid))
                .for_each(|u| u.send(&message, &self.message_context));
        } else {
            let Some(target_user) = self.find_user_by_nick(target) else {
                return Err(ServerStateError::NoSuchNick {
                    client: user.nickname.clone(),
                    target: target.to_string(),
                });
            };

            let mask = user.mask();
            let message = server_to_client::Message::PrivMsg {
                from_mask: &mask,
                target: &target_user.nickname,
                content,
            };
            target_user.send(&message, &self.message_context);

            if let Some(away_message) = &target_user.away_message {
                let message = server_to_client::Message::RplAway {
                    client: &user.nickname,
                    target_nickname: &target_user.nickname,
                    away_message,
                };
                user.send(&message, &self.message_context);
            }
        }

        Ok(())
    }

    fn user_wants_topic(&self, user_id: UserID, channel_name: &str) -> Result<(), ServerStateError> {
        let user = &self.users[&user_id];

        let Some(channel) = self.channels.get(&channel_name.to_ascii_lowercase()) else {
            return Err(ServerStateError::NoSuchChannel {
                client: user.nickname.clone(),
                channel: channel_name.to_string(),
            });
        };

        let message = server_to_client::Message::RplTopic {
            client: &user.nickname,
            channel: &channel.name,
            topic: channel.topic.as_deref(),
        };
        user.send(&message, &self.message_context);
        Ok(())
    }

    fn user_sets_topic(
        &mut self,
        user_id: UserID,
        channel_name: &str,
        content: &[u8],
    ) -> Result<(), ServerStateError> {
        let user = &self.users[&user_id];

        let Some(channel) = self.channels.get_mut(&channel_name.to_ascii_lowercase()) else {
            return Err(ServerStateError::NoSuchChannel {
                client: user.nickname.clone(),
                channel: channel_name.to_string(),
            });
        };

        channel.ensure_operator(user)?;

        // an empty topic clears; the clear is still broadcast
        if content.is_empty() {
            channel.topic = None;
        } else {
            channel.topic = Some(content.to_vec());
        }

        let mask = user.mask();
        let message = server_to_client::Message::Topic {
            user_mask: &mask,
            channel: &channel.name,
            topic: content,
        };
        channel
            .users
            .iter()
            .flat_map(|uid| self.users.get(uid))
            .for_each(|u| u.send(&message, &self.message_context));
        Ok(())
    }

    fn user_kicks(
        &mut self,
        user_id: UserID,
        channel_name: &str,
        target_nick: &str,
        reason: Option<&[u8]>,
    ) -> Result<(), ServerStateError> {
        let user = &self.users[&user_id];

        let key = channel_name.to_ascii_lowercase();
        let Some(channel) = self.channels.get_mut(&key) else {
            return Err(ServerStateError::NoSuchChannel {
                client: user.nickname.clone(),
                channel: channel_name.to_string(),
            });
        };

        let Some(target) = self
            .users
            .values()
            .find(|u| u.nickname.eq_ignore_ascii_case(target_nick))
        else {
            return Err(ServerStateError::NoSuchNick {
                client: user.nickname.clone(),
                target: target_nick.to_string(),
            });
        };

        if !channel.users.contains(&target.user_id) {
            return Err(ServerStateError::UserNotInChannel {
                client: user.nickname.clone(),
                nickname: target_nick.to_string(),
                channel: channel.name.clone(),
            });
        }

        channel.ensure_operator(user)?;

        let kicker_mask = user.mask();
        let reason = reason.unwrap_or(target.nickname.as_bytes());
        let message = server_to_client::Message::Kick {
            kicker_mask: &kicker_mask,
            channel: &channel.name,
            target_nickname: &target.nickname,
            reason,
        };
        for user_id in &channel.users {
            self.users[user_id].send(&message, &self.message_context);
        }

        let target_id = target.user_id;
        let target_nickname = target.nickname.clone();
        channel.users.remove(&target_id);
        channel.revoke_operator(&target_nickname);
        if channel.users.is_empty() {
            self.channels.remove(&key);
        }

        Ok(())
    }

    fn user_asks_channel_mode(
        &self,
        user_id: UserID,
        channel_name: &str,
    ) -> Result<(), ServerStateError> {
        let user = &self.users[&user_id];

        let Some(channel) = self.channels.get(&channel_name.to_ascii_lowercase()) else {
            return Err(ServerStateError::NoSuchChannel {
                client: user.nickname.clone(),
                channel: channel_name.to_string(),
            });
        };

        let modes = channel.mode_string();
        let message = server_to_client::Message::ChannelModeIs {
            client: &user.nickname,
            channel: &channel.name,
            modes: &modes,
        };
        user.send(&message, &self.message_context);
        Ok(())
    }

    fn user_changes_channel_mode(
        &mut self,
        user_id: UserID,
        channel_name: &str,
        modestring: &str,
        args: &[&str],
    ) -> Result<(), ServerStateError> {
        let user = &self.users[&user_id];

        let Some(channel) = self.channels.get_mut(&channel_name.to_ascii_lowercase()) else {
            return Err(ServerStateError::NoSuchChannel {
                client: user.nickname.clone(),
                channel: channel_name.to_string(),
            });
        };

        let mut chars = modestring.chars();
        let adding = match chars.next() {
            Some('+') => true,
            Some('-') => false,
            _ => {
                return Err(ServerStateError::UnknownMode {
                    client: user.nickname.clone(),
                    modechar: modestring.to_string(),
                });
            }
        };
        let flags: Vec<char> = chars.collect();

        // refuse the whole command before applying anything
        if let Some(bad) = flags.iter().find(|c| !matches!(c, 'o' | 'b')) {
            return Err(ServerStateError::UnknownMode {
                client: user.nickname.clone(),
                modechar: bad.to_string(),
            });
        }

        let mut args = args.iter();
        for flag in flags {
            match flag {
                'o' => {
                    let Some(target_nick) = args.next() else {
                        return Err(ServerStateError::NeedMoreParams {
                            client: user.nickname.clone(),
                            command: "MODE".to_string(),
                        });
                    };
                    let Some(target) = self
                        .users
                        .values()
                        .find(|u| u.nickname.eq_ignore_ascii_case(target_nick))
                    else {
                        return Err(ServerStateError::NoSuchNick {
                            client: user.nickname.clone(),
                            target: target_nick.to_string(),
                        });
                    };
                    if !channel.users.contains(&target.user_id) {
                        return Err(ServerStateError::UserNotInChannel {
                            client: user.nickname.clone(),
                            nickname: target_nick.to_string(),
                            channel: channel.name.clone(),
                        });
                    }
                    channel.ensure_operator(user)?;

                    let changed = if adding {
                        channel.grant_operator(&target.nickname)
                    } else {
                        channel.revoke_operator(&target.nickname)
                    };
                    if changed {
                        let mask = user.mask();
                        let message = server_to_client::Message::Mode {
                            user_mask: &mask,
                            channel: &channel.name,
                            modechar: if adding { "+o" } else { "-o" },
                            param: Some(&target.nickname),
                        };
                        for user_id in &channel.users {
                            self.users[user_id].send(&message, &self.message_context);
                        }
                    }
                }
                'b' => {
                    let Some(mask_arg) = args.next() else {
                        // a bare +b lists the bans; no privilege needed
                        let entries: Vec<BanListEntry<'_>> = channel
                            .bans
                            .iter()
                            .map(|b| BanListEntry {
                                mask: b.mask.to_string(),
                                set_by: &b.set_by,
                            })
                            .collect();
                        let message = server_to_client::Message::BanList {
                            client: &user.nickname,
                            channel: &channel.name,
                            entries: &entries,
                        };
                        user.send(&message, &self.message_context);
                        continue;
                    };

                    channel.ensure_operator(user)?;

                    // a mask that doesn't parse is silently dropped
                    let Some(mask) = BanMask::parse(mask_arg) else {
                        continue;
                    };

                    let changed = if adding {
                        if channel.find_ban(&mask).is_none() {
                            channel.bans.push(BanEntry {
                                mask: mask.clone(),
                                set_by: user.mask(),
                            });
                            true
                        } else {
                            false
                        }
                    } else if let Some(index) = channel.find_ban(&mask) {
                        channel.bans.remove(index);
                        true
                    } else {
                        false
                    };

                    if changed {
                        let user_mask = user.mask();
                        let mask_text = mask.to_string();
                        let message = server_to_client::Message::Mode {
                            user_mask: &user_mask,
                            channel: &channel.name,
                            modechar: if adding { "+b" } else { "-b" },
                            param: Some(&mask_text),
                        };
                        for user_id in &channel.users {
                            self.users[user_id].send(&message, &self.message_context);
                        }
                    }
                }
                _ => unreachable!("flags are validated above"),
            }
        }

        Ok(())
    }

    fn user_indicates_away(&mut self, user_id: UserID, away_message: Option<&[u8]>) {
        let user = self.get_mut_user(user_id);
        user.away_message = away_message.map(|m| m.into());

        let user = &self.users[&user_id];
        let message = if user.is_away() {
            server_to_client::Message::NowAway {
                client: &user.nickname,
            }
        } else {
            server_to_client::Message::UnAway {
                client: &user.nickname,
            }
        };
        user.send(&message, &self.message_context);
    }

    /// Full teardown of a registered user: QUIT to every peer sharing a
    /// channel (once each), membership and operator entries dropped, empty
    /// channels deleted.
    fn remove_user(&mut self, user_id: UserID, reason: &[u8]) {
        let Some(user) = self.users.get(&user_id) else {
            return;
        };
        let mask = user.mask();
        let nickname = user.nickname.clone();

        let mut recipients = HashSet::new();
        for channel in self.channels.values_mut() {
            if channel.users.remove(&user_id) {
                channel.revoke_operator(&nickname);
                recipients.extend(channel.users.iter().copied());
            }
        }

        let message = server_to_client::Message::Quit {
            user_mask: &mask,
            reason,
        };
        for user_id in recipients {
            self.users[&user_id].send(&message, &self.message_context);
        }

        self.channels.retain(|_, channel| !channel.users.is_empty());
        self.users.remove(&user_id);
    }
}

fn closing_link(server_name: &str, reason: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(server_name.len() + reason.len() + 17);
    full.extend_from_slice(b"Closing Link: ");
    full.extend_from_slice(server_name.as_bytes());
    full.extend_from_slice(b" (");
    full.extend_from_slice(reason);
    full.push(b')');
    full
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic_in_result_fn)] // fine in tests
    use super::*;

    struct FixedMotd(Option<Vec<String>>);

    impl MotdProvider for FixedMotd {
        fn motd(&self) -> Option<Vec<String>> {
            self.0.clone()
        }
    }

    fn new_server_state() -> ServerState {
        ServerState::new("srv", Arc::new(FixedMotd(None)), None)
    }

    fn collect(sink: &mut MailboxSink) -> Vec<String> {
        let mut lines = vec![];
        while let Ok(line) = sink.try_recv() {
            lines.push(String::from_utf8(line).unwrap());
        }
        lines
    }

    fn registering(state: UserState) -> RegisteringState {
        match state {
            UserState::Registering(state) => state,
            other => panic!("expected a registering state, got {other:?}"),
        }
    }

    fn registered(state: UserState) -> RegisteredState {
        match state {
            UserState::Registered(state) => state,
            other => panic!("expected a registered state, got {other:?}"),
        }
    }

    /// Registers `nick` with the username equal to the nick.
    fn register(server: &ServerState, nick: &str) -> (RegisteredState, MailboxSink) {
        let (_, state, mut sink) = server.new_registering_user("localhost");
        let state = server.ruser_uses_nick(registering(state), nick);
        let state = server.ruser_uses_username(registering(state), nick);
        let state = registered(state);
        collect(&mut sink);
        (state, sink)
    }

    fn assert_line(lines: &[String], expected: &str) {
        assert!(
            lines.iter().any(|l| l == &format!("{expected}\r\n")),
            "expected {expected:?} in {lines:?}"
        );
    }

    #[test]
    fn registration_requires_nick_and_user() {
        let server = new_server_state();
        let (_, state, mut sink) = server.new_registering_user("localhost");
        let state = server.ruser_uses_nick(registering(state), "alice");
        assert!(collect(&mut sink).is_empty());
        let state = server.ruser_uses_username(registering(state), "adm");
        registered(state);
        assert_line(&collect(&mut sink), ":srv 422 alice :MOTD File is missing");
    }

    #[test]
    fn motd_substitutes_the_nickname() {
        let motd = FixedMotd(Some(vec!["Welcome {user_nick}!".to_string()]));
        let server = ServerState::new("srv", Arc::new(motd), None);
        let (_, state, mut sink) = server.new_registering_user("localhost");
        let state = server.ruser_uses_nick(registering(state), "alice");
        server.ruser_uses_username(registering(state), "adm");
        let lines = collect(&mut sink);
        assert_line(&lines, ":srv 375 alice :- srv Message of the day - ");
        assert_line(&lines, ":srv 372 alice :- Welcome alice!");
        assert_line(&lines, ":srv 376 alice :End of /MOTD command.");
    }

    #[test]
    fn commands_before_registration_are_rejected() {
        let server = new_server_state();
        let (_, state, mut sink) = server.new_registering_user("localhost");
        let (_, message) = skiff_parser::parse_message(b"JOIN #pub").unwrap();
        let state = state.handle_message(&server, message);
        assert!(state.is_alive());
        assert_line(&collect(&mut sink), ":srv 451 * :You have not registered");
    }

    #[test]
    fn nickname_collision_is_case_insensitive() {
        let server = new_server_state();
        let _alice = register(&server, "alice");
        let (_, state, mut sink) = server.new_registering_user("localhost");
        server.ruser_uses_nick(registering(state), "ALICE");
        assert_line(
            &collect(&mut sink),
            ":srv 433 * ALICE :Nickname is already in use",
        );
    }

    #[test]
    fn erroneous_nickname_is_rejected() {
        let server = new_server_state();
        let (_, state, mut sink) = server.new_registering_user("localhost");
        server.ruser_uses_nick(registering(state), "1alice");
        assert_line(&collect(&mut sink), ":srv 432 * 1alice :Erroneous nickname");
    }

    #[test]
    fn joining_creates_the_channel_with_a_founder() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        registered(server.user_joins_channel(alice, "#pub"));
        let lines = collect(&mut sink_a);
        assert_line(&lines, ":alice!alice@localhost JOIN #pub");
        assert_line(&lines, ":srv 353 alice = #pub :~alice");
        assert_line(&lines, ":srv 366 alice #pub :End of /NAMES list.");
    }

    #[test]
    fn joining_is_announced_to_the_members() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, mut sink_b) = register(&server, "bob");
        registered(server.user_joins_channel(alice, "#pub"));
        collect(&mut sink_a);

        // the key is case-folded, the display name is the creator's spelling
        registered(server.user_joins_channel(bob, "#PUB"));
        assert_line(&collect(&mut sink_a), ":bob!bob@localhost JOIN #pub");
        let lines = collect(&mut sink_b);
        assert_line(&lines, ":bob!bob@localhost JOIN #pub");
        assert_line(&lines, ":srv 353 bob = #pub :bob ~alice");
    }

    #[test]
    fn invalid_channel_name_is_no_such_channel() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        registered(server.user_joins_channel(alice, "pub"));
        assert_line(&collect(&mut sink_a), ":srv 403 alice pub :No such channel");
    }

    #[test]
    fn parting_is_broadcast_and_empty_channels_are_deleted() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, mut sink_b) = register(&server, "bob");
        let (carol, mut sink_c) = register(&server, "carol");
        let alice = registered(server.user_joins_channel(alice, "#pub"));
        let bob = registered(server.user_joins_channel(bob, "#pub"));
        collect(&mut sink_a);
        collect(&mut sink_b);

        // not a member
        registered(server.user_leaves_channel(carol, "#pub"));
        assert_line(
            &collect(&mut sink_c),
            ":srv 442 carol #pub :You're not on that channel",
        );

        let alice = registered(server.user_changes_channel_mode(alice, "#pub", "+o", &["bob"]));
        collect(&mut sink_a);
        collect(&mut sink_b);

        // the leaver sees their own PART too
        let bob = registered(server.user_leaves_channel(bob, "#pub"));
        assert_line(&collect(&mut sink_a), ":bob!bob@localhost PART #pub");
        assert_line(&collect(&mut sink_b), ":bob!bob@localhost PART #pub");

        // operator status did not survive leaving
        let bob = registered(server.user_joins_channel(bob, "#pub"));
        assert_line(&collect(&mut sink_b), ":srv 353 bob = #pub :bob ~alice");
        let bob = registered(server.user_leaves_channel(bob, "#pub"));
        collect(&mut sink_b);

        let alice = registered(server.user_leaves_channel(alice, "#pub"));
        assert_line(&collect(&mut sink_a), ":alice!alice@localhost PART #pub");

        // the last member out deleted the channel
        registered(server.user_messages_target(alice, "#pub", b"anyone?"));
        assert_line(&collect(&mut sink_a), ":srv 403 alice #pub :No such channel");
        registered(server.user_leaves_channel(bob, "#pub"));
        assert_line(&collect(&mut sink_b), ":srv 403 bob #pub :No such channel");
    }

    #[test]
    fn banned_member_rejoining_gets_the_ban_reply() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, mut sink_b) = register(&server, "bob");
        let alice = registered(server.user_joins_channel(alice, "#pub"));
        let bob = registered(server.user_joins_channel(bob, "#pub"));
        collect(&mut sink_a);
        collect(&mut sink_b);

        // re-joining as a plain member is a silent no-op
        let bob = registered(server.user_joins_channel(bob, "#pub"));
        assert!(collect(&mut sink_b).is_empty());

        registered(server.user_changes_channel_mode(alice, "#pub", "+b", &["bob"]));
        collect(&mut sink_b);

        // still a member, but the ban answers before the membership no-op
        registered(server.user_joins_channel(bob, "#pub"));
        assert_line(
            &collect(&mut sink_b),
            ":srv 474 bob #pub :Cannot join channel (+b)",
        );
    }

    #[test]
    fn channel_messages_reach_everyone_but_the_sender() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, mut sink_b) = register(&server, "bob");
        let (carol, mut sink_c) = register(&server, "carol");
        let alice = registered(server.user_joins_channel(alice, "#pub"));
        registered(server.user_joins_channel(bob, "#pub"));
        collect(&mut sink_a);
        collect(&mut sink_b);

        let alice = registered(server.user_messages_target(alice, "#pub", b"hi all"));
        assert_line(&collect(&mut sink_b), ":alice!alice@localhost PRIVMSG #pub :hi all");
        assert!(collect(&mut sink_a).is_empty());

        // not a member
        registered(server.user_messages_target(carol, "#pub", b"hi"));
        assert_line(
            &collect(&mut sink_c),
            ":srv 442 carol #pub :You're not on that channel",
        );

        // no such channel
        registered(server.user_messages_target(alice, "#nope", b"hi"));
        assert_line(&collect(&mut sink_a), ":srv 403 alice #nope :No such channel");
    }

    #[test]
    fn direct_messages_and_away_replies() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, mut sink_b) = register(&server, "bob");

        let bob = registered(server.user_indicates_away(bob, Some(b"gone fishing")));
        assert_line(
            &collect(&mut sink_b),
            ":srv 306 bob :You have been marked as being away",
        );

        let alice = registered(server.user_messages_target(alice, "bob", b"you there?"));
        assert_line(
            &collect(&mut sink_b),
            ":alice!alice@localhost PRIVMSG bob :you there?",
        );
        assert_line(&collect(&mut sink_a), ":srv 301 alice bob :gone fishing");

        registered(server.user_indicates_away(bob, None));
        assert_line(
            &collect(&mut sink_b),
            ":srv 305 bob :You are no longer marked as being away",
        );

        registered(server.user_messages_target(alice, "nobody", b"hello"));
        assert_line(
            &collect(&mut sink_a),
            ":srv 401 alice nobody :No such nick/channel",
        );
    }

    #[test]
    fn topic_can_be_set_by_operators_only() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, mut sink_b) = register(&server, "bob");
        let (carol, mut sink_c) = register(&server, "carol");
        let alice = registered(server.user_joins_channel(alice, "#pub"));
        let bob = registered(server.user_joins_channel(bob, "#pub"));
        collect(&mut sink_a);
        collect(&mut sink_b);

        let bob = registered(server.user_sets_topic(bob, "#pub", b"my topic"));
        assert_line(
            &collect(&mut sink_b),
            ":srv 482 bob #pub :You're not channel operator",
        );

        // membership is checked before privilege
        let carol = registered(server.user_sets_topic(carol, "#pub", b"my topic"));
        assert_line(
            &collect(&mut sink_c),
            ":srv 442 carol #pub :You're not on that channel",
        );

        let alice = registered(server.user_sets_topic(alice, "#pub", b"launch at noon"));
        assert_line(
            &collect(&mut sink_b),
            ":alice!alice@localhost TOPIC #pub :launch at noon",
        );

        // anyone can query, members or not
        let carol = registered(server.user_wants_topic(carol, "#pub"));
        assert_line(&collect(&mut sink_c), ":srv 332 carol #pub :launch at noon");

        // a later joiner sees the topic
        registered(server.user_joins_channel(carol, "#pub"));
        assert_line(&collect(&mut sink_c), ":srv 332 carol #pub :launch at noon");

        // an empty topic clears, and the clear is broadcast
        registered(server.user_sets_topic(alice, "#pub", b""));
        assert_line(&collect(&mut sink_b), ":alice!alice@localhost TOPIC #pub :");
        registered(server.user_wants_topic(bob, "#pub"));
        assert_line(&collect(&mut sink_b), ":srv 331 bob #pub :No topic is set");
    }

    #[test]
    fn kick_authority_and_default_reason() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, mut sink_b) = register(&server, "bob");
        let (_carol, _sink_c) = register(&server, "carol");
        let alice = registered(server.user_joins_channel(alice, "#pub"));
        let bob = registered(server.user_joins_channel(bob, "#pub"));
        collect(&mut sink_a);
        collect(&mut sink_b);

        let bob = registered(server.user_kicks(bob, "#pub", "alice", None));
        assert_line(
            &collect(&mut sink_b),
            ":srv 482 bob #pub :You're not channel operator",
        );

        let alice = registered(server.user_kicks(alice, "#nope", "bob", None));
        assert_line(&collect(&mut sink_a), ":srv 403 alice #nope :No such channel");

        let alice = registered(server.user_kicks(alice, "#pub", "nobody", None));
        assert_line(
            &collect(&mut sink_a),
            ":srv 401 alice nobody :No such nick/channel",
        );

        let alice = registered(server.user_kicks(alice, "#pub", "carol", None));
        assert_line(
            &collect(&mut sink_a),
            ":srv 441 alice carol #pub :They aren't on that channel",
        );

        let alice = registered(server.user_kicks(alice, "#pub", "bob", None));
        assert_line(&collect(&mut sink_b), ":alice!alice@localhost KICK #pub bob :bob");
        assert_line(&collect(&mut sink_a), ":alice!alice@localhost KICK #pub bob :bob");

        // bob is gone
        registered(server.user_messages_target(bob, "#pub", b"hello?"));
        assert_line(
            &collect(&mut sink_b),
            ":srv 442 bob #pub :You're not on that channel",
        );

        registered(server.user_kicks(alice, "#pub", "alice", Some(b"self purge")));
        assert_line(
            &collect(&mut sink_a),
            ":alice!alice@localhost KICK #pub alice :self purge",
        );
    }

    #[test]
    fn operator_grant_and_revoke() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, mut sink_b) = register(&server, "bob");
        let alice = registered(server.user_joins_channel(alice, "#pub"));
        let bob = registered(server.user_joins_channel(bob, "#pub"));
        collect(&mut sink_a);
        collect(&mut sink_b);

        let bob = registered(server.user_changes_channel_mode(bob, "#pub", "+o", &["bob"]));
        assert_line(
            &collect(&mut sink_b),
            ":srv 482 bob #pub :You're not channel operator",
        );

        let alice = registered(server.user_changes_channel_mode(alice, "#pub", "+o", &[]));
        assert_line(
            &collect(&mut sink_a),
            ":srv 461 alice MODE :Not enough parameters",
        );

        let alice = registered(server.user_changes_channel_mode(alice, "#pub", "+o", &["bob"]));
        assert_line(&collect(&mut sink_b), ":alice!alice@localhost MODE #pub +o bob");

        // granting twice is not re-announced
        let alice = registered(server.user_changes_channel_mode(alice, "#pub", "+o", &["bob"]));
        assert!(collect(&mut sink_b).is_empty());

        // bob can now use operator commands
        let bob = registered(server.user_sets_topic(bob, "#pub", b"bob was here"));
        assert_line(&collect(&mut sink_a), ":bob!bob@localhost TOPIC #pub :bob was here");

        let alice = registered(server.user_changes_channel_mode(alice, "#pub", "-o", &["bob"]));
        assert_line(&collect(&mut sink_b), ":alice!alice@localhost MODE #pub -o bob");
        registered(server.user_sets_topic(bob, "#pub", b"again"));
        assert_line(
            &collect(&mut sink_b),
            ":srv 482 bob #pub :You're not channel operator",
        );

        registered(server.user_changes_channel_mode(alice, "#pub", "+x", &[]));
        assert_line(
            &collect(&mut sink_a),
            ":srv 472 alice x :is unknown mode char to me",
        );
    }

    #[test]
    fn bans_keep_users_out_and_are_audited() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, mut sink_b) = register(&server, "bob");
        let alice = registered(server.user_joins_channel(alice, "#pub"));
        collect(&mut sink_a);

        let alice = registered(server.user_changes_channel_mode(alice, "#pub", "+b", &["bob"]));
        assert_line(
            &collect(&mut sink_a),
            ":alice!alice@localhost MODE #pub +b bob!*@*",
        );

        let bob = registered(server.user_joins_channel(bob, "#pub"));
        assert_line(
            &collect(&mut sink_b),
            ":srv 474 bob #pub :Cannot join channel (+b)",
        );

        // listing the bans requires no privilege
        let bob = registered(server.user_changes_channel_mode(bob, "#pub", "+b", &[]));
        let lines = collect(&mut sink_b);
        assert_line(&lines, ":srv 367 bob #pub bob!*@* alice!alice@localhost");
        assert_line(&lines, ":srv 368 bob #pub :End of channel ban list");

        // changing them does
        let bob = registered(server.user_changes_channel_mode(bob, "#pub", "-b", &["bob"]));
        assert_line(
            &collect(&mut sink_b),
            ":srv 442 bob #pub :You're not on that channel",
        );

        let alice = registered(server.user_changes_channel_mode(alice, "#pub", "-b", &["bob"]));
        assert_line(
            &collect(&mut sink_a),
            ":alice!alice@localhost MODE #pub -b bob!*@*",
        );
        registered(server.user_joins_channel(bob, "#pub"));
        assert_line(&collect(&mut sink_b), ":bob!bob@localhost JOIN #pub");
        let _ = alice;
    }

    #[test]
    fn banned_member_cannot_send() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, mut sink_b) = register(&server, "bob");
        let alice = registered(server.user_joins_channel(alice, "#pub"));
        let bob = registered(server.user_joins_channel(bob, "#pub"));
        collect(&mut sink_a);
        collect(&mut sink_b);

        registered(server.user_changes_channel_mode(alice, "#pub", "+b", &["bob"]));
        collect(&mut sink_b);
        registered(server.user_messages_target(bob, "#pub", b"hello"));
        assert_line(
            &collect(&mut sink_b),
            ":srv 404 bob #pub :Cannot send to channel",
        );
    }

    #[test]
    fn nick_change_is_broadcast_and_keeps_privileges() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, mut sink_b) = register(&server, "bob");
        let alice = registered(server.user_joins_channel(alice, "#pub"));
        registered(server.user_joins_channel(bob, "#pub"));
        collect(&mut sink_a);
        collect(&mut sink_b);

        let alice = registered(server.user_changes_nick(alice, "alicia"));
        assert_line(&collect(&mut sink_a), ":alice!alice@localhost NICK :alicia");
        assert_line(&collect(&mut sink_b), ":alice!alice@localhost NICK :alicia");

        // operator status survives the rename
        registered(server.user_sets_topic(alice, "#pub", b"still the boss"));
        assert_line(
            &collect(&mut sink_b),
            ":alicia!alice@localhost TOPIC #pub :still the boss",
        );
    }

    #[test]
    fn nick_change_to_taken_nick_is_rejected() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (_bob, _sink_b) = register(&server, "bob");

        let alice = registered(server.user_changes_nick(alice, "BOB"));
        assert_line(
            &collect(&mut sink_a),
            ":srv 433 alice BOB :Nickname is already in use",
        );

        // re-taking one's own nick is a silent no-op
        registered(server.user_changes_nick(alice, "alice"));
        assert!(collect(&mut sink_a).is_empty());
    }

    #[test]
    fn quit_notifies_peers_once_and_closes_the_link() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, mut sink_b) = register(&server, "bob");
        let alice = registered(server.user_joins_channel(alice, "#pub"));
        let alice = registered(server.user_joins_channel(alice, "#ops"));
        let bob = registered(server.user_joins_channel(bob, "#pub"));
        let bob = registered(server.user_joins_channel(bob, "#ops"));
        collect(&mut sink_a);
        collect(&mut sink_b);

        let state = server.user_disconnects_voluntarily(bob, Some(b"bye"));
        assert!(!state.is_alive());
        let lines = collect(&mut sink_a);
        // shared channels notwithstanding, a single QUIT
        assert_eq!(
            lines
                .iter()
                .filter(|l| *l == ":bob!bob@localhost QUIT :bye\r\n")
                .count(),
            1
        );
        assert_line(&collect(&mut sink_b), "ERROR :Closing Link: srv (bye)");

        let state = server.user_disconnects_voluntarily(alice, None);
        assert!(!state.is_alive());
        assert_line(&collect(&mut sink_a), "ERROR :Closing Link: srv (Client quit)");

        // both channels died with their last member; a new joiner founds anew
        let (carol, mut sink_c) = register(&server, "carol");
        registered(server.user_joins_channel(carol, "#pub"));
        assert_line(&collect(&mut sink_c), ":srv 353 carol = #pub :~carol");
    }

    #[test]
    fn sudden_disconnect_uses_the_stock_reason() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, _sink_b) = register(&server, "bob");
        registered(server.user_joins_channel(alice, "#pub"));
        let bob = registered(server.user_joins_channel(bob, "#pub"));
        collect(&mut sink_a);

        server.dispose_state(UserState::Registered(bob));
        assert_line(
            &collect(&mut sink_a),
            ":bob!bob@localhost QUIT :Remote host closed the connection",
        );
    }

    #[test]
    fn pong_with_a_wrong_token() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let alice = registered(server.user_pongs(alice, b"other"));
        assert_line(&collect(&mut sink_a), ":srv 409 alice :No origin specified");
        registered(server.user_pongs(alice, b"srv"));
        assert!(collect(&mut sink_a).is_empty());
    }

    #[test]
    fn keepalive_probes_then_drops() {
        let server = ServerState::new("srv", Arc::new(FixedMotd(None)), Some(Duration::ZERO));
        let (alice, mut sink_a) = register(&server, "alice");
        let (bob, mut sink_b) = register(&server, "bob");
        registered(server.user_joins_channel(alice, "#pub"));
        let bob = registered(server.user_joins_channel(bob, "#pub"));
        collect(&mut sink_a);
        collect(&mut sink_b);

        let bob = UserState::Registered(bob).check_liveness(&server);
        assert!(bob.is_alive());
        assert_line(&collect(&mut sink_b), ":srv PING :srv");

        // no pong came back before the next check
        let bob = bob.check_liveness(&server);
        assert!(!bob.is_alive());
        assert_line(
            &collect(&mut sink_a),
            ":bob!bob@localhost QUIT :Remote host closed the connection",
        );
    }

    #[test]
    fn keepalive_pong_keeps_the_session() {
        let server = ServerState::new("srv", Arc::new(FixedMotd(None)), Some(Duration::ZERO));
        let (alice, mut sink_a) = register(&server, "alice");

        let alice = registered(UserState::Registered(alice).check_liveness(&server));
        assert_line(&collect(&mut sink_a), ":srv PING :srv");

        let alice = registered(server.user_pongs(alice, b"srv"));
        // the answered probe leads to a new probe, not a disconnect
        let alice = UserState::Registered(alice).check_liveness(&server);
        assert!(alice.is_alive());
        assert_line(&collect(&mut sink_a), ":srv PING :srv");
    }

    #[test]
    fn unknown_commands_get_421() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let (_, message) = skiff_parser::parse_message(b"WHOIS bob").unwrap();
        UserState::Registered(alice).handle_message(&server, message);
        assert_line(&collect(&mut sink_a), ":srv 421 alice WHOIS :Unknown command");
    }

    #[test]
    fn mode_query_reports_no_modes() {
        let server = new_server_state();
        let (alice, mut sink_a) = register(&server, "alice");
        let alice = registered(server.user_joins_channel(alice, "#pub"));
        collect(&mut sink_a);
        registered(server.user_asks_channel_mode(alice, "#pub"));
        assert_line(&collect(&mut sink_a), ":srv 324 alice #pub");
    }
}
