use crate::client_to_server;
use crate::server_state::ServerState;
use crate::types::UserID;

#[derive(Debug)]
pub struct RegisteringState {
    pub(crate) user_id: UserID,
}

impl RegisteringState {
    pub(crate) fn new(user_id: UserID) -> Self {
        Self { user_id }
    }

    fn handle_message(
        self,
        server_state: &ServerState,
        message: skiff_parser::Message<'_>,
    ) -> UserState {
        let message = match client_to_server::Message::try_from(&message) {
            Ok(message) => message,
            Err(error) => {
                return server_state.ruser_sends_invalid_message(self, error);
            }
        };

        match message {
            client_to_server::Message::Nick(nick) => server_state.ruser_uses_nick(self, nick),
            client_to_server::Message::User(username) => {
                server_state.ruser_uses_username(self, username)
            }
            client_to_server::Message::Quit(reason) => {
                server_state.ruser_disconnects_voluntarily(self, reason)
            }
            _ => {
                // everything else requires a completed registration
                server_state.ruser_sends_command_but_is_not_registered(self)
            }
        }
    }
}

#[derive(Debug)]
pub struct RegisteredState {
    pub(crate) user_id: UserID,
}

impl RegisteredState {
    fn handle_message(
        self,
        server_state: &ServerState,
        message: skiff_parser::Message<'_>,
    ) -> UserState {
        let message = match client_to_server::Message::try_from(&message) {
            Ok(message) => message,
            Err(error) => {
                return server_state.user_sends_invalid_message(self, error);
            }
        };

        match message {
            client_to_server::Message::Nick(nick) => server_state.user_changes_nick(self, nick),
            client_to_server::Message::Join(channel) => {
                server_state.user_joins_channel(self, channel)
            }
            client_to_server::Message::Part(channel) => {
                server_state.user_leaves_channel(self, channel)
            }
            client_to_server::Message::PrivMsg(target, content) => {
                server_state.user_messages_target(self, target, content)
            }
            client_to_server::Message::GetTopic(channel) => {
                server_state.user_wants_topic(self, channel)
            }
            client_to_server::Message::SetTopic(channel, content) => {
                server_state.user_sets_topic(self, channel, content)
            }
            client_to_server::Message::Kick(channel, target, reason) => {
                server_state.user_kicks(self, channel, target, reason)
            }
            client_to_server::Message::AskModeChannel(channel) => {
                server_state.user_asks_channel_mode(self, channel)
            }
            client_to_server::Message::ChangeModeChannel(channel, modestring, args) => {
                server_state.user_changes_channel_mode(self, channel, modestring, &args)
            }
            client_to_server::Message::Away(away_message) => {
                server_state.user_indicates_away(self, away_message)
            }
            client_to_server::Message::Pong(token) => server_state.user_pongs(self, token),
            client_to_server::Message::Quit(reason) => {
                server_state.user_disconnects_voluntarily(self, reason)
            }
            client_to_server::Message::User(_) => {
                // a second USER after registration is silently ignored
                UserState::Registered(self)
            }
            client_to_server::Message::Unknown(command) => {
                server_state.user_sends_unknown_command(self, command)
            }
        }
    }
}

#[derive(Debug)]
pub enum UserState {
    Registering(RegisteringState),
    Registered(RegisteredState),
    Disconnected,
}

impl UserState {
    pub fn is_alive(&self) -> bool {
        match self {
            UserState::Registering(_) => true,
            UserState::Registered(_) => true,
            UserState::Disconnected => false,
        }
    }

    pub fn handle_message(
        self,
        server_state: &ServerState,
        message: skiff_parser::Message<'_>,
    ) -> UserState {
        match self {
            UserState::Registering(session_state) => {
                session_state.handle_message(server_state, message)
            }
            UserState::Registered(session_state) => {
                session_state.handle_message(server_state, message)
            }
            UserState::Disconnected => self,
        }
    }

    /// Periodic keepalive check, driven by the session timer. May send a
    /// PING probe or declare the connection dead.
    pub fn check_liveness(self, server_state: &ServerState) -> UserState {
        match self {
            UserState::Registered(session_state) => {
                server_state.user_checks_liveness(session_state)
            }
            other => other,
        }
    }
}
