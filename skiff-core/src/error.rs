use crate::client_to_server::MessageDecodingError;
use crate::message_writer::OnGoingMessage;

/// Numeric error replies. The `Display` text of each variant is the wire
/// form after the server-name prefix; every error is addressed to the
/// requesting client only.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum ServerStateError {
    #[error("401 {client} {target} :No such nick/channel")]
    NoSuchNick { client: String, target: String },
    #[error("403 {client} {channel} :No such channel")]
    NoSuchChannel { client: String, channel: String },
    #[error("404 {client} {channel} :Cannot send to channel")]
    CannotSendToChan { client: String, channel: String },
    #[error("409 {client} :No origin specified")]
    NoOrigin { client: String },
    #[error("411 {client} :No recipient given ({command})")]
    NoRecipient { client: String, command: String },
    #[error("412 {client} :No text to send")]
    NoTextToSend { client: String },
    #[error("421 {client} {command} :Unknown command")]
    UnknownCommand { client: String, command: String },
    #[error("431 {client} :No nickname given")]
    NoNicknameGiven { client: String },
    #[error("432 {client} {nickname} :Erroneous nickname")]
    ErroneousNickname { client: String, nickname: String },
    #[error("433 {client} {nickname} :Nickname is already in use")]
    NicknameInUse { client: String, nickname: String },
    #[error("441 {client} {nickname} {channel} :They aren't on that channel")]
    UserNotInChannel {
        client: String,
        nickname: String,
        channel: String,
    },
    #[error("442 {client} {channel} :You're not on that channel")]
    NotOnChannel { client: String, channel: String },
    #[error("451 {client} :You have not registered")]
    NotRegistered { client: String },
    #[error("461 {client} {command} :Not enough parameters")]
    NeedMoreParams { client: String, command: String },
    #[error("472 {client} {modechar} :is unknown mode char to me")]
    UnknownMode { client: String, modechar: String },
    #[error("474 {client} {channel} :Cannot join channel (+b)")]
    BannedFromChan { client: String, channel: String },
    #[error("482 {client} {channel} :You're not channel operator")]
    ChanOpPrivsNeeded { client: String, channel: String },
}

impl ServerStateError {
    pub(crate) fn write_to<'b, 'c>(&self, m: OnGoingMessage<'b, 'c>) -> OnGoingMessage<'b, 'c> {
        m.write(&self.to_string())
    }

    pub(crate) fn from_decoding_error_with_client(
        err: MessageDecodingError,
        client: String,
    ) -> ServerStateError {
        match err {
            MessageDecodingError::CannotDecodeUtf8 { command } => {
                ServerStateError::UnknownCommand { client, command }
            }
            MessageDecodingError::NotEnoughParameters { command } => {
                ServerStateError::NeedMoreParams { client, command }
            }
            MessageDecodingError::NoNicknameGiven {} => {
                ServerStateError::NoNicknameGiven { client }
            }
            MessageDecodingError::NoTextToSend {} => ServerStateError::NoTextToSend { client },
            MessageDecodingError::NoRecipient { command } => {
                ServerStateError::NoRecipient { client, command }
            }
            MessageDecodingError::NoOrigin {} => ServerStateError::NoOrigin { client },
        }
    }
}
