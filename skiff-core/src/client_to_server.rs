use unicase::UniCase;

/// A decoded client command. Decoding only checks shape (arity, UTF-8 where
/// a textual value is required); semantic validation happens in the state
/// handlers.
#[derive(Debug)]
pub(crate) enum Message<'m> {
    Nick(&'m str),
    User(&'m str),
    Join(&'m str),
    Part(&'m str),
    PrivMsg(&'m str, &'m [u8]),
    GetTopic(&'m str),
    SetTopic(&'m str, &'m [u8]),
    Kick(&'m str, &'m str, Option<&'m [u8]>),
    AskModeChannel(&'m str),
    ChangeModeChannel(&'m str, &'m str, Vec<&'m str>),
    Away(Option<&'m [u8]>),
    Pong(&'m [u8]),
    Quit(Option<&'m [u8]>),
    Unknown(&'m str),
}

/// Shape errors found while decoding. Mapped onto numeric replies by
/// [`crate::error::ServerStateError::from_decoding_error_with_client`].
pub(crate) enum MessageDecodingError {
    CannotDecodeUtf8 { command: String },
    NotEnoughParameters { command: String },
    NoNicknameGiven {},
    NoTextToSend {},
    NoRecipient { command: String },
    NoOrigin {},
}

fn str2<'a>(command: &str, s: &'a [u8]) -> Result<&'a str, MessageDecodingError> {
    std::str::from_utf8(s).map_err(|_| MessageDecodingError::CannotDecodeUtf8 {
        command: command.to_string(),
    })
}

fn optstr<'a>(command: &str, opt: Option<&'a [u8]>) -> Result<&'a str, MessageDecodingError> {
    let s = opt.ok_or_else(|| MessageDecodingError::NotEnoughParameters {
        command: command.to_string(),
    })?;
    str2(command, s)
}

fn handle_nick<'m>(
    message: &skiff_parser::Message<'m>,
    command: &str,
) -> Result<Message<'m>, MessageDecodingError> {
    let nick = message
        .first_parameter()
        .ok_or(MessageDecodingError::NoNicknameGiven {})?;
    let nick = str2(command, nick)?;
    if nick.is_empty() {
        return Err(MessageDecodingError::NoNicknameGiven {});
    }
    Ok(Message::Nick(nick))
}

fn handle_user<'m>(
    message: &skiff_parser::Message<'m>,
    command: &str,
) -> Result<Message<'m>, MessageDecodingError> {
    let username = optstr(command, message.first_parameter())?;
    if username.is_empty() {
        return Err(MessageDecodingError::NotEnoughParameters {
            command: command.to_string(),
        });
    }
    Ok(Message::User(username))
}

fn handle_join<'m>(
    message: &skiff_parser::Message<'m>,
    command: &str,
) -> Result<Message<'m>, MessageDecodingError> {
    let channel = optstr(command, message.first_parameter())?;
    Ok(Message::Join(channel))
}

fn handle_part<'m>(
    message: &skiff_parser::Message<'m>,
    command: &str,
) -> Result<Message<'m>, MessageDecodingError> {
    let channel = optstr(command, message.first_parameter())?;
    Ok(Message::Part(channel))
}

fn handle_privmsg<'m>(
    message: &skiff_parser::Message<'m>,
    command: &str,
) -> Result<Message<'m>, MessageDecodingError> {
    let target = message
        .first_parameter()
        .ok_or_else(|| MessageDecodingError::NoRecipient {
            command: command.to_string(),
        })?;
    let target = str2(command, target)?;
    let params = message.parameters();
    let content = params.get(1).ok_or(MessageDecodingError::NoTextToSend {})?;
    Ok(Message::PrivMsg(target, content))
}

fn handle_topic<'m>(
    message: &skiff_parser::Message<'m>,
    command: &str,
) -> Result<Message<'m>, MessageDecodingError> {
    let channel = optstr(command, message.first_parameter())?;
    let params = message.parameters();
    let msg = match params.get(1) {
        Some(content) => Message::SetTopic(channel, content),
        None => Message::GetTopic(channel),
    };
    Ok(msg)
}

fn handle_kick<'m>(
    message: &skiff_parser::Message<'m>,
    command: &str,
) -> Result<Message<'m>, MessageDecodingError> {
    let channel = optstr(command, message.first_parameter())?;
    let params = message.parameters();
    let target = params
        .get(1)
        .ok_or_else(|| MessageDecodingError::NotEnoughParameters {
            command: command.to_string(),
        })?;
    let target = str2(command, target)?;
    let reason = params.get(2).copied().filter(|r| !r.is_empty());
    Ok(Message::Kick(channel, target, reason))
}

fn handle_mode<'m>(
    message: &skiff_parser::Message<'m>,
    command: &str,
) -> Result<Message<'m>, MessageDecodingError> {
    let target = optstr(command, message.first_parameter())?;
    let params = message.parameters();
    if let Some(modestring) = params.get(1) {
        let modestring = str2(command, modestring)?;
        let mut args = Vec::new();
        for p in params.get(2..).into_iter().flatten() {
            args.push(str2(command, p)?);
        }
        Ok(Message::ChangeModeChannel(target, modestring, args))
    } else {
        Ok(Message::AskModeChannel(target))
    }
}

fn handle_away<'m>(
    message: &skiff_parser::Message<'m>,
    _command: &str,
) -> Result<Message<'m>, MessageDecodingError> {
    // AWAY with an empty reason means "back", same as no parameter at all
    let away_message = message
        .first_parameter()
        .and_then(|m| if m.is_empty() { None } else { Some(m) });
    Ok(Message::Away(away_message))
}

fn handle_pong<'m>(
    message: &skiff_parser::Message<'m>,
    _command: &str,
) -> Result<Message<'m>, MessageDecodingError> {
    let token = message
        .first_parameter()
        .ok_or(MessageDecodingError::NoOrigin {})?;
    Ok(Message::Pong(token))
}

fn handle_quit<'m>(
    message: &skiff_parser::Message<'m>,
    _command: &str,
) -> Result<Message<'m>, MessageDecodingError> {
    let reason = message.first_parameter();
    Ok(Message::Quit(reason))
}

type Handler =
    for<'m> fn(&skiff_parser::Message<'m>, &str) -> Result<Message<'m>, MessageDecodingError>;

static REGISTRY: phf::Map<unicase::UniCase<&str>, Handler> = phf::phf_map! {
    UniCase::ascii("NICK") => handle_nick,
    UniCase::ascii("USER") => handle_user,
    UniCase::ascii("JOIN") => handle_join,
    UniCase::ascii("PART") => handle_part,
    UniCase::ascii("PRIVMSG") => handle_privmsg,
    UniCase::ascii("TOPIC") => handle_topic,
    UniCase::ascii("KICK") => handle_kick,
    UniCase::ascii("MODE") => handle_mode,
    UniCase::ascii("AWAY") => handle_away,
    UniCase::ascii("PONG") => handle_pong,
    UniCase::ascii("QUIT") => handle_quit,
};

impl<'m> TryFrom<&skiff_parser::Message<'m>> for Message<'m> {
    type Error = MessageDecodingError;

    fn try_from(message: &skiff_parser::Message<'m>) -> Result<Self, Self::Error> {
        let verb = message.verb();
        let verb = std::str::from_utf8(verb).map_err(|_| MessageDecodingError::CannotDecodeUtf8 {
            command: String::from_utf8_lossy(verb).into_owned(),
        })?;

        let Some(handler) = REGISTRY.get(&verb.into()) else {
            return Ok(Message::Unknown(verb));
        };

        handler(message, verb)
    }
}
