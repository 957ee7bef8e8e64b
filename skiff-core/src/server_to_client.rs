use crate::message_writer::MessageWriter;

#[derive(Debug, Clone)]
pub(crate) struct BanListEntry<'a> {
    pub(crate) mask: String,
    pub(crate) set_by: &'a str,
}

#[derive(Debug, Clone)]
pub(crate) enum Message<'a> {
    /// The registration burst. Sent once, right after NICK+USER complete.
    Motd {
        client: &'a str,
        motd: Option<&'a [String]>,
    },
    Join {
        channel: &'a str,
        user_mask: &'a str,
    },
    /// Membership snapshot sent to a joining user.
    Names {
        client: &'a str,
        channel: &'a str,
        /// Already prefixed (`~`, `@`) and ordered, joiner first.
        nicknames: &'a [String],
    },
    /// Reply to a topic query, or to the joiner when the channel has a topic.
    RplTopic {
        client: &'a str,
        channel: &'a str,
        topic: Option<&'a [u8]>,
    },
    /// A topic change, broadcast to the whole channel.
    Topic {
        user_mask: &'a str,
        channel: &'a str,
        topic: &'a [u8],
    },
    Part {
        user_mask: &'a str,
        channel: &'a str,
    },
    Kick {
        kicker_mask: &'a str,
        channel: &'a str,
        target_nickname: &'a str,
        reason: &'a [u8],
    },
    Nick {
        previous_mask: &'a str,
        nickname: &'a str,
    },
    PrivMsg {
        from_mask: &'a str,
        target: &'a str,
        content: &'a [u8],
    },
    /// Auto-reply to the sender when the recipient is away.
    RplAway {
        client: &'a str,
        target_nickname: &'a str,
        away_message: &'a [u8],
    },
    NowAway {
        client: &'a str,
    },
    UnAway {
        client: &'a str,
    },
    Mode {
        user_mask: &'a str,
        channel: &'a str,
        modechar: &'a str,
        param: Option<&'a str>,
    },
    /// Reply to a parameterless MODE query.
    ChannelModeIs {
        client: &'a str,
        channel: &'a str,
        modes: &'a str,
    },
    BanList {
        client: &'a str,
        channel: &'a str,
        entries: &'a [BanListEntry<'a>],
    },
    Ping {
        token: &'a [u8],
    },
    Quit {
        user_mask: &'a str,
        reason: &'a [u8],
    },
    /// Final line before the server closes the connection.
    FatalError {
        reason: &'a [u8],
    },
    Err(crate::error::ServerStateError),
}

pub(crate) struct MessageContext {
    pub(crate) server_name: String,
}

impl Message<'_> {
    pub(crate) fn write_to(&self, stream: &mut MessageWriter<'_>, context: &MessageContext) {
        let sv = &context.server_name;
        match self {
            Message::Motd { client, motd } => match motd {
                Some(motd) => {
                    message!(
                        stream,
                        b":",
                        sv,
                        b" 375 ",
                        client,
                        b" :- ",
                        sv,
                        b" Message of the day - "
                    );

                    for line in *motd {
                        let line = line.replace("{user_nick}", client);
                        message!(stream, b":", sv, b" 372 ", client, b" :- ", &line);
                    }

                    message!(stream, b":", sv, b" 376 ", client, b" :End of /MOTD command.");
                }
                None => {
                    message!(stream, b":", sv, b" 422 ", client, b" :MOTD File is missing");
                }
            },
            Message::Join { channel, user_mask } => {
                message!(stream, b":", user_mask, b" JOIN ", channel);
            }
            Message::Names {
                client,
                channel,
                nicknames,
            } => {
                let mut m = stream.new_message();
                message_push!(m, b":", sv, b" 353 ", client, b" = ", channel, b" :");
                for (i, nick) in nicknames.iter().enumerate() {
                    m = m.write(nick);
                    if i != nicknames.len() - 1 {
                        m = m.write(b" ");
                    }
                }
                m.validate();

                message!(
                    stream,
                    b":",
                    sv,
                    b" 366 ",
                    client,
                    b" ",
                    channel,
                    b" :End of /NAMES list."
                );
            }
            Message::RplTopic {
                client,
                channel,
                topic,
            } => {
                if let Some(topic) = topic {
                    message!(stream, b":", sv, b" 332 ", client, b" ", channel, b" :", topic);
                } else {
                    message!(
                        stream,
                        b":",
                        sv,
                        b" 331 ",
                        client,
                        b" ",
                        channel,
                        b" :No topic is set"
                    );
                }
            }
            Message::Topic {
                user_mask,
                channel,
                topic,
            } => {
                message!(stream, b":", user_mask, b" TOPIC ", channel, b" :", topic);
            }
            Message::Part { user_mask, channel } => {
                message!(stream, b":", user_mask, b" PART ", channel);
            }
            Message::Kick {
                kicker_mask,
                channel,
                target_nickname,
                reason,
            } => {
                message!(
                    stream,
                    b":",
                    kicker_mask,
                    b" KICK ",
                    channel,
                    b" ",
                    target_nickname,
                    b" :",
                    reason
                );
            }
            Message::Nick {
                previous_mask,
                nickname,
            } => {
                message!(stream, b":", previous_mask, b" NICK :", nickname);
            }
            Message::PrivMsg {
                from_mask,
                target,
                content,
            } => {
                message!(stream, b":", from_mask, b" PRIVMSG ", target, b" :", content);
            }
            Message::RplAway {
                client,
                target_nickname,
                away_message,
            } => {
                message!(
                    stream,
                    b":",
                    sv,
                    b" 301 ",
                    client,
                    b" ",
                    target_nickname,
                    b" :",
                    away_message
                );
            }
            Message::NowAway { client } => {
                message!(
                    stream,
                    b":",
                    sv,
                    b" 306 ",
                    client,
                    b" :You have been marked as being away"
                );
            }
            Message::UnAway { client } => {
                message!(
                    stream,
                    b":",
                    sv,
                    b" 305 ",
                    client,
                    b" :You are no longer marked as being away"
                );
            }
            Message::Mode {
                user_mask,
                channel,
                modechar,
                param,
            } => {
                let mut m = stream.new_message();
                message_push!(m, b":", user_mask, b" MODE ", channel, b" ", modechar);
                if let Some(param) = param {
                    message_push!(m, b" ", param);
                }
                m.validate();
            }
            Message::ChannelModeIs {
                client,
                channel,
                modes,
            } => {
                let mut m = stream.new_message();
                message_push!(m, b":", sv, b" 324 ", client, b" ", channel);
                if !modes.is_empty() {
                    message_push!(m, b" ", modes);
                }
                m.validate();
            }
            Message::BanList {
                client,
                channel,
                entries,
            } => {
                for entry in *entries {
                    message!(
                        stream,
                        b":",
                        sv,
                        b" 367 ",
                        client,
                        b" ",
                        channel,
                        b" ",
                        &entry.mask,
                        b" ",
                        entry.set_by
                    );
                }
                message!(
                    stream,
                    b":",
                    sv,
                    b" 368 ",
                    client,
                    b" ",
                    channel,
                    b" :End of channel ban list"
                );
            }
            Message::Ping { token } => {
                message!(stream, b":", sv, b" PING :", token);
            }
            Message::Quit { user_mask, reason } => {
                message!(stream, b":", user_mask, b" QUIT :", reason);
            }
            Message::FatalError { reason } => {
                message!(stream, b"ERROR :", reason);
            }
            Message::Err(err) => {
                let mut m = stream.new_message();
                message_push!(m, b":", sv, b" ");
                err.write_to(m).validate();
            }
        }
    }
}
