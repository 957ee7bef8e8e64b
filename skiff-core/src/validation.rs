//! Input grammars: nicknames, channel names, and ban masks.

const NICK_MAX_LEN: usize = 16;
const CHANNEL_MAX_LEN: usize = 50;

fn is_nick_punctuation(c: char) -> bool {
    matches!(
        c,
        '|' | '\\' | '_' | '[' | ']' | '{' | '}' | '^' | '`' | '-'
    )
}

/// Nicknames start with an ASCII letter or a restricted punctuation set;
/// digits are allowed from the second character on.
pub(crate) fn nickname_is_valid(nick: &str) -> bool {
    if nick.is_empty() || nick.len() > NICK_MAX_LEN {
        return false;
    }
    let mut chars = nick.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() && !is_nick_punctuation(first) {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || is_nick_punctuation(c))
}

/// Channel names: `#` followed by 1..=49 characters, none of which is a
/// space, comma, or BEL.
pub(crate) fn channel_name_is_valid(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('#') else {
        return false;
    };
    if rest.is_empty() || name.len() > CHANNEL_MAX_LEN {
        return false;
    }
    !rest.contains([' ', ',', '\x07'])
}

/// A `nick!user@host` wildcard mask, as stored in a channel ban list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BanMask {
    nick: String,
    user: String,
    host: String,
}

fn segment_or_star(segment: &str) -> String {
    if segment.is_empty() {
        "*".to_string()
    } else {
        segment.to_string()
    }
}

fn segment_matches(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern.eq_ignore_ascii_case(value)
}

impl BanMask {
    /// Greedy parse on the first `!` then the first `@`; missing or empty
    /// segments default to `*`. Input with `@` before `!`, or with extra
    /// separators, does not parse.
    pub(crate) fn parse(input: &str) -> Option<Self> {
        if input.is_empty() {
            return None;
        }

        let (nick, user, host) = match (input.find('!'), input.find('@')) {
            (Some(bang), Some(at)) => {
                if at < bang {
                    return None;
                }
                (&input[..bang], &input[bang + 1..at], &input[at + 1..])
            }
            (Some(bang), None) => (&input[..bang], &input[bang + 1..], ""),
            (None, Some(at)) => (&input[..at], "", &input[at + 1..]),
            (None, None) => (input, "", ""),
        };

        if nick.contains(['!', '@']) || user.contains(['!', '@']) || host.contains(['!', '@']) {
            return None;
        }

        Some(Self {
            nick: segment_or_star(nick),
            user: segment_or_star(user),
            host: segment_or_star(host),
        })
    }

    /// Each segment matches when the mask holds `*` or the ASCII-case-folded
    /// value. No general globbing: the open ban-mask question is resolved as
    /// exact-or-star per segment.
    pub(crate) fn matches(&self, nick: &str, user: &str, host: &str) -> bool {
        segment_matches(&self.nick, nick)
            && segment_matches(&self.user, user)
            && segment_matches(&self.host, host)
    }
}

impl std::fmt::Display for BanMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}!{}@{}", self.nick, self.user, self.host)
    }
}
