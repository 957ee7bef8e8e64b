use nom::{
    bytes::complete::{tag, take_till, take_till1, take_while},
    character::complete::space0,
    combinator::{peek, rest},
    sequence::preceded,
    IResult,
};

use crate::{Message, Parameters, Verb};

fn is_space(c: u8) -> bool {
    c == b' '
}

// verb ::= any run of non-space bytes; case folding and verb validation
// happen at the dispatch layer so that junk verbs still get a 421 reply
// instead of killing the line.
fn parse_verb(buf: &[u8]) -> IResult<&[u8], &Verb> {
    take_till1(is_space)(buf)
}

// parameters are split on runs of spaces; a parameter starting with ':'
// swallows the rest of the line (colon stripped), spaces included.
fn parse_parameters(mut buf: &[u8]) -> IResult<&[u8], Parameters<'_>> {
    let mut params: Parameters<'_> = smallvec::smallvec!();
    loop {
        let (buf_, _spaces) = take_while(is_space)(buf)?;
        buf = buf_;
        if buf.is_empty() {
            break;
        }

        buf = if peek(tag::<_, _, nom::error::Error<&[u8]>>(b":"))(buf).is_ok() {
            let (buf_, trailing) = preceded(tag(b":"), rest)(buf)?;
            params.push(trailing);
            buf_
        } else {
            let (buf_, param) = take_till(is_space)(buf)?;
            params.push(param);
            buf_
        };
    }

    Ok((buf, params))
}

/// Parses one line (terminator already stripped) into a [`Message`].
pub fn parse_message(buf: &[u8]) -> IResult<&[u8], Message<'_>> {
    let (buf, _) = space0(buf)?;
    let (buf, verb) = parse_verb(buf)?;
    let (buf, parameters) = parse_parameters(buf)?;
    Ok((buf, Message { verb, parameters }))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::indexing_slicing)]

    mod verb {
        use super::super::*;
        use nom::combinator::all_consuming;

        #[test]
        fn plain() {
            let (buf, verb) = parse_verb(b"PONG").unwrap();
            assert!(buf.is_empty());
            assert_eq!(verb, b"PONG");
        }

        #[test]
        fn stops_at_space() {
            let (buf, verb) = parse_verb(b"JOIN #foo").unwrap();
            assert_eq!(verb, b"JOIN");
            assert_eq!(buf, b" #foo");
        }

        #[test]
        fn fail_empty() {
            let result = all_consuming(parse_verb)(b"");
            assert!(result.is_err());
        }
    }

    mod parameters {
        use super::super::*;
        use nom::combinator::all_consuming;

        #[test]
        fn trailing_with_spaces() {
            let (buf, params) = all_consuming(parse_parameters)(b"#foo :hello world").unwrap();
            assert_eq!(params[0], b"#foo");
            assert_eq!(params[1], b"hello world");
            assert_eq!(params.len(), 2);
            assert!(buf.is_empty());
        }

        #[test]
        fn trailing_empty() {
            let (_, params) = all_consuming(parse_parameters)(b"#foo :").unwrap();
            assert_eq!(params[0], b"#foo");
            assert_eq!(params[1], b"");
            assert_eq!(params.len(), 2);
        }

        #[test]
        fn no_trailing_cuts_at_space() {
            let (_, params) = all_consuming(parse_parameters)(b"#foo hello world").unwrap();
            assert_eq!(params[0], b"#foo");
            assert_eq!(params[1], b"hello");
            assert_eq!(params[2], b"world");
            assert_eq!(params.len(), 3);
        }

        #[test]
        fn double_colon_keeps_one() {
            let (_, params) = all_consuming(parse_parameters)(b"#foo ::-)").unwrap();
            assert_eq!(params[1], b":-)");
        }

        #[test]
        fn runs_of_spaces() {
            let (_, params) = all_consuming(parse_parameters)(b"#foo   bar").unwrap();
            assert_eq!(params[0], b"#foo");
            assert_eq!(params[1], b"bar");
            assert_eq!(params.len(), 2);
        }
    }

    mod message {
        use super::super::*;
        use nom::combinator::all_consuming;

        #[test]
        fn quit_with_reason() {
            let (buf, message) = all_consuming(parse_message)(b"QUIT :Bye for now!").unwrap();
            assert_eq!(message.verb(), b"QUIT");
            assert_eq!(message.first_parameter(), Some(&b"Bye for now!"[..]));
            assert!(buf.is_empty());
        }

        #[test]
        fn leading_spaces_tolerated() {
            let (_, message) = all_consuming(parse_message)(b"  NICK alice").unwrap();
            assert_eq!(message.verb(), b"NICK");
            assert_eq!(message.first_parameter(), Some(&b"alice"[..]));
        }

        #[test]
        fn verb_only() {
            let (_, message) = all_consuming(parse_message)(b"AWAY").unwrap();
            assert_eq!(message.verb(), b"AWAY");
            assert!(message.parameters().is_empty());
        }

        #[test]
        fn non_utf8_payload_survives() {
            let (_, message) = all_consuming(parse_message)(b"PRIVMSG #foo :\xff\xfe").unwrap();
            assert_eq!(message.verb(), b"PRIVMSG");
            assert_eq!(message.parameters()[1], b"\xff\xfe");
        }
    }
}
