use smallvec::SmallVec;

mod parser;
mod stream;

pub use crate::parser::parse_message;
pub use crate::stream::LineBuffer;

pub type Verb = [u8];
pub type Parameters<'a> = SmallVec<[&'a [u8]; 8]>;

/// A single client command line, split into a verb and its parameters.
///
/// Parameters are kept as raw bytes: IRC message payloads (topics, privmsg
/// contents, quit reasons) are not required to be valid UTF-8, so decoding
/// is deferred to the point where a textual value is actually needed.
///
/// See: https://modern.ircdocs.horse/#client-to-server-protocol-structure
#[derive(Debug)]
pub struct Message<'m> {
    verb: &'m Verb,
    parameters: Parameters<'m>,
}

impl<'m> Message<'m> {
    pub fn verb(&self) -> &'m Verb {
        self.verb
    }

    pub fn parameters(&self) -> &Parameters<'m> {
        &self.parameters
    }

    pub fn first_parameter(&self) -> Option<&'m [u8]> {
        self.parameters.first().copied()
    }
}
