#[macro_use]
mod message_writer;
mod client_to_server;
mod error;
mod liveness;
mod server_state;
mod server_to_client;
mod types;
mod user_state;
mod validation;

pub use message_writer::MailboxSink;
pub use server_state::{MotdProvider, ServerState};
pub use types::UserID;
pub use user_state::{RegisteredState, RegisteringState, UserState};
