mod listener;
mod server;
mod session;
mod stream;

pub use listener::TcpListener;
pub use server::run_server;
pub use session::run_session;
pub use stream::Stream;
