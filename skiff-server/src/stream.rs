use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl Stream for TcpStream {}
// for tests driving a session over an in-memory pipe
impl Stream for tokio::io::DuplexStream {}
