use std::net::SocketAddr;

use tokio::net::TcpStream;

/// Bind a TCP socket from the std:: to be blocking (this function is not
/// async), then convert to a tokio:: listener for future use. It has to be
/// called within a tokio runtime with IO enabled.
fn bind_tcp_socket(addr: &str) -> std::io::Result<tokio::net::TcpListener> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    tokio::net::TcpListener::from_std(listener)
}

pub struct TcpListener {
    listener: tokio::net::TcpListener,
}

impl TcpListener {
    pub fn try_new(address: &str, port: u16) -> anyhow::Result<Self> {
        let addr = format!("{address}:{port}");
        let listener = bind_tcp_socket(&addr)?;

        log::info!("listening on {addr}");
        Ok(Self { listener })
    }

    pub(crate) async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer_addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer_addr))
    }
}
