use std::net::SocketAddr;

use tokio::net::TcpStream;

use skiff_core::ServerState;

use crate::listener::TcpListener;
use crate::session::run_session;

fn handle_client(server_state: ServerState, accepted: std::io::Result<(TcpStream, SocketAddr)>) {
    tokio::spawn(async move {
        match accepted {
            Ok((stream, peer_addr)) => {
                let hostname = peer_addr.ip().to_string();
                run_session(stream, &hostname, server_state).await;
                log::info!("end of session for {hostname}");
            }
            Err(err) => {
                log::error!("could not accept client: {err}");
            }
        }
    });
}

pub async fn run_server(listener: TcpListener, server_state: ServerState) -> ! {
    loop {
        let accepted = listener.accept().await;
        handle_client(server_state.clone(), accepted);
    }
}
