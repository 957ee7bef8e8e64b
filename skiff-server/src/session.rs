use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use skiff_core::ServerState;
use skiff_parser::LineBuffer;

use crate::stream::Stream;

/// Runs one client connection to completion: reads lines, hands them to the
/// shared state, and drains the user's mailbox back onto the socket.
pub async fn run_session(mut stream: impl Stream, hostname: &str, server_state: ServerState) {
    let mut line_buffer = LineBuffer::default();

    let timeout = server_state
        .keepalive_timeout()
        .unwrap_or_else(|| Duration::from_secs(99999));
    let mut timer = tokio::time::interval(timeout.div_f32(4.));

    let (_user_id, mut state, mut rx) = server_state.new_registering_user(hostname);

    while state.is_alive() {
        tokio::select! {
            result = stream.read_buf(&mut line_buffer) => {
                let Ok(received) = result else {
                    break;
                };

                if received == 0 {
                    break;
                }

                while let Some(line) = line_buffer.next_line() {
                    let message = match skiff_parser::parse_message(&line) {
                        Ok((_, message)) => message,
                        Err(err) => {
                            log::warn!("error when parsing message: {err}");
                            continue;
                        }
                    };

                    state = state.handle_message(&server_state, message);
                }
            },
            msg = rx.recv() => {
                if let Some(msg) = msg {
                    if stream.write_all(&msg).await.is_err() {
                        break;
                    }
                } else {
                    // mailbox sender was closed, the user was torn down
                    // on the state side
                    break;
                }
            }
            _ = timer.tick() => {
                state = state.check_liveness(&server_state);
            }
        }
    }

    server_state.dispose_state(state);
    // close the mailbox, we don't want to receive any more messages at this point
    rx.close();

    // handle the disconnection gracefully by sending remaining
    // messages (in case the client asked a QUIT for example)
    let buf = {
        let mut buf = std::io::Cursor::new(Vec::<u8>::new());
        while let Ok(msg) = rx.try_recv() {
            let _ = std::io::Write::write_all(&mut buf, &msg);
        }
        buf.into_inner()
    };
    // try to send the messages, but don't hang on the client just for these
    let _ = tokio::time::timeout(Duration::from_secs(10), stream.write_all(&buf)).await;
}
