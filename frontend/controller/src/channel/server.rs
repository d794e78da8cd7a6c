//! Engine side of the JSON-lines protocol.
//!
//! Accepts connections and answers each request line by handing it to a
//! [`CommandChannel`] (normally the engine itself). One task per connection;
//! requests on a connection are answered in order.

use log::{debug, info, warn};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::protocol::{encode_line, Request, Response};
use super::CommandChannel;
use crate::error::ChannelError;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors that only concern the one peer being accepted.
fn is_connection_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset
    )
}

/// Serves `engine` on `listener` until `shutdown` is cancelled. Accept
/// failures are logged and skipped.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<dyn CommandChannel>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Engine listening on {}", addr);
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) if is_connection_error(&e) => {
                    debug!("Connection dropped before accept: {}", e);
                    continue;
                }
                Err(e) => {
                    // Usually out of file descriptors; give in-flight connections a moment.
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };
        debug!("Controller connected from {}", peer);

        let engine = engine.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = serve_connection(stream, engine) => {
                    if let Err(e) = result {
                        warn!("Connection from {} ended with error: {}", peer, e);
                    }
                }
            }
            debug!("Controller {} disconnected", peer);
        });
    }

    info!("Engine listener stopped");
    Ok(())
}

async fn serve_connection(stream: TcpStream, engine: Arc<dyn CommandChannel>) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                debug!("Engine request #{}: {}", request.id, request.cmd);
                match engine.invoke(request.cmd, request.args).await {
                    Ok(value) => Response::ok(request.id, value),
                    Err(ChannelError::Command { reason, .. }) => Response::error(request.id, reason),
                    Err(e) => Response::error(request.id, e.to_string()),
                }
            }
            Err(e) => {
                warn!("Discarding malformed request: {}", e);
                Response::error(0, format!("malformed request: {}", e))
            }
        };

        let out = encode_line(&response).map_err(std::io::Error::other)?;
        write_half.write_all(out.as_bytes()).await?;
        write_half.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::channel::{Command, InMemoryBackend, TcpChannel};
    use serde_json::json;

    #[test]
    fn test_peer_errors_do_not_back_off() {
        for kind in [ErrorKind::ConnectionAborted, ErrorKind::ConnectionReset, ErrorKind::ConnectionRefused] {
            assert!(is_connection_error(&std::io::Error::from(kind)));
        }
        assert!(!is_connection_error(&std::io::Error::other("Too many open files")));
    }

    #[tokio::test]
    async fn test_keeps_serving_after_a_client_hangs_up() {
        let engine = InMemoryBackend::with_demo_devices();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, Arc::new(engine.clone()), shutdown.clone()));

        // Connect and vanish without sending anything.
        drop(TcpStream::connect(&addr).await.unwrap());

        let channel = TcpChannel::new(addr, Duration::from_secs(2));
        assert_eq!(channel.invoke(Command::IsRunning, args!()).await.unwrap(), json!(false));
        assert!(!server.is_finished());

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serves_engine_over_tcp() {
        let engine = InMemoryBackend::with_demo_devices();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, Arc::new(engine.clone()), shutdown.clone()));

        let channel = TcpChannel::new(addr, Duration::from_secs(2));
        channel
            .invoke(
                Command::SetDevice,
                args! { "device_type" => "Output", "device_name" => "USB Headset" },
            )
            .await
            .unwrap();
        assert_eq!(channel.invoke(Command::IsRunning, args!()).await.unwrap(), json!(false));

        let err = channel
            .invoke(
                Command::SetDevice,
                args! { "device_type" => "Output", "device_name" => "Ghost" },
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ChannelError::command(Command::SetDevice, "device not found: Ghost")
        );

        shutdown.cancel();
        server.await.unwrap().unwrap();
        assert_eq!(engine.calls(Command::SetDevice), 2);
    }
}
