use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::protocol::{encode_line, Outcome, Request, Response};
use super::{Args, Command, CommandChannel};
use crate::error::ChannelError;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// JSON-lines channel over a TCP connection to the engine process.
///
/// The connection is opened on first use and reused. A transport failure or
/// a call dropped before its reply arrives discards it, so the following call
/// reconnects; a call itself is never retried.
pub struct TcpChannel {
    addr: String,
    timeout: Duration,
    next_id: AtomicU64,
    // One exchange at a time: responses carry no routing beyond their id.
    connection: Mutex<Option<Connection>>,
}

impl TcpChannel {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            next_id: AtomicU64::new(1),
            connection: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Connection, ChannelError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| ChannelError::transport(format!("connect {}: {}", self.addr, e)))?;
        stream.set_nodelay(true)?;
        debug!("Connected to engine at {}", self.addr);

        let (read_half, write_half) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }
}

async fn exchange(connection: &mut Connection, request: &Request) -> Result<Value, ChannelError> {
    let line = encode_line(request).map_err(|e| ChannelError::transport(e.to_string()))?;
    connection.writer.write_all(line.as_bytes()).await?;
    connection.writer.flush().await?;

    let mut reply = String::new();
    let read = connection.reader.read_line(&mut reply).await?;
    if read == 0 {
        return Err(ChannelError::transport("connection closed by engine"));
    }

    let response: Response = serde_json::from_str(reply.trim_end())
        .map_err(|e| ChannelError::decode(request.cmd, format!("bad envelope: {}", e)))?;
    if response.id != request.id {
        return Err(ChannelError::decode(
            request.cmd,
            format!("response id {} does not match request id {}", response.id, request.id),
        ));
    }

    match response.outcome {
        Outcome::Ok(value) => Ok(value),
        Outcome::Error(reason) => Err(ChannelError::command(request.cmd, reason)),
    }
}

#[async_trait]
impl CommandChannel for TcpChannel {
    async fn invoke(&self, command: Command, args: Args) -> Result<Value, ChannelError> {
        let request = Request {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            cmd: command,
            args,
        };

        let mut slot = self.connection.lock().await;
        // Out of the slot while in use: if this future is dropped mid-exchange
        // the half-used stream is dropped with it.
        let idle = slot.take();
        let call = async {
            let mut connection = match idle {
                Some(connection) => connection,
                None => self.connect().await?,
            };
            let result = exchange(&mut connection, &request).await;
            match &result {
                Ok(_) | Err(ChannelError::Command { .. }) => *slot = Some(connection),
                // The stream position is unknown after a transport or framing failure.
                Err(e) => warn!("Dropping engine connection after failed {}: {}", command, e),
            }
            result
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::transport(format!(
                "{} timed out after {}ms",
                command,
                self.timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// Answers each request line with whatever `reply` builds from it.
    async fn spawn_engine<F>(reply: F) -> String
    where
        F: Fn(Request) -> Option<String> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let (read_half, mut write_half) = socket.into_split();
                let mut lines = BufReader::new(read_half).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let request: Request = serde_json::from_str(&line).unwrap();
                    match reply(request) {
                        Some(out) => {
                            write_half.write_all(out.as_bytes()).await.unwrap();
                        }
                        None => break,
                    }
                }
            }
        });
        addr
    }

    /// Answers `set_device` only after `delay`, everything else at once. One
    /// task per connection; replies to a closed socket are ignored.
    async fn spawn_slow_engine(delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (read_half, mut write_half) = socket.into_split();
                    let mut lines = BufReader::new(read_half).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let request: Request = serde_json::from_str(&line).unwrap();
                        let response = match request.cmd {
                            Command::SetDevice => {
                                tokio::time::sleep(delay).await;
                                Response::ok(request.id, Value::Null)
                            }
                            _ => Response::ok(request.id, json!(false)),
                        };
                        let out = encode_line(&response).unwrap();
                        if write_half.write_all(out.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_cancelled_call_leaves_no_stale_reply() {
        let addr = spawn_slow_engine(Duration::from_millis(300)).await;
        let channel = TcpChannel::new(addr, Duration::from_secs(2));
        assert_eq!(channel.invoke(Command::IsRunning, args!()).await.unwrap(), json!(false));

        let cancelled = tokio::time::timeout(
            Duration::from_millis(100),
            channel.invoke(
                Command::SetDevice,
                args! { "device_type" => "Output", "device_name" => "Spk1" },
            ),
        )
        .await;
        assert!(cancelled.is_err());

        // Must not pick up the late set_device reply.
        assert_eq!(channel.invoke(Command::IsRunning, args!()).await.unwrap(), json!(false));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(channel.invoke(Command::IsRunning, args!()).await.unwrap(), json!(false));
    }

    #[tokio::test]
    async fn test_round_trip_ok_and_error() {
        let addr = spawn_engine(|request| {
            let response = match request.cmd {
                Command::IsRunning => Response::ok(request.id, json!(true)),
                _ => Response::error(request.id, "device not found: Ghost"),
            };
            Some(encode_line(&response).unwrap())
        })
        .await;

        let channel = TcpChannel::new(addr, Duration::from_secs(2));
        let running = channel.invoke(Command::IsRunning, args!()).await.unwrap();
        assert_eq!(running, json!(true));

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

        // The connection survives a command error.
        assert!(channel.invoke(Command::IsRunning, args!()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_transport_error() {
        // Bind then drop so the port is very likely closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let channel = TcpChannel::new(addr, Duration::from_secs(2));
        let err = channel.invoke(Command::IsRunning, args!()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_garbage_reply_is_decode_error() {
        let addr = spawn_engine(|_| Some("this is not json\n".to_string())).await;
        let channel = TcpChannel::new(addr, Duration::from_secs(2));
        let err = channel.invoke(Command::IsRunning, args!()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Decode { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_mismatched_id_is_decode_error() {
        let addr = spawn_engine(|request| {
            Some(encode_line(&Response::ok(request.id + 100, json!(false))).unwrap())
        })
        .await;
        let channel = TcpChannel::new(addr, Duration::from_secs(2));
        let err = channel.invoke(Command::IsRunning, args!()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Decode { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_closed_connection_then_reconnect() {
        let addr = spawn_engine(|request| match request.cmd {
            Command::Stop => None,
            _ => Some(encode_line(&Response::ok(request.id, json!(false))).unwrap()),
        })
        .await;
        let channel = TcpChannel::new(addr, Duration::from_secs(2));

        let err = channel.invoke(Command::Stop, args!()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)), "{:?}", err);

        let value = channel.invoke(Command::IsRunning, args!()).await.unwrap();
        assert_eq!(value, json!(false));
    }
}
