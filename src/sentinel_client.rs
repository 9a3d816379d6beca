//! Minimal client for querying backend sentinels.
//!
//! One connection per request: connect, write a single command, read a single
//! RESP frame. The whole exchange runs under one deadline.

use std::time::Duration;

use bytes::BytesMut;
use redis_protocol::resp2::{decode::decode_bytes_mut, types::BytesFrame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::redis::{Command, encode_command};

const MAX_RESPONSE_BYTES: usize = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum SentinelClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("i/o error talking to {addr}: {source}")]
    Io {
        addr: String,
        source: std::io::Error,
    },
    #[error("timed out waiting for {addr} after {millis}ms")]
    Timeout { addr: String, millis: u128 },
    #[error("connection closed before a full RESP response was received")]
    Closed,
    #[error("response exceeded max size ({0} bytes)")]
    TooLarge(usize),
    #[error("failed to parse RESP response: {0}")]
    Parse(String),
    #[error("sentinel returned error: {0}")]
    Remote(String),
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone)]
pub struct SentinelClient {
    timeout: Duration,
}

impl SentinelClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send `command` to `addr` and return the first frame it answers with.
    pub async fn send(
        &self,
        addr: &str,
        command: &Command,
    ) -> Result<BytesFrame, SentinelClientError> {
        let request = encode_command(command);

        timeout(self.timeout, async {
            let mut stream =
                TcpStream::connect(addr)
                    .await
                    .map_err(|source| SentinelClientError::Connect {
                        addr: addr.to_string(),
                        source,
                    })?;

            let io_err = |source| SentinelClientError::Io {
                addr: addr.to_string(),
                source,
            };
            stream.write_all(request.as_ref()).await.map_err(io_err)?;
            stream.flush().await.map_err(io_err)?;

            read_single_resp_frame(&mut stream, addr).await
        })
        .await
        .map_err(|_| SentinelClientError::Timeout {
            addr: addr.to_string(),
            millis: self.timeout.as_millis(),
        })?
    }

    /// `SENTINEL GET-MASTER-ADDR-BY-NAME <name>`. A nil answer is `None`.
    pub async fn get_master_addr_by_name(
        &self,
        addr: &str,
        name: &str,
    ) -> Result<Option<(String, String)>, SentinelClientError> {
        let command = Command::from_args(["SENTINEL", "GET-MASTER-ADDR-BY-NAME", name]);
        match self.send(addr, &command).await? {
            BytesFrame::Null => Ok(None),
            BytesFrame::Error(err) => Err(SentinelClientError::Remote(err.to_string())),
            BytesFrame::Array(items) if items.len() == 2 => {
                match (frame_to_string(&items[0]), frame_to_string(&items[1])) {
                    (Some(ip), Some(port)) => Ok(Some((ip, port))),
                    _ => Err(SentinelClientError::Unexpected(format!("{:?}", items))),
                }
            }
            other => Err(SentinelClientError::Unexpected(format!("{:?}", other))),
        }
    }

    /// `SENTINEL MASTER <name>` as a flat field/value list.
    pub async fn master(
        &self,
        addr: &str,
        name: &str,
    ) -> Result<Option<Vec<String>>, SentinelClientError> {
        let command = Command::from_args(["SENTINEL", "MASTER", name]);
        match self.send(addr, &command).await? {
            BytesFrame::Null => Ok(None),
            BytesFrame::Error(err) => Err(SentinelClientError::Remote(err.to_string())),
            BytesFrame::Array(items) => items
                .iter()
                .map(|item| {
                    frame_to_string(item)
                        .ok_or_else(|| SentinelClientError::Unexpected(format!("{:?}", item)))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            other => Err(SentinelClientError::Unexpected(format!("{:?}", other))),
        }
    }
}

async fn read_single_resp_frame(
    stream: &mut TcpStream,
    addr: &str,
) -> Result<BytesFrame, SentinelClientError> {
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        let read = stream
            .read_buf(&mut buffer)
            .await
            .map_err(|source| SentinelClientError::Io {
                addr: addr.to_string(),
                source,
            })?;

        if read == 0 {
            return Err(SentinelClientError::Closed);
        }

        if buffer.len() > MAX_RESPONSE_BYTES {
            return Err(SentinelClientError::TooLarge(MAX_RESPONSE_BYTES));
        }

        match decode_bytes_mut(&mut buffer) {
            Ok(Some((frame, _, _))) => return Ok(frame),
            Ok(None) => continue,
            Err(err) => return Err(SentinelClientError::Parse(format!("{:?}", err))),
        }
    }
}

fn frame_to_string(frame: &BytesFrame) -> Option<String> {
    match frame {
        BytesFrame::BulkString(bytes) | BytesFrame::SimpleString(bytes) => {
            Some(String::from_utf8_lossy(bytes.as_ref()).into_owned())
        }
        BytesFrame::Integer(value) => Some(value.to_string()),
        _ => None,
    }
}
