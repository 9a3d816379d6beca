use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use redis_protocol::resp2::{encode::extend_encode, types::BytesFrame};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::command::Command;

const NIL_ARRAY: &[u8] = b"*-1\r\n";

/// A single reply to a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    BulkArray(Option<Vec<Bytes>>),
}

impl Reply {
    pub fn error(msg: impl Into<String>) -> Self {
        Reply::Error(msg.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(Some(data.into()))
    }

    pub fn nil() -> Self {
        Reply::Bulk(None)
    }

    pub fn bulk_strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Reply::BulkArray(Some(
            items
                .into_iter()
                .map(|s| Bytes::copy_from_slice(s.as_ref().as_bytes()))
                .collect(),
        ))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Wire form of the reply.
    pub fn to_bytes(&self) -> io::Result<Bytes> {
        match self {
            Reply::BulkArray(None) => Ok(Bytes::from_static(NIL_ARRAY)),
            Reply::Ok => serialize_frame(&BytesFrame::SimpleString("OK".into())),
            Reply::Simple(text) => {
                serialize_frame(&BytesFrame::SimpleString(single_line(text).into()))
            }
            Reply::Error(text) => serialize_frame(&BytesFrame::Error(single_line(text).into())),
            Reply::Integer(value) => serialize_frame(&BytesFrame::Integer(*value)),
            Reply::Bulk(None) => serialize_frame(&BytesFrame::Null),
            Reply::Bulk(Some(data)) => serialize_frame(&BytesFrame::BulkString(data.clone())),
            Reply::BulkArray(Some(items)) => serialize_frame(&BytesFrame::Array(
                items
                    .iter()
                    .map(|item| BytesFrame::BulkString(item.clone()))
                    .collect(),
            )),
        }
    }
}

/// Status and error lines cannot carry CR or LF.
fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

pub fn serialize_frame(frame: &BytesFrame) -> io::Result<Bytes> {
    let mut buf = BytesMut::new();
    extend_encode(&mut buf, frame, false)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    Ok(buf.freeze())
}

/// Encode a command as a multibulk request, keeping null slots as `$-1`.
pub fn encode_command(command: &Command) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_slice(format!("*{}\r\n", command.arg_count()).as_bytes());
    for slot in command.args() {
        match slot {
            None => buf.put_slice(b"$-1\r\n"),
            Some(arg) => {
                buf.put_slice(format!("${}\r\n", arg.len()).as_bytes());
                buf.put_slice(arg);
                buf.put_slice(b"\r\n");
            }
        }
    }
    buf.freeze()
}

/// Writes replies to the connection. Every call flushes before returning.
pub struct ResponseEncoder<W> {
    writer: W,
}

impl<W> ResponseEncoder<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    async fn write_and_flush(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data).await?;
        self.writer.flush().await
    }

    pub async fn send_reply(&mut self, reply: &Reply) -> io::Result<()> {
        let data = reply.to_bytes()?;
        self.write_and_flush(&data).await
    }

    pub async fn send_ok(&mut self) -> io::Result<()> {
        self.send_reply(&Reply::Ok).await
    }

    pub async fn send_string(&mut self, text: &str) -> io::Result<()> {
        self.send_reply(&Reply::Simple(text.to_string())).await
    }

    pub async fn send_error(&mut self, text: &str) -> io::Result<()> {
        self.send_reply(&Reply::Error(text.to_string())).await
    }

    pub async fn send_int(&mut self, value: i64) -> io::Result<()> {
        self.send_reply(&Reply::Integer(value)).await
    }

    pub async fn send_bulk(&mut self, value: Option<&[u8]>) -> io::Result<()> {
        self.send_reply(&Reply::Bulk(value.map(Bytes::copy_from_slice)))
            .await
    }

    pub async fn send_bulk_strings<S>(&mut self, values: Option<&[S]>) -> io::Result<()>
    where
        S: AsRef<str>,
    {
        let reply = match values {
            Some(values) => Reply::bulk_strings(values),
            None => Reply::BulkArray(None),
        };
        self.send_reply(&reply).await
    }
}
