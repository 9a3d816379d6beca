use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncRead;

use super::buffer::FrameBuffer;
use super::command::Command;

/// Largest accepted multibulk argument count.
pub const MAX_NUM_ARG: i64 = 20;
/// Largest accepted bulk argument, in bytes.
pub const MAX_BULK_SIZE: i64 = 1 << 16;
/// Longest accepted inline (telnet) request line, in bytes.
pub const MAX_TELNET_LINE: usize = 1 << 10;

/// Malformed input. The connection survives these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Protocol error: expected number")]
    ExpectNumber,
    #[error("Protocol error: expected '\\r\\n'")]
    ExpectNewLine,
    #[error("Protocol error: expected '$'")]
    ExpectTypeChar,
    #[error("Protocol error: invalid multibulk length")]
    InvalidNumArg,
    #[error("Protocol error: invalid bulk length")]
    InvalidBulkSize,
    #[error("Protocol error: too big inline request")]
    LineTooLong,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("stream error: {0}")]
    Stream(#[from] io::Error),
}

impl DecodeError {
    pub fn is_protocol(&self) -> bool {
        matches!(self, DecodeError::Protocol(_))
    }
}

type DecodeResult<T> = Result<T, DecodeError>;

/// Incremental request decoder for multibulk and inline requests.
pub struct ProtocolDecoder<R> {
    buffer: FrameBuffer<R>,
}

impl<R> ProtocolDecoder<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            buffer: FrameBuffer::new(reader),
        }
    }

    pub fn with_read_timeout(reader: R, timeout: Option<Duration>) -> Self {
        Self {
            buffer: FrameBuffer::new(reader).with_read_timeout(timeout),
        }
    }

    pub fn buffer(&self) -> &FrameBuffer<R> {
        &self.buffer
    }

    /// Decode the next request, waiting on the stream as needed.
    ///
    /// `Ok(None)` is a null multibulk (`*-1`), which carries no command. Any
    /// error discards what is buffered; bytes read past a complete frame are
    /// kept for the next call.
    pub async fn next_command(&mut self) -> DecodeResult<Option<Command>> {
        let result = self.decode_frame().await;
        match result {
            Ok(_) => self.buffer.compact(),
            Err(_) => self.buffer.reset(),
        }
        result
    }

    async fn decode_frame(&mut self) -> DecodeResult<Option<Command>> {
        self.buffer.fill_at_least(1).await?;
        if self.buffer.peek() == Some(b'*') {
            self.buffer.advance(1);
            self.parse_multibulk().await
        } else {
            self.parse_inline().await.map(Some)
        }
    }

    async fn parse_multibulk(&mut self) -> DecodeResult<Option<Command>> {
        let num_arg = self.read_number().await?;
        self.discard_new_line().await?;

        if num_arg == -1 {
            return Ok(None);
        }
        if !(0..=MAX_NUM_ARG).contains(&num_arg) {
            return Err(ProtocolError::InvalidNumArg.into());
        }

        let mut argv = Vec::with_capacity(num_arg as usize);
        for _ in 0..num_arg {
            self.buffer.fill_at_least(1).await?;
            if self.buffer.peek() != Some(b'$') {
                return Err(ProtocolError::ExpectTypeChar.into());
            }
            self.buffer.advance(1);

            let plen = self.read_number().await?;
            self.discard_new_line().await?;

            match plen {
                -1 => argv.push(None),
                0 => {
                    argv.push(Some(Bytes::new()));
                    self.discard_new_line().await?;
                }
                1..=MAX_BULK_SIZE => {
                    let plen = plen as usize;
                    self.buffer.fill_at_least(plen).await?;
                    argv.push(Some(Bytes::copy_from_slice(&self.buffer.unread()[..plen])));
                    self.buffer.advance(plen);
                    self.discard_new_line().await?;
                }
                _ => return Err(ProtocolError::InvalidBulkSize.into()),
            }
        }

        Ok(Some(Command::new(argv)))
    }

    async fn parse_inline(&mut self) -> DecodeResult<Command> {
        let mut scanned = 0;
        let newline = loop {
            if let Some(pos) = self.buffer.unread()[scanned..]
                .iter()
                .position(|&b| b == b'\n')
            {
                break scanned + pos;
            }
            scanned = self.buffer.available();
            if scanned > MAX_TELNET_LINE {
                return Err(ProtocolError::LineTooLong.into());
            }
            self.buffer.fill_at_least(scanned + 1).await?;
        };

        if newline > MAX_TELNET_LINE {
            return Err(ProtocolError::LineTooLong.into());
        }

        let unread = self.buffer.unread();
        let line_end = if newline > 0 && unread[newline - 1] == b'\r' {
            newline - 1
        } else {
            newline
        };
        let argv = unread[..line_end]
            .split(|&b| b == b' ')
            .map(|part| Some(Bytes::copy_from_slice(part)))
            .collect();

        self.buffer.advance(newline + 1);
        Ok(Command::new(argv))
    }

    /// Signed decimal with an optional `+`/`-` prefix. Overflow wraps.
    async fn read_number(&mut self) -> DecodeResult<i64> {
        self.buffer.fill_at_least(1).await?;
        let mut negative = false;
        match self.buffer.peek() {
            Some(b'-') => {
                negative = true;
                self.buffer.advance(1);
            }
            Some(b'+') => self.buffer.advance(1),
            _ => {}
        }

        let mut magnitude: u64 = 0;
        let mut digits = 0;
        loop {
            self.buffer.fill_at_least(1).await?;
            match self.buffer.peek() {
                Some(c) if c.is_ascii_digit() => {
                    magnitude = magnitude.wrapping_mul(10).wrapping_add(u64::from(c - b'0'));
                    digits += 1;
                    self.buffer.advance(1);
                }
                _ => break,
            }
        }

        if digits == 0 {
            return Err(ProtocolError::ExpectNumber.into());
        }

        let value = magnitude as i64;
        Ok(if negative { value.wrapping_neg() } else { value })
    }

    async fn discard_new_line(&mut self) -> DecodeResult<()> {
        self.buffer.fill_at_least(2).await?;
        if self.buffer.unread().starts_with(b"\r\n") {
            self.buffer.advance(2);
            Ok(())
        } else {
            Err(ProtocolError::ExpectNewLine.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::encoder::encode_command;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Hands out one pre-split chunk per read call.
    struct Chunked {
        chunks: VecDeque<Vec<u8>>,
    }

    impl Chunked {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks: chunks.into_iter().filter(|c| !c.is_empty()).collect(),
            }
        }

        fn bytewise(data: &[u8]) -> Self {
            Self::new(data.iter().map(|b| vec![*b]).collect())
        }
    }

    impl AsyncRead for Chunked {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if let Some(mut chunk) = self.chunks.pop_front() {
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                if n < chunk.len() {
                    let rest = chunk.split_off(n);
                    self.chunks.push_front(rest);
                }
            }
            Poll::Ready(Ok(()))
        }
    }

    async fn decode_one(input: &[u8]) -> DecodeResult<Option<Command>> {
        let mut decoder = ProtocolDecoder::new(input);
        decoder.next_command().await
    }

    fn protocol_error(result: DecodeResult<Option<Command>>) -> ProtocolError {
        match result {
            Err(DecodeError::Protocol(e)) => e,
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn decodes_multibulk() {
        let cmd = decode_one(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cmd, Command::from_args(["SET", "foo", "bar"]));
    }

    #[tokio::test]
    async fn null_and_empty_bulks_are_distinct() {
        let cmd = decode_one(b"*3\r\n$3\r\nGET\r\n$-1\r\n$0\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert!(cmd.is_null(1));
        assert!(!cmd.is_null(2));
        assert_eq!(cmd.get(2), Some(&Bytes::new()));

        // Encoding back gives the same wire bytes.
        assert_eq!(
            encode_command(&cmd).as_ref(),
            b"*3\r\n$3\r\nGET\r\n$-1\r\n$0\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn null_multibulk_is_not_an_error() {
        let input: &[u8] = b"*-1\r\n*1\r\n$4\r\nPING\r\n";
        let mut decoder = ProtocolDecoder::new(input);

        assert!(decoder.next_command().await.unwrap().is_none());
        let cmd = decoder.next_command().await.unwrap().unwrap();
        assert_eq!(cmd.name(), "PING");
    }

    #[tokio::test]
    async fn explicit_plus_sign_is_accepted() {
        let cmd = decode_one(b"*+1\r\n$+4\r\nPING\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cmd.name(), "PING");
    }

    #[tokio::test]
    async fn round_trips_arbitrary_arguments() {
        let cases: Vec<Vec<Option<Bytes>>> = vec![
            vec![Some(Bytes::from_static(b"AUTH")), Some(Bytes::from_static(b"s3cr3t"))],
            vec![Some(Bytes::new())],
            vec![None, None],
            vec![
                Some(Bytes::from_static(b"bin")),
                Some(Bytes::from_static(b"\r\n\0\xff $*")),
                None,
                Some(Bytes::new()),
            ],
            vec![],
        ];

        for argv in cases {
            let original = Command::new(argv);
            let wire = encode_command(&original);
            let decoded = decode_one(&wire).await.unwrap().unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[tokio::test]
    async fn survives_every_split_point() {
        let frame: &[u8] =
            b"*4\r\n$8\r\nSENTINEL\r\n$7\r\nMONITOR\r\n$0\r\n\r\n$-1\r\n";
        let expected = decode_one(frame).await.unwrap().unwrap();

        for split in 1..frame.len() {
            let reader = Chunked::new(vec![frame[..split].to_vec(), frame[split..].to_vec()]);
            let mut decoder = ProtocolDecoder::new(reader);
            let cmd = decoder.next_command().await.unwrap().unwrap();
            assert_eq!(cmd, expected, "split at {}", split);
        }

        let mut decoder = ProtocolDecoder::new(Chunked::bytewise(frame));
        assert_eq!(decoder.next_command().await.unwrap().unwrap(), expected);
    }

    #[tokio::test]
    async fn inline_survives_bytewise_reads() {
        let mut decoder = ProtocolDecoder::new(Chunked::bytewise(b"AUTH secretpass1\r\n"));
        let cmd = decoder.next_command().await.unwrap().unwrap();
        assert_eq!(cmd, Command::from_args(["AUTH", "secretpass1"]));
    }

    #[tokio::test]
    async fn large_bulks_grow_the_buffer_without_corrupting_earlier_commands() {
        let big_a = vec![b'a'; 5000];
        let big_b = vec![b'b'; 40_000];
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_command(&Command::from_args([b"SET".as_slice(), b"k".as_slice(), big_a.as_slice()])));
        wire.extend_from_slice(&encode_command(&Command::from_args([b"SET".as_slice(), b"k".as_slice(), big_b.as_slice()])));

        let mut decoder = ProtocolDecoder::new(Chunked::new(
            wire.chunks(700).map(|c| c.to_vec()).collect(),
        ));

        let first = decoder.next_command().await.unwrap().unwrap();
        let second = decoder.next_command().await.unwrap().unwrap();

        assert!(decoder.buffer().capacity() > 40_000);
        assert_eq!(first.get(2).unwrap().as_ref(), big_a.as_slice());
        assert_eq!(second.get(2).unwrap().as_ref(), big_b.as_slice());
    }

    #[tokio::test]
    async fn pipelined_requests_are_all_decoded() {
        let input: &[u8] = b"PING\r\n*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\nQUIT\n";
        let mut decoder = ProtocolDecoder::new(input);

        assert_eq!(decoder.next_command().await.unwrap().unwrap().name(), "PING");
        assert_eq!(
            decoder.next_command().await.unwrap().unwrap(),
            Command::from_args(["GET", "foo"])
        );
        assert_eq!(decoder.next_command().await.unwrap().unwrap().name(), "QUIT");
    }

    #[tokio::test]
    async fn inline_splits_on_single_spaces_only() {
        let cmd = decode_one(b"SET  key\n").await.unwrap().unwrap();
        assert_eq!(cmd, Command::from_args(["SET", "", "key"]));

        let cmd = decode_one(b"\r\n").await.unwrap().unwrap();
        assert_eq!(cmd, Command::from_args([""]));
    }

    #[tokio::test]
    async fn enforces_argument_count_limit() {
        let mut wire = format!("*{}\r\n", MAX_NUM_ARG + 1).into_bytes();
        for _ in 0..=MAX_NUM_ARG {
            wire.extend_from_slice(b"$1\r\nx\r\n");
        }
        assert_eq!(protocol_error(decode_one(&wire).await), ProtocolError::InvalidNumArg);
        assert_eq!(
            protocol_error(decode_one(b"*-2\r\n").await),
            ProtocolError::InvalidNumArg
        );

        let mut wire = format!("*{}\r\n", MAX_NUM_ARG).into_bytes();
        for _ in 0..MAX_NUM_ARG {
            wire.extend_from_slice(b"$1\r\nx\r\n");
        }
        let cmd = decode_one(&wire).await.unwrap().unwrap();
        assert_eq!(cmd.arg_count(), MAX_NUM_ARG as usize);
    }

    #[tokio::test]
    async fn enforces_bulk_size_limit() {
        let wire = format!("*1\r\n${}\r\n", MAX_BULK_SIZE + 1);
        assert_eq!(
            protocol_error(decode_one(wire.as_bytes()).await),
            ProtocolError::InvalidBulkSize
        );
        assert_eq!(
            protocol_error(decode_one(b"*1\r\n$-5\r\n").await),
            ProtocolError::InvalidBulkSize
        );

        let payload = vec![b'z'; MAX_BULK_SIZE as usize];
        let wire = encode_command(&Command::from_args([payload.as_slice()]));
        let cmd = decode_one(&wire).await.unwrap().unwrap();
        assert_eq!(cmd.get(0).unwrap().len(), MAX_BULK_SIZE as usize);
    }

    #[tokio::test]
    async fn enforces_inline_line_limit() {
        let long = vec![b'a'; MAX_TELNET_LINE + 1];
        assert_eq!(protocol_error(decode_one(&long).await), ProtocolError::LineTooLong);

        let mut with_newline = vec![b'a'; MAX_TELNET_LINE + 10];
        with_newline.push(b'\n');
        assert_eq!(
            protocol_error(decode_one(&with_newline).await),
            ProtocolError::LineTooLong
        );

        let mut fits = vec![b'a'; MAX_TELNET_LINE];
        fits.push(b'\n');
        let cmd = decode_one(&fits).await.unwrap().unwrap();
        assert_eq!(cmd.get(0).unwrap().len(), MAX_TELNET_LINE);
    }

    #[tokio::test]
    async fn reports_malformed_frames() {
        assert_eq!(
            protocol_error(decode_one(b"*x\r\n").await),
            ProtocolError::ExpectNumber
        );
        assert_eq!(
            protocol_error(decode_one(b"*1\r\n+PING\r\n").await),
            ProtocolError::ExpectTypeChar
        );
        assert_eq!(
            protocol_error(decode_one(b"*1\r\n$4\r\nPINGxx").await),
            ProtocolError::ExpectNewLine
        );
        assert_eq!(
            protocol_error(decode_one(b"*1\n\n").await),
            ProtocolError::ExpectNewLine
        );
    }

    #[tokio::test]
    async fn recovers_after_protocol_error() {
        let reader = Chunked::new(vec![
            b"*1\r\n!garbage\r\n".to_vec(),
            b"*1\r\n$4\r\nPING\r\n".to_vec(),
        ]);
        let mut decoder = ProtocolDecoder::new(reader);

        assert!(decoder.next_command().await.unwrap_err().is_protocol());
        assert_eq!(decoder.buffer().available(), 0);
        assert_eq!(decoder.next_command().await.unwrap().unwrap().name(), "PING");
    }

    #[tokio::test]
    async fn eof_is_a_stream_error() {
        match decode_one(b"").await {
            Err(DecodeError::Stream(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected stream error, got {:?}", other),
        }

        match decode_one(b"*2\r\n$3\r\nGET\r\n").await {
            Err(DecodeError::Stream(_)) => {}
            other => panic!("expected stream error, got {:?}", other),
        }
    }
}
