use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Initial size of the per-connection read buffer, also used as growth slack.
pub const READ_BUFFER_INIT_SIZE: usize = 1 << 10;

/// Growable read buffer with explicit parse/write cursors.
///
/// Invariant: `parse_position <= write_index <= capacity()`. Bytes in
/// `parse_position..write_index` are read from the stream but not yet consumed
/// by the decoder. Growth always keeps them.
pub struct FrameBuffer<R> {
    reader: R,
    buffer: Vec<u8>,
    parse_position: usize,
    write_index: usize,
    read_timeout: Option<Duration>,
}

impl<R> FrameBuffer<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: vec![0; READ_BUFFER_INIT_SIZE],
            parse_position: 0,
            write_index: 0,
            read_timeout: None,
        }
    }

    /// Fail reads that stay idle longer than `timeout`. `None` waits forever.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn parse_position(&self) -> usize {
        self.parse_position
    }

    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// Number of buffered, unconsumed bytes.
    pub fn available(&self) -> usize {
        self.write_index - self.parse_position
    }

    pub fn unread(&self) -> &[u8] {
        &self.buffer[self.parse_position..self.write_index]
    }

    pub fn peek(&self) -> Option<u8> {
        self.unread().first().copied()
    }

    /// Consume `n` buffered bytes.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.available(), "advance past write index");
        self.parse_position = (self.parse_position + n).min(self.write_index);
    }

    /// Guarantee at least `additional` free bytes after `write_index`.
    pub fn ensure_capacity(&mut self, additional: usize) {
        let cap = self.buffer.len();
        if self.write_index + additional > cap {
            let new_cap = (cap * 2).max(cap + additional + READ_BUFFER_INIT_SIZE);
            self.buffer.resize(new_cap, 0);
        }
    }

    /// Make sure at least `n` unread bytes are buffered, reading as needed.
    ///
    /// EOF surfaces as `UnexpectedEof`; every I/O error is returned untouched.
    pub async fn fill_at_least(&mut self, n: usize) -> io::Result<()> {
        let available = self.available();
        if available >= n {
            return Ok(());
        }
        self.read_some(n - available).await
    }

    async fn read_some(&mut self, min: usize) -> io::Result<()> {
        self.ensure_capacity(min);
        let mut read = 0;
        while read < min {
            let n = self.read_once().await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ));
            }
            self.write_index += n;
            read += n;
        }
        Ok(())
    }

    async fn read_once(&mut self) -> io::Result<usize> {
        let target = &mut self.buffer[self.write_index..];
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.reader.read(target))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))?,
            None => self.reader.read(target).await,
        }
    }

    /// Clear both cursors. The backing allocation is kept for the next frame.
    pub fn reset(&mut self) {
        self.parse_position = 0;
        self.write_index = 0;
    }

    /// Drop consumed bytes, moving any already-read remainder to the front.
    pub fn compact(&mut self) {
        if self.parse_position == self.write_index {
            self.reset();
            return;
        }
        self.buffer
            .copy_within(self.parse_position..self.write_index, 0);
        self.write_index -= self.parse_position;
        self.parse_position = 0;
    }
}
