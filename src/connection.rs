use crate::frame::{self, Frame};

use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// 从远程对等体发送和接收 `Frame` 值。
///
/// 要读取帧，`Connection` 使用内部缓冲区，该缓冲区被填充直到有足够的字节来创建完整的帧为止。然后解析帧并将其返回给调用方。
///
/// 写入分为两步。`write_frame` 只把帧编码到发送缓冲区，直到调用 `flush` 才写入套接字。管道依靠这一点把所有请求一次写出。
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,

    // 用于读取帧的缓冲区。
    buffer: BytesMut,

    // 等待下一次 `flush` 的已编码帧。
    send: BytesMut,

    // `send` 中的帧数。
    pending: usize,
}

impl Connection {
    /// 创建一个新的 `Connection`，由 `socket` 支持。初始化读取和写入缓冲区。
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: socket,
            buffer: BytesMut::with_capacity(4 * 1024),
            send: BytesMut::with_capacity(4 * 1024),
            pending: 0,
        }
    }

    /// 从底层流中读取单个 `Frame` 值。
    ///
    /// 该函数等待直到它已检索足够的数据来解析一帧。在解析帧之后，保留在读缓冲区中的任何剩余数据将保留在那里，供下一次调用 `read_frame` 使用。
    ///
    /// # 返回
    ///
    /// 成功时，返回接收到的帧。如果 `TcpStream` 以不会将帧分隔开的方式关闭，则返回 `None`。否则，返回错误。
    pub async fn read_frame(&mut self) -> crate::Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            // `0` 表示“流结束”。
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                // 远程关闭了连接。为了使其成为正常关闭，读缓冲区中不应有数据。
                if self.buffer.is_empty() {
                    return Ok(None);
                } else {
                    return Err(
                        io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    );
                }
            }
        }
    }

    /// 尝试从缓冲区解析帧。如果缓冲区包含足够的数据，则返回帧并从缓冲区中删除数据。如果尚未缓冲足够的数据，则返回 `Ok(None)`。如果缓冲的数据不表示有效的帧，则返回 `Err`。
    fn parse_frame(&mut self) -> crate::Result<Option<Frame>> {
        use frame::Error::Incomplete;

        let mut buf = Cursor::new(&self.buffer[..]);

        match Frame::check(&mut buf) {
            Ok(_) => {
                // `check` 已将光标前进到帧的末尾。
                let len = buf.position() as usize;

                buf.set_position(0);

                let frame = Frame::parse(&mut buf)?;

                self.buffer.advance(len);

                Ok(Some(frame))
            }
            Err(Incomplete) => Ok(None),
            // 现在连接处于无效状态。
            Err(e) => Err(e.into()),
        }
    }

    /// 将单个 `Frame` 编码到发送缓冲区，不执行 I/O。
    pub fn write_frame(&mut self, frame: &Frame) {
        frame.encode(&mut self.send);
        self.pending += 1;
    }

    /// 自上次刷新或重置以来写入的帧数。
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// 将整个发送缓冲区写入套接字并重置。
    pub async fn flush(&mut self) -> io::Result<()> {
        if !self.send.is_empty() {
            self.stream.write_all(&self.send).await?;
        }

        self.stream.flush().await?;
        self.reset_send_buffer();

        Ok(())
    }

    /// 丢弃自上次刷新以来写入的所有帧。
    pub fn reset_send_buffer(&mut self) {
        self.send.clear();
        self.pending = 0;
    }
}
