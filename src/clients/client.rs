//! 异步 Redis 客户端。
//!
//! 除了几个立即执行的命令之外，`Client` 是管道和事务驱动的对象：它缓冲写入而不触碰套接字，
//! 一次性刷新，并为每种回复形状提供类型化的读取。它还持有把连接限定给单个活动批次的占用标记，
//! 以及批次中途失败时设置的中毒标志。

use crate::cancel::Cancellation;
use crate::error::UsageError;
use crate::pipeline_command::PipelineCommand;
use crate::{reply, Connection, Frame};

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::io::{Error, ErrorKind};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, error, instrument, warn};

/// 当前占用客户端的批次类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Pipeline,
    Transaction,
}

impl fmt::Display for Claim {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Claim::Pipeline => "pipeline".fmt(fmt),
            Claim::Transaction => "transaction".fmt(fmt),
        }
    }
}

/// 与 Redis 服务器建立的连接。
#[derive(Debug)]
pub struct Client {
    connection: Connection,

    /// 管道或事务占用连接时设置。
    claim: Option<Claim>,

    /// 批次中途失败时设置，永不清除。
    poisoned: bool,
}

impl Client {
    /// 与位于 `addr` 的 Redis 服务器建立连接。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mini_redis_pipeline::clients::Client;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let client = match Client::connect("localhost:6379").await {
    ///         Ok(client) => client,
    ///         Err(_) => panic!("failed to establish connection"),
    ///     };
    /// # drop(client);
    /// }
    /// ```
    pub async fn connect<T: ToSocketAddrs>(addr: T) -> crate::Result<Client> {
        let socket = TcpStream::connect(addr).await?;

        Ok(Client::new(socket))
    }

    /// 包装一个已连接的套接字。
    pub fn new(socket: TcpStream) -> Client {
        Client {
            connection: Connection::new(socket),
            claim: None,
            poisoned: false,
        }
    }

    /// 当前占用此客户端的批次（如果有）。
    pub fn claimed(&self) -> Option<Claim> {
        self.claim
    }

    /// 此连接上有批次中途失败后返回 `true`。中毒的客户端拒绝之后的所有读写。
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub(crate) fn claim(&mut self, claim: Claim) -> crate::Result<()> {
        self.ensure_usable()?;

        if let Some(active) = self.claim {
            warn!(%active, requested = %claim, "connection already claimed");
            return Err(UsageError::AlreadyClaimed(active).into());
        }

        debug!(%claim, "connection claimed");
        self.claim = Some(claim);
        Ok(())
    }

    pub(crate) fn ensure_claimed(&self, claim: Claim) -> crate::Result<()> {
        match self.claim {
            Some(active) if active == claim => Ok(()),
            _ => Err(UsageError::NotClaimed.into()),
        }
    }

    pub(crate) fn release(&mut self) {
        if let Some(claim) = self.claim.take() {
            debug!(%claim, "connection released");
        }
    }

    /// 将连接标记为不可用。线路上剩余的回复已无法与产生它们的请求对应。
    pub(crate) fn poison(&mut self, cause: &crate::Error) {
        error!(%cause, "connection poisoned");
        self.poisoned = true;
        self.connection.reset_send_buffer();
    }

    fn ensure_usable(&self) -> crate::Result<()> {
        if self.poisoned {
            return Err(UsageError::ConnectionPoisoned.into());
        }

        Ok(())
    }

    /// 将命令编码到发送缓冲区。直到调用 `flush_send_buffer` 才会发送。
    pub fn write_command<I>(&mut self, args: I) -> crate::Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.ensure_usable()?;

        let mut frame = Frame::array();
        for arg in args {
            frame.push_bulk(Bytes::copy_from_slice(arg.as_ref()));
        }

        if let Frame::Array(ref parts) = frame {
            if parts.is_empty() {
                return Err("protocol error; empty command".into());
            }
        }

        debug!(request = ?frame);

        self.connection.write_frame(&frame);
        Ok(())
    }

    /// 自上次刷新以来缓冲的命令数。
    pub fn pending_writes(&self) -> usize {
        self.connection.pending()
    }

    /// 发送所有缓冲的命令并重置发送缓冲区。
    pub async fn flush_send_buffer(&mut self) -> crate::Result<()> {
        self.ensure_usable()?;
        self.connection.flush().await?;
        Ok(())
    }

    /// 丢弃所有缓冲的命令，不发送。
    pub fn reset_send_buffer(&mut self) {
        self.connection.reset_send_buffer();
    }

    /// 读取下一个回复帧。错误回复以 `Frame::Error` 返回，由类型化的读取决定其含义。
    pub async fn read_reply(&mut self) -> crate::Result<Frame> {
        self.ensure_usable()?;

        let response = self.connection.read_frame().await?;

        debug!(?response);

        match response {
            Some(frame) => Ok(frame),
            // 这里的 `None` 表示服务器在没有发送帧的情况下关闭了连接。这是意外情况，
            // 表示为“connection reset by peer”错误。
            None => {
                let err = Error::new(ErrorKind::ConnectionReset, "connection reset by server");

                Err(err.into())
            }
        }
    }

    /// 与 `read_reply` 相同，但 `cancel` 触发后立即放弃。
    pub async fn read_reply_cancellable(
        &mut self,
        cancel: &mut Cancellation,
    ) -> crate::Result<Frame> {
        tokio::select! {
            res = self.read_reply() => res,
            _ = cancel.recv() => {
                Err(Error::new(ErrorKind::Interrupted, "reply read cancelled").into())
            }
        }
    }

    pub async fn expect_success(&mut self) -> crate::Result<()> {
        reply::success(self.read_reply().await?)
    }

    pub async fn read_int(&mut self) -> crate::Result<i32> {
        reply::int(self.read_reply().await?)
    }

    pub async fn read_long(&mut self) -> crate::Result<i64> {
        reply::long(self.read_reply().await?)
    }

    pub async fn read_double(&mut self) -> crate::Result<f64> {
        reply::double(self.read_reply().await?)
    }

    pub async fn read_bool(&mut self) -> crate::Result<bool> {
        reply::boolean(self.read_reply().await?)
    }

    pub async fn read_bytes(&mut self) -> crate::Result<Option<Bytes>> {
        reply::bytes(self.read_reply().await?)
    }

    pub async fn read_string(&mut self) -> crate::Result<Option<String>> {
        reply::string(self.read_reply().await?)
    }

    pub async fn read_multi_bytes(&mut self) -> crate::Result<Vec<Bytes>> {
        reply::multi_bytes(self.read_reply().await?)
    }

    pub async fn read_multi_string(&mut self) -> crate::Result<Vec<String>> {
        reply::multi_string(self.read_reply().await?)
    }

    pub async fn read_dictionary(&mut self) -> crate::Result<HashMap<String, String>> {
        reply::dictionary(self.read_reply().await?)
    }

    pub async fn read_data(&mut self) -> crate::Result<Frame> {
        reply::data(self.read_reply().await?)
    }

    /// 开始一个只返回整数回复的底层命令批次。
    pub fn pipeline_command(&mut self) -> PipelineCommand<'_> {
        PipelineCommand::new(self)
    }

    /// Ping 服务器。返回 `PONG`，如果提供了 `msg` 则返回 `msg`。
    #[instrument(skip(self))]
    pub async fn ping(&mut self, msg: Option<Bytes>) -> crate::Result<Bytes> {
        let mut args = vec![Bytes::from_static(b"PING")];
        args.extend(msg);

        let frame = self.request(args).await?;
        Ok(reply::bytes(frame)?.unwrap_or_default())
    }

    /// 获取 `key` 的值。
    #[instrument(skip(self))]
    pub async fn get(&mut self, key: &str) -> crate::Result<Option<Bytes>> {
        let frame = self.request(["GET", key]).await?;
        reply::bytes(frame)
    }

    /// 将 `key` 设置为给定的 `value`。
    #[instrument(skip(self))]
    pub async fn set(&mut self, key: &str, value: Bytes) -> crate::Result<()> {
        let frame = self
            .request([&b"SET"[..], key.as_bytes(), &value[..]])
            .await?;

        // 成功时，服务器简单地响应 `OK`。任何其他响应都表示错误。
        match frame {
            Frame::Simple(response) if response == "OK" => Ok(()),
            frame => Err(frame.to_error()),
        }
    }

    /// 将 `key` 中存储的整数加一，返回新值。
    #[instrument(skip(self))]
    pub async fn incr(&mut self, key: &str) -> crate::Result<i64> {
        let frame = self.request(["INCR", key]).await?;
        reply::long(frame)
    }

    /// 删除 `key`。如果它存在则返回 `true`。
    #[instrument(skip(self))]
    pub async fn del(&mut self, key: &str) -> crate::Result<bool> {
        let frame = self.request(["DEL", key]).await?;
        reply::boolean(frame)
    }

    /// 发送任意命令并返回其回复树。
    pub async fn execute<I>(&mut self, args: I) -> crate::Result<Frame>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let frame = self.request(args).await?;
        reply::data(frame)
    }

    /// 在批次之外写入、刷新并读回一个命令。
    async fn request<I>(&mut self, args: I) -> crate::Result<Frame>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        // 立即命令的回复若夹在批次的回复中间，会让之后的回复全部错位。
        if let Some(active) = self.claim {
            return Err(UsageError::AlreadyClaimed(active).into());
        }

        self.write_command(args)?;
        self.flush_send_buffer().await?;
        self.read_reply().await
    }
}

impl AsMut<Client> for Client {
    fn as_mut(&mut self) -> &mut Client {
        self
    }
}
