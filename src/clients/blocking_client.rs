//! 极简的阻塞 Redis 客户端实现
//!
//! 提供阻塞的连接和发出受支持命令的方法，以及批次机制的同步部分。

use crate::clients::{Claim, Client};
use crate::pipeline_command::BlockingPipelineCommand;
use crate::Frame;

use bytes::Bytes;
use std::collections::HashMap;
use tokio::net::ToSocketAddrs;
use tokio::runtime::Runtime;

/// 与 Redis 服务器建立的连接。
///
/// 由单个 `TcpStream` 支持，`BlockingClient` 提供基本的网络客户端功能（没有连接池、重试等）。
/// 使用 [`connect`](BlockingClient::connect) 函数建立连接。
///
/// 每个操作都在私有的 current-thread 运行时上把异步 [`Client`] 驱动到完成，
/// 因此阻塞路径和异步路径共用一套实现。不能在另一个 Tokio 运行时内部使用 `BlockingClient`。
#[derive(Debug)]
pub struct BlockingClient {
    /// 异步 `Client`。
    pub(crate) inner: Client,

    /// 用于以阻塞方式执行异步客户端操作的 `current_thread` 运行时。
    pub(crate) rt: Runtime,
}

impl BlockingClient {
    /// 与位于 `addr` 的 Redis 服务器建立连接。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mini_redis_pipeline::clients::BlockingClient;
    ///
    /// fn main() {
    ///     let client = match BlockingClient::connect("localhost:6379") {
    ///         Ok(client) => client,
    ///         Err(_) => panic!("failed to establish connection"),
    ///     };
    /// # drop(client);
    /// }
    /// ```
    pub fn connect<T: ToSocketAddrs>(addr: T) -> crate::Result<BlockingClient> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let inner = rt.block_on(Client::connect(addr))?;

        Ok(BlockingClient { inner, rt })
    }

    /// 被包装的客户端，供批次中排队的写入部分使用。
    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.inner
    }

    pub fn claimed(&self) -> Option<Claim> {
        self.inner.claimed()
    }

    pub fn is_poisoned(&self) -> bool {
        self.inner.is_poisoned()
    }

    pub fn write_command<I>(&mut self, args: I) -> crate::Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.inner.write_command(args)
    }

    pub fn pending_writes(&self) -> usize {
        self.inner.pending_writes()
    }

    pub fn flush_send_buffer(&mut self) -> crate::Result<()> {
        self.rt.block_on(self.inner.flush_send_buffer())
    }

    pub fn reset_send_buffer(&mut self) {
        self.inner.reset_send_buffer()
    }

    pub fn read_reply(&mut self) -> crate::Result<Frame> {
        self.rt.block_on(self.inner.read_reply())
    }

    pub fn expect_success(&mut self) -> crate::Result<()> {
        self.rt.block_on(self.inner.expect_success())
    }

    pub fn read_int(&mut self) -> crate::Result<i32> {
        self.rt.block_on(self.inner.read_int())
    }

    pub fn read_long(&mut self) -> crate::Result<i64> {
        self.rt.block_on(self.inner.read_long())
    }

    pub fn read_double(&mut self) -> crate::Result<f64> {
        self.rt.block_on(self.inner.read_double())
    }

    pub fn read_bool(&mut self) -> crate::Result<bool> {
        self.rt.block_on(self.inner.read_bool())
    }

    pub fn read_bytes(&mut self) -> crate::Result<Option<Bytes>> {
        self.rt.block_on(self.inner.read_bytes())
    }

    pub fn read_string(&mut self) -> crate::Result<Option<String>> {
        self.rt.block_on(self.inner.read_string())
    }

    pub fn read_multi_bytes(&mut self) -> crate::Result<Vec<Bytes>> {
        self.rt.block_on(self.inner.read_multi_bytes())
    }

    pub fn read_multi_string(&mut self) -> crate::Result<Vec<String>> {
        self.rt.block_on(self.inner.read_multi_string())
    }

    pub fn read_dictionary(&mut self) -> crate::Result<HashMap<String, String>> {
        self.rt.block_on(self.inner.read_dictionary())
    }

    pub fn read_data(&mut self) -> crate::Result<Frame> {
        self.rt.block_on(self.inner.read_data())
    }

    /// 开始一个只返回整数回复的底层命令批次。
    pub fn pipeline_command(&mut self) -> BlockingPipelineCommand<'_> {
        BlockingPipelineCommand::new(self)
    }

    pub fn ping(&mut self, msg: Option<Bytes>) -> crate::Result<Bytes> {
        self.rt.block_on(self.inner.ping(msg))
    }

    pub fn get(&mut self, key: &str) -> crate::Result<Option<Bytes>> {
        self.rt.block_on(self.inner.get(key))
    }

    pub fn set(&mut self, key: &str, value: Bytes) -> crate::Result<()> {
        self.rt.block_on(self.inner.set(key, value))
    }

    pub fn incr(&mut self, key: &str) -> crate::Result<i64> {
        self.rt.block_on(self.inner.incr(key))
    }

    pub fn del(&mut self, key: &str) -> crate::Result<bool> {
        self.rt.block_on(self.inner.del(key))
    }

    pub fn execute<I>(&mut self, args: I) -> crate::Result<Frame>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.rt.block_on(self.inner.execute(args))
    }
}

impl AsMut<Client> for BlockingClient {
    fn as_mut(&mut self) -> &mut Client {
        &mut self.inner
    }
}
