//! 只返回整数回复的简单命令批次。
//!
//! 没有队列也没有监听器：调用方写入 `n` 个命令，刷新一次，再读回 `n` 个整数。

use crate::clients::{BlockingClient, Client};
use crate::reply::SUCCESS;

use tracing::debug;

/// 记录已写入的命令数，以便知道要读取多少个回复。
#[derive(Debug)]
pub struct PipelineCommand<'a> {
    client: &'a mut Client,
    count: usize,
}

impl<'a> PipelineCommand<'a> {
    pub(crate) fn new(client: &'a mut Client) -> PipelineCommand<'a> {
        PipelineCommand { client, count: 0 }
    }

    /// 缓冲一个命令。
    pub fn write<I>(&mut self, args: I) -> crate::Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.client.write_command(args)?;
        self.count += 1;
        Ok(())
    }

    /// 已写入但尚未读回的命令数。
    pub fn count(&self) -> usize {
        self.count
    }

    pub async fn flush(&mut self) -> crate::Result<()> {
        self.client.flush_send_buffer().await
    }

    /// 为每个已写入的命令读取一个整数回复。
    ///
    /// 读取失败会使客户端中毒：剩余的回复仍留在线路上。
    pub async fn read_all_as_ints(&mut self) -> crate::Result<Vec<i64>> {
        debug!(count = self.count, "reading batch replies");
        let mut results = Vec::with_capacity(self.count);

        while self.count > 0 {
            match self.client.read_long().await {
                Ok(n) => results.push(n),
                Err(err) => {
                    self.client.poison(&err);
                    self.count = 0;
                    return Err(err);
                }
            }
            self.count -= 1;
        }

        Ok(results)
    }

    /// 如果每个回复都等于 `SUCCESS`，则返回 `true`。
    pub async fn read_all_as_ints_have_success(&mut self) -> crate::Result<bool> {
        let results = self.read_all_as_ints().await?;
        Ok(results.iter().all(|n| *n == SUCCESS))
    }
}

/// [`PipelineCommand`] 的阻塞版本。
#[derive(Debug)]
pub struct BlockingPipelineCommand<'a> {
    client: &'a mut BlockingClient,
    count: usize,
}

impl<'a> BlockingPipelineCommand<'a> {
    pub(crate) fn new(client: &'a mut BlockingClient) -> BlockingPipelineCommand<'a> {
        BlockingPipelineCommand { client, count: 0 }
    }

    pub fn write<I>(&mut self, args: I) -> crate::Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.client.write_command(args)?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn flush(&mut self) -> crate::Result<()> {
        self.client.flush_send_buffer()
    }

    pub fn read_all_as_ints(&mut self) -> crate::Result<Vec<i64>> {
        let BlockingClient { inner, rt } = &mut *self.client;
        let mut batch = PipelineCommand {
            client: inner,
            count: self.count,
        };

        let res = rt.block_on(batch.read_all_as_ints());
        self.count = batch.count;
        res
    }

    pub fn read_all_as_ints_have_success(&mut self) -> crate::Result<bool> {
        let results = self.read_all_as_ints()?;
        Ok(results.iter().all(|n| *n == SUCCESS))
    }
}
