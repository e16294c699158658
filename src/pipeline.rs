//! 管道：多个命令，一次刷新，按顺序读回回复。

use crate::cancel::Cancellation;
use crate::clients::{BlockingClient, Claim, Client};
use crate::command_queue::{CommandQueue, QueueCommands};
use crate::error::UsageError;

use tracing::{debug, instrument};

/// 管道或事务的生命周期。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// 接受命令。
    Open,
    /// 重放时重新执行写入部分。
    Executing,
    /// 正在读回回复。
    Flushing,
    /// 所有回复都已处理，客户端已释放。
    Closed,
    /// 有回复无法处理，客户端已中毒。
    Poisoned,
}

/// 一次刷新发送给服务器的一批命令。
///
/// 打开管道会占用客户端。在管道刷新或丢弃之前，其他管道或事务都不能使用它。
/// 每个排队命令的请求立即进入客户端的发送缓冲区，刷新管道时再把回复分发给它的监听器。
///
/// 管道不持有客户端：需要客户端的调用都把它作为参数，而且必须传入打开管道时的那个客户端。
///
/// # Examples
///
/// ```no_run
/// use mini_redis_pipeline::{Client, Pipeline, QueueCommands};
///
/// #[tokio::main]
/// async fn main() -> mini_redis_pipeline::Result<()> {
///     let mut client = Client::connect("localhost:6379").await?;
///
///     let mut pipeline = Pipeline::open(&mut client)?;
///     pipeline.queue_void(&mut client, |c| c.write_command(["SET", "hello", "world"]), || {})?;
///     pipeline.queue_long(&mut client, |c| c.write_command(["INCR", "counter"]), |n| {
///         println!("counter = {}", n);
///     })?;
///     pipeline.flush_async(&mut client).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Pipeline {
    queue: CommandQueue,
    state: State,
}

impl Pipeline {
    /// 在 `client` 上打开管道并占用它。
    pub fn open<C: AsMut<Client>>(client: &mut C) -> crate::Result<Pipeline> {
        client.as_mut().claim(Claim::Pipeline)?;

        Ok(Pipeline {
            queue: CommandQueue::new(Claim::Pipeline),
            state: State::Open,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// 已完成的命令数。
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 发送所有排队命令并分发回复（阻塞）。
    pub fn flush(&mut self, client: &mut BlockingClient) -> crate::Result<()> {
        let BlockingClient { inner, rt } = client;
        rt.block_on(self.flush_async(inner))
    }

    /// 发送所有排队命令并分发回复。
    ///
    /// 无论结果如何都会释放客户端。如果回复无法读取，或者解码失败且没有错误回调接收，
    /// 客户端会中毒并返回错误：线路上剩余的回复已无法与命令对应。
    pub async fn flush_async(&mut self, client: &mut Client) -> crate::Result<()> {
        self.flush_inner(client, None).await
    }

    /// 与 `flush_async` 相同，但 `cancel` 触发后读取回复立即放弃。被取消的刷新会使客户端中毒。
    pub async fn flush_async_cancellable(
        &mut self,
        client: &mut Client,
        cancel: &mut Cancellation,
    ) -> crate::Result<()> {
        self.flush_inner(client, Some(cancel)).await
    }

    #[instrument(skip_all)]
    async fn flush_inner(
        &mut self,
        client: &mut Client,
        cancel: Option<&mut Cancellation>,
    ) -> crate::Result<()> {
        if !matches!(self.state, State::Open | State::Executing) {
            return Err(UsageError::InvalidState("pipeline is not open").into());
        }
        self.queue.ensure_closed()?;
        client.ensure_claimed(Claim::Pipeline)?;

        debug!(commands = self.queue.len(), "flushing pipeline");
        self.queue.seal();
        self.state = State::Flushing;

        let res = self.process_results(client, cancel).await;

        self.state = match res {
            Ok(()) => State::Closed,
            Err(ref err) => {
                client.poison(err);
                State::Poisoned
            }
        };
        client.release();

        res
    }

    async fn process_results(
        &mut self,
        client: &mut Client,
        mut cancel: Option<&mut Cancellation>,
    ) -> crate::Result<()> {
        client.flush_send_buffer().await?;

        for (position, command) in self.queue.commands_mut().iter_mut().enumerate() {
            let frame = match cancel.as_deref_mut() {
                Some(cancel) => client.read_reply_cancellable(cancel).await?,
                None => client.read_reply().await?,
            };

            if let Err(err) = command.op.process(frame) {
                debug!(position, cause = %err, "queued command failed");
                return Err(err);
            }
        }

        Ok(())
    }

    /// 在阻塞路径上重新发出所有排队命令并再次刷新。
    ///
    /// 只有刷新过的管道才能重放。失败之后要在新连接上重放：中毒的客户端不能被占用。
    pub fn replay(&mut self, client: &mut BlockingClient) -> crate::Result<()> {
        self.begin_replay(&mut client.inner)?;

        for command in self.queue.commands_mut() {
            if let Err(err) = command.execute(&mut client.inner) {
                self.abort_replay(&mut client.inner);
                return Err(err);
            }
        }

        self.flush(client)
    }

    /// 在异步路径上重新发出所有排队命令并再次刷新。
    pub async fn replay_async(&mut self, client: &mut Client) -> crate::Result<()> {
        self.begin_replay(client)?;

        for command in self.queue.commands_mut() {
            if let Err(err) = command.execute_async(client).await {
                self.abort_replay(client);
                return Err(err);
            }
        }

        self.flush_async(client).await
    }

    fn begin_replay(&mut self, client: &mut Client) -> crate::Result<()> {
        if !matches!(self.state, State::Closed | State::Poisoned) {
            return Err(
                UsageError::InvalidState("pipeline must be flushed before it is replayed").into(),
            );
        }

        client.claim(Claim::Pipeline)?;

        debug!(commands = self.queue.len(), "replaying pipeline");
        self.state = State::Executing;
        Ok(())
    }

    fn abort_replay(&mut self, client: &mut Client) {
        client.reset_send_buffer();
        client.release();
        self.state = State::Closed;
    }

    /// 放弃管道。尚未刷新的命令从发送缓冲区中丢弃，并释放客户端。
    pub fn dispose<C: AsMut<Client>>(mut self, client: &mut C) {
        // 刷新之后，占用已不归本管道释放。
        if matches!(self.state, State::Open | State::Executing) {
            let client = client.as_mut();
            self.queue.discard_open();
            client.reset_send_buffer();
            client.release();
            debug!(commands = self.queue.len(), "pipeline disposed");
        }
    }
}

impl QueueCommands for Pipeline {
    fn command_queue(&mut self) -> &mut CommandQueue {
        &mut self.queue
    }
}
