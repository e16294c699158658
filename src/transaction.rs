//! `MULTI` / `EXEC` 事务。
//!
//! 事务与管道一样排队命令，只是前后加上 `MULTI` 和 `EXEC`。提交之前没有任何内容到达服务器，
//! 所以放弃事务不需要发送 `DISCARD`。

use crate::clients::{BlockingClient, Claim, Client};
use crate::command_queue::{CommandQueue, QueueCommands};
use crate::error::UsageError;
use crate::pipeline::State;
use crate::Frame;

use tracing::{debug, instrument, warn};

/// `EXEC` 的返回结果。
enum Exec {
    /// 所有排队命令都已执行，回复已分发。
    Committed,
    /// 被监视的键发生变化，没有执行任何命令。
    Aborted,
    /// 服务器拒绝执行事务，例如 `EXECABORT`。
    Rejected(String),
}

/// 由服务器原子执行的一批命令。
///
/// ```no_run
/// use mini_redis_pipeline::{Client, QueueCommands, Transaction};
///
/// #[tokio::main]
/// async fn main() -> mini_redis_pipeline::Result<()> {
///     let mut client = Client::connect("localhost:6379").await?;
///
///     let mut tx = Transaction::open(&mut client)?;
///     tx.queue_long(&mut client, |c| c.write_command(["INCR", "a"]), |_| {})?;
///     tx.queue_long(&mut client, |c| c.write_command(["INCR", "b"]), |_| {})?;
///     let committed = tx.commit_async(&mut client).await?;
///     assert!(committed);
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Transaction {
    queue: CommandQueue,
    state: State,
}

impl Transaction {
    /// 在 `client` 上打开事务，占用它并缓冲 `MULTI`。
    pub fn open<C: AsMut<Client>>(client: &mut C) -> crate::Result<Transaction> {
        let client = client.as_mut();
        client.claim(Claim::Transaction)?;

        if let Err(err) = client.write_command(["MULTI"]) {
            client.release();
            return Err(err);
        }

        Ok(Transaction {
            queue: CommandQueue::new(Claim::Transaction),
            state: State::Open,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 提交事务（阻塞）。
    pub fn commit(&mut self, client: &mut BlockingClient) -> crate::Result<bool> {
        let BlockingClient { inner, rt } = client;
        rt.block_on(self.commit_async(inner))
    }

    /// 发送 `EXEC` 并分发每个命令的回复。
    ///
    /// 如果服务器因被监视的键变化而中止事务，返回 `Ok(false)`。`EXEC` 的错误回复作为错误返回，
    /// 此时连接仍然同步，不会中毒。其他失败都会使客户端中毒。任何情况下都会释放客户端。
    #[instrument(skip_all)]
    pub async fn commit_async(&mut self, client: &mut Client) -> crate::Result<bool> {
        if !matches!(self.state, State::Open | State::Executing) {
            return Err(UsageError::InvalidState("transaction is not open").into());
        }
        self.queue.ensure_closed()?;
        client.ensure_claimed(Claim::Transaction)?;

        debug!(commands = self.queue.len(), "committing transaction");
        self.queue.seal();
        self.state = State::Flushing;

        let res = self.exec(client).await;

        let (state, res): (State, crate::Result<bool>) = match res {
            Ok(Exec::Committed) => (State::Closed, Ok(true)),
            Ok(Exec::Aborted) => {
                debug!("transaction aborted by server");
                (State::Closed, Ok(false))
            }
            Ok(Exec::Rejected(msg)) => {
                warn!(%msg, "transaction rejected");
                (State::Closed, Err(msg.into()))
            }
            Err(err) => {
                client.poison(&err);
                (State::Poisoned, Err(err))
            }
        };
        self.state = state;
        client.release();

        res
    }

    async fn exec(&mut self, client: &mut Client) -> crate::Result<Exec> {
        client.write_command(["EXEC"])?;
        client.flush_send_buffer().await?;

        // MULTI
        client.expect_success().await?;

        for _ in 0..self.queue.len() {
            match client.read_reply().await? {
                Frame::Simple(ref s) if s == "QUEUED" => {}
                // 服务器会记住这个错误，并以 EXECABORT 回复 EXEC。
                Frame::Error(msg) => warn!(%msg, "command rejected while queueing"),
                frame => return Err(frame.to_error()),
            }
        }

        match client.read_reply().await? {
            Frame::Array(replies) => {
                if replies.len() != self.queue.len() {
                    return Err(format!(
                        "protocol error; expected {} EXEC replies, got {}",
                        self.queue.len(),
                        replies.len()
                    )
                    .into());
                }

                for (command, frame) in self.queue.commands_mut().iter_mut().zip(replies) {
                    command.op.process(frame)?;
                }

                Ok(Exec::Committed)
            }
            Frame::Null => Ok(Exec::Aborted),
            Frame::Error(msg) => Ok(Exec::Rejected(msg)),
            frame => Err(frame.to_error()),
        }
    }

    /// 在阻塞路径上用新的 `MULTI` 重新发出所有排队命令并再次提交。
    pub fn replay(&mut self, client: &mut BlockingClient) -> crate::Result<bool> {
        self.begin_replay(&mut client.inner)?;

        for command in self.queue.commands_mut() {
            if let Err(err) = command.execute(&mut client.inner) {
                self.abort_replay(&mut client.inner);
                return Err(err);
            }
        }

        self.commit(client)
    }

    /// 在异步路径上用新的 `MULTI` 重新发出所有排队命令并再次提交。
    pub async fn replay_async(&mut self, client: &mut Client) -> crate::Result<bool> {
        self.begin_replay(client)?;

        for command in self.queue.commands_mut() {
            if let Err(err) = command.execute_async(client).await {
                self.abort_replay(client);
                return Err(err);
            }
        }

        self.commit_async(client).await
    }

    fn begin_replay(&mut self, client: &mut Client) -> crate::Result<()> {
        if !matches!(self.state, State::Closed | State::Poisoned) {
            return Err(UsageError::InvalidState(
                "transaction must be committed before it is replayed",
            )
            .into());
        }

        client.claim(Claim::Transaction)?;

        if let Err(err) = client.write_command(["MULTI"]) {
            client.release();
            return Err(err);
        }

        debug!(commands = self.queue.len(), "replaying transaction");
        self.state = State::Executing;
        Ok(())
    }

    fn abort_replay(&mut self, client: &mut Client) {
        client.reset_send_buffer();
        client.release();
        self.state = State::Closed;
    }

    /// 在提交前放弃事务。丢弃缓冲的 `MULTI` 和命令，并释放客户端。
    pub fn dispose<C: AsMut<Client>>(mut self, client: &mut C) {
        if matches!(self.state, State::Open | State::Executing) {
            let client = client.as_mut();
            self.queue.discard_open();
            client.reset_send_buffer();
            client.release();
            debug!(commands = self.queue.len(), "transaction disposed");
        }
    }
}

impl QueueCommands for Transaction {
    fn command_queue(&mut self) -> &mut CommandQueue {
        &mut self.queue
    }
}
