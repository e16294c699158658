//! 管道和事务共用的队列。
//!
//! 排队一个调用会立即运行其写入部分，请求按调用顺序进入客户端的发送缓冲区，调用处于*打开*状态。
//! 调用方随后通过返回的 [`OpenCommand`] 添加监听器，并指定回复形状来完成它，从而把它移入队列。

use crate::clients::{Claim, Client};
use crate::error::UsageError;
use crate::queued::{Listener, QueuedCommand, WriteCommand};
use crate::reply::ReadKind;
use crate::Frame;

use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// 有序的延迟调用，以及仍在构建中的那个调用（如果有）。
#[derive(Debug)]
pub struct CommandQueue {
    claim: Claim,
    queued: Vec<QueuedCommand>,
    open: Option<QueuedCommand>,

    /// 所有者开始刷新时设置，之后不再接受调用。
    sealed: bool,
}

impl CommandQueue {
    pub(crate) fn new(claim: Claim) -> CommandQueue {
        CommandQueue {
            claim,
            queued: vec![],
            open: None,
            sealed: false,
        }
    }

    /// 已完成的调用数。
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// 有排队调用尚未完成时返回 `true`。
    pub fn has_open(&self) -> bool {
        self.open.is_some()
    }

    pub(crate) fn ensure_closed(&self) -> crate::Result<()> {
        if self.open.is_some() {
            return Err(UsageError::OperationStillOpen.into());
        }

        Ok(())
    }

    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    pub(crate) fn commands_mut(&mut self) -> &mut [QueuedCommand] {
        &mut self.queued
    }

    /// 丢弃打开的调用（如果有）。它的请求仍在发送缓冲区中，所以只能在重置该缓冲区时调用。
    pub(crate) fn discard_open(&mut self) {
        self.open = None;
    }

    fn enqueue(
        &mut self,
        client: &mut Client,
        mut command: QueuedCommand,
    ) -> crate::Result<OpenCommand<'_>> {
        if self.sealed {
            return Err(UsageError::InvalidState("batch no longer accepts commands").into());
        }
        client.ensure_claimed(self.claim)?;
        self.ensure_closed()?;

        command.execute_eager(client)?;

        debug!(position = self.queued.len(), mode = %command.mode(), "command queued");
        self.open = Some(command);

        Ok(OpenCommand { queue: self })
    }

    fn complete(&mut self, kind: ReadKind) -> crate::Result<()> {
        let mut command = match self.open.take() {
            Some(command) => command,
            None => return Ok(()),
        };

        if let Err(err) = command.op.bind(kind) {
            self.open = Some(command);
            return Err(err);
        }

        self.queued.push(command);
        Ok(())
    }
}

/// 最近排队的调用的句柄。
///
/// 可以添加任意数量的监听器和最多一个错误回调，然后用期望的回复形状完成它。完成之前不能再排队其他调用。
#[must_use = "a queued command must be completed before another is queued"]
#[derive(Debug)]
pub struct OpenCommand<'q> {
    queue: &'q mut CommandQueue,
}

impl<'q> OpenCommand<'q> {
    /// 注册一个监听器。
    pub fn on(mut self, listener: Listener) -> Self {
        if let Some(command) = self.queue.open.as_mut() {
            command.op.listen(listener);
        }
        self
    }

    pub fn on_void(self, f: impl FnMut() + Send + 'static) -> Self {
        self.on(Listener::void(f))
    }

    pub fn on_int(self, f: impl FnMut(i32) + Send + 'static) -> Self {
        self.on(Listener::int(f))
    }

    pub fn on_long(self, f: impl FnMut(i64) + Send + 'static) -> Self {
        self.on(Listener::long(f))
    }

    pub fn on_double(self, f: impl FnMut(f64) + Send + 'static) -> Self {
        self.on(Listener::double(f))
    }

    pub fn on_bool(self, f: impl FnMut(bool) + Send + 'static) -> Self {
        self.on(Listener::bool(f))
    }

    pub fn on_bytes(self, f: impl FnMut(Option<Bytes>) + Send + 'static) -> Self {
        self.on(Listener::bytes(f))
    }

    pub fn on_multi_bytes(self, f: impl FnMut(Vec<Bytes>) + Send + 'static) -> Self {
        self.on(Listener::multi_bytes(f))
    }

    pub fn on_string(self, f: impl FnMut(Option<String>) + Send + 'static) -> Self {
        self.on(Listener::string(f))
    }

    pub fn on_type_string(self, f: impl FnMut(Option<String>) + Send + 'static) -> Self {
        self.on(Listener::type_string(f))
    }

    pub fn on_multi_string(self, f: impl FnMut(Vec<String>) + Send + 'static) -> Self {
        self.on(Listener::multi_string(f))
    }

    pub fn on_multi_type_string(self, f: impl FnMut(Vec<String>) + Send + 'static) -> Self {
        self.on(Listener::multi_type_string(f))
    }

    pub fn on_set(self, f: impl FnMut(HashSet<String>) + Send + 'static) -> Self {
        self.on(Listener::set(f))
    }

    pub fn on_dictionary(self, f: impl FnMut(HashMap<String, String>) + Send + 'static) -> Self {
        self.on(Listener::dictionary(f))
    }

    pub fn on_text(self, f: impl FnMut(String) + Send + 'static) -> Self {
        self.on(Listener::text(f))
    }

    pub fn on_data(self, f: impl FnMut(Frame) + Send + 'static) -> Self {
        self.on(Listener::data(f))
    }

    /// 设置错误回调。后设置的会替换先设置的。
    pub fn on_error(mut self, f: impl FnMut(&crate::Error) + Send + 'static) -> Self {
        if let Some(command) = self.queue.open.as_mut() {
            command.op.set_on_error(f);
        }
        self
    }

    /// 绑定回复形状并把调用移入队列。
    pub fn complete(self, kind: ReadKind) -> crate::Result<()> {
        self.queue.complete(kind)
    }

    pub fn complete_void(self) -> crate::Result<()> {
        self.complete(ReadKind::Void)
    }

    pub fn complete_int(self) -> crate::Result<()> {
        self.complete(ReadKind::Int)
    }

    pub fn complete_long(self) -> crate::Result<()> {
        self.complete(ReadKind::Long)
    }

    pub fn complete_double(self) -> crate::Result<()> {
        self.complete(ReadKind::Double)
    }

    pub fn complete_bool(self) -> crate::Result<()> {
        self.complete(ReadKind::Bool)
    }

    pub fn complete_bytes(self) -> crate::Result<()> {
        self.complete(ReadKind::Bytes)
    }

    pub fn complete_multi_bytes(self) -> crate::Result<()> {
        self.complete(ReadKind::MultiBytes)
    }

    pub fn complete_string(self) -> crate::Result<()> {
        self.complete(ReadKind::String)
    }

    pub fn complete_multi_string(self) -> crate::Result<()> {
        self.complete(ReadKind::MultiString)
    }

    /// 集合以多条批量回复的形式到达。
    pub fn complete_set(self) -> crate::Result<()> {
        self.complete(ReadKind::MultiString)
    }

    pub fn complete_dictionary(self) -> crate::Result<()> {
        self.complete(ReadKind::Dictionary)
    }

    pub fn complete_data(self) -> crate::Result<()> {
        self.complete(ReadKind::Data)
    }
}

/// [`Pipeline`](crate::Pipeline) 和 [`Transaction`](crate::Transaction) 共用的排队操作。
///
/// `queue` 和 `queue_async` 让调用保持打开，由调用方完成。
/// `queue_*` 简写注册一个成功监听器，并用对应的回复形状完成调用。
pub trait QueueCommands {
    /// 简写操作的队列。
    fn command_queue(&mut self) -> &mut CommandQueue;

    /// 排队一个写入部分在阻塞路径上运行的调用。
    fn queue<C, F>(&mut self, client: &mut C, write: F) -> crate::Result<OpenCommand<'_>>
    where
        C: AsMut<Client>,
        F: FnMut(&mut Client) -> crate::Result<()> + Send + 'static,
    {
        let command = QueuedCommand::new(WriteCommand::Sync(Box::new(write)));
        self.command_queue().enqueue(client.as_mut(), command)
    }

    /// 排队一个写入部分在异步路径上运行的调用。
    ///
    /// 写入部分在排队时也会运行一次，且必须不挂起地完成；参见 [`UsageError::WriteSuspended`]。
    fn queue_async<C, F>(&mut self, client: &mut C, write: F) -> crate::Result<OpenCommand<'_>>
    where
        C: AsMut<Client>,
        F: for<'a> FnMut(&'a mut Client) -> BoxFuture<'a, crate::Result<()>> + Send + 'static,
    {
        let command = QueuedCommand::new(WriteCommand::Async(Box::new(write)));
        self.command_queue().enqueue(client.as_mut(), command)
    }

    fn queue_void<C, F>(
        &mut self,
        client: &mut C,
        write: F,
        on_success: impl FnMut() + Send + 'static,
    ) -> crate::Result<()>
    where
        C: AsMut<Client>,
        F: FnMut(&mut Client) -> crate::Result<()> + Send + 'static,
    {
        self.queue(client, write)?.on_void(on_success).complete_void()
    }

    fn queue_int<C, F>(
        &mut self,
        client: &mut C,
        write: F,
        on_success: impl FnMut(i32) + Send + 'static,
    ) -> crate::Result<()>
    where
        C: AsMut<Client>,
        F: FnMut(&mut Client) -> crate::Result<()> + Send + 'static,
    {
        self.queue(client, write)?.on_int(on_success).complete_int()
    }

    fn queue_long<C, F>(
        &mut self,
        client: &mut C,
        write: F,
        on_success: impl FnMut(i64) + Send + 'static,
    ) -> crate::Result<()>
    where
        C: AsMut<Client>,
        F: FnMut(&mut Client) -> crate::Result<()> + Send + 'static,
    {
        self.queue(client, write)?.on_long(on_success).complete_long()
    }

    fn queue_double<C, F>(
        &mut self,
        client: &mut C,
        write: F,
        on_success: impl FnMut(f64) + Send + 'static,
    ) -> crate::Result<()>
    where
        C: AsMut<Client>,
        F: FnMut(&mut Client) -> crate::Result<()> + Send + 'static,
    {
        self.queue(client, write)?.on_double(on_success).complete_double()
    }

    fn queue_bool<C, F>(
        &mut self,
        client: &mut C,
        write: F,
        on_success: impl FnMut(bool) + Send + 'static,
    ) -> crate::Result<()>
    where
        C: AsMut<Client>,
        F: FnMut(&mut Client) -> crate::Result<()> + Send + 'static,
    {
        self.queue(client, write)?.on_bool(on_success).complete_bool()
    }

    fn queue_bytes<C, F>(
        &mut self,
        client: &mut C,
        write: F,
        on_success: impl FnMut(Option<Bytes>) + Send + 'static,
    ) -> crate::Result<()>
    where
        C: AsMut<Client>,
        F: FnMut(&mut Client) -> crate::Result<()> + Send + 'static,
    {
        self.queue(client, write)?.on_bytes(on_success).complete_bytes()
    }

    fn queue_multi_bytes<C, F>(
        &mut self,
        client: &mut C,
        write: F,
        on_success: impl FnMut(Vec<Bytes>) + Send + 'static,
    ) -> crate::Result<()>
    where
        C: AsMut<Client>,
        F: FnMut(&mut Client) -> crate::Result<()> + Send + 'static,
    {
        self.queue(client, write)?
            .on_multi_bytes(on_success)
            .complete_multi_bytes()
    }

    fn queue_string<C, F>(
        &mut self,
        client: &mut C,
        write: F,
        on_success: impl FnMut(Option<String>) + Send + 'static,
    ) -> crate::Result<()>
    where
        C: AsMut<Client>,
        F: FnMut(&mut Client) -> crate::Result<()> + Send + 'static,
    {
        self.queue(client, write)?.on_string(on_success).complete_string()
    }

    fn queue_multi_string<C, F>(
        &mut self,
        client: &mut C,
        write: F,
        on_success: impl FnMut(Vec<String>) + Send + 'static,
    ) -> crate::Result<()>
    where
        C: AsMut<Client>,
        F: FnMut(&mut Client) -> crate::Result<()> + Send + 'static,
    {
        self.queue(client, write)?
            .on_multi_string(on_success)
            .complete_multi_string()
    }

    fn queue_set<C, F>(
        &mut self,
        client: &mut C,
        write: F,
        on_success: impl FnMut(HashSet<String>) + Send + 'static,
    ) -> crate::Result<()>
    where
        C: AsMut<Client>,
        F: FnMut(&mut Client) -> crate::Result<()> + Send + 'static,
    {
        self.queue(client, write)?.on_set(on_success).complete_set()
    }

    fn queue_dictionary<C, F>(
        &mut self,
        client: &mut C,
        write: F,
        on_success: impl FnMut(HashMap<String, String>) + Send + 'static,
    ) -> crate::Result<()>
    where
        C: AsMut<Client>,
        F: FnMut(&mut Client) -> crate::Result<()> + Send + 'static,
    {
        self.queue(client, write)?
            .on_dictionary(on_success)
            .complete_dictionary()
    }

    fn queue_data<C, F>(
        &mut self,
        client: &mut C,
        write: F,
        on_success: impl FnMut(Frame) + Send + 'static,
    ) -> crate::Result<()>
    where
        C: AsMut<Client>,
        F: FnMut(&mut Client) -> crate::Result<()> + Send + 'static,
    {
        self.queue(client, write)?.on_data(on_success).complete_data()
    }
}
