//! 延迟执行的操作。
//!
//! `QueuedOperation` 是一次延迟调用的读取部分：要解码的回复形状，以及要通知谁。
//! `QueuedCommand` 加上写入部分，即把请求放入客户端发送缓冲区的闭包，这样批次重放时可以重新发出同一调用。

use crate::clients::Client;
use crate::error::UsageError;
use crate::reply::{self, ReadKind, Reply, SUCCESS};
use crate::Frame;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// 写入部分在阻塞路径还是异步路径上运行。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sync,
    Async,
}

impl fmt::Display for Mode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Sync => "sync".fmt(fmt),
            Mode::Async => "async".fmt(fmt),
        }
    }
}

/// 成功回调，按其接受的值类别注册。
///
/// 一个解码后的回复会提供给操作的每个监听器，类别与回复形状兼容的监听器会被调用。
pub enum Listener {
    Void(Box<dyn FnMut() + Send>),
    Int(Box<dyn FnMut(i32) + Send>),
    Long(Box<dyn FnMut(i64) + Send>),
    Double(Box<dyn FnMut(f64) + Send>),
    Bool(Box<dyn FnMut(bool) + Send>),
    Bytes(Box<dyn FnMut(Option<Bytes>) + Send>),
    MultiBytes(Box<dyn FnMut(Vec<Bytes>) + Send>),
    String(Box<dyn FnMut(Option<String>) + Send>),
    /// `TYPE` 返回的键类型名称。
    TypeString(Box<dyn FnMut(Option<String>) + Send>),
    MultiString(Box<dyn FnMut(Vec<String>) + Send>),
    MultiTypeString(Box<dyn FnMut(Vec<String>) + Send>),
    Dictionary(Box<dyn FnMut(HashMap<String, String>) + Send>),
    /// 渲染为文本的回复树。
    Text(Box<dyn FnMut(String) + Send>),
    /// 回复树本身。
    Data(Box<dyn FnMut(Frame) + Send>),
}

impl Listener {
    pub fn void(f: impl FnMut() + Send + 'static) -> Listener {
        Listener::Void(Box::new(f))
    }

    pub fn int(f: impl FnMut(i32) + Send + 'static) -> Listener {
        Listener::Int(Box::new(f))
    }

    pub fn long(f: impl FnMut(i64) + Send + 'static) -> Listener {
        Listener::Long(Box::new(f))
    }

    pub fn double(f: impl FnMut(f64) + Send + 'static) -> Listener {
        Listener::Double(Box::new(f))
    }

    pub fn bool(f: impl FnMut(bool) + Send + 'static) -> Listener {
        Listener::Bool(Box::new(f))
    }

    pub fn bytes(f: impl FnMut(Option<Bytes>) + Send + 'static) -> Listener {
        Listener::Bytes(Box::new(f))
    }

    pub fn multi_bytes(f: impl FnMut(Vec<Bytes>) + Send + 'static) -> Listener {
        Listener::MultiBytes(Box::new(f))
    }

    pub fn string(f: impl FnMut(Option<String>) + Send + 'static) -> Listener {
        Listener::String(Box::new(f))
    }

    pub fn type_string(f: impl FnMut(Option<String>) + Send + 'static) -> Listener {
        Listener::TypeString(Box::new(f))
    }

    pub fn multi_string(f: impl FnMut(Vec<String>) + Send + 'static) -> Listener {
        Listener::MultiString(Box::new(f))
    }

    pub fn multi_type_string(f: impl FnMut(Vec<String>) + Send + 'static) -> Listener {
        Listener::MultiTypeString(Box::new(f))
    }

    /// 以集合形式接收成员的多字符串监听器。
    pub fn set(mut f: impl FnMut(HashSet<String>) + Send + 'static) -> Listener {
        Listener::MultiString(Box::new(move |items: Vec<String>| {
            f(items.into_iter().collect())
        }))
    }

    pub fn dictionary(f: impl FnMut(HashMap<String, String>) + Send + 'static) -> Listener {
        Listener::Dictionary(Box::new(f))
    }

    pub fn text(f: impl FnMut(String) + Send + 'static) -> Listener {
        Listener::Text(Box::new(f))
    }

    pub fn data(f: impl FnMut(Frame) + Send + 'static) -> Listener {
        Listener::Data(Box::new(f))
    }

    fn category(&self) -> &'static str {
        match self {
            Listener::Void(_) => "void",
            Listener::Int(_) => "int",
            Listener::Long(_) => "long",
            Listener::Double(_) => "double",
            Listener::Bool(_) => "bool",
            Listener::Bytes(_) => "bytes",
            Listener::MultiBytes(_) => "multi_bytes",
            Listener::String(_) => "string",
            Listener::TypeString(_) => "type_string",
            Listener::MultiString(_) => "multi_string",
            Listener::MultiTypeString(_) => "multi_type_string",
            Listener::Dictionary(_) => "dictionary",
            Listener::Text(_) => "text",
            Listener::Data(_) => "data",
        }
    }

    /// 将 `reply` 提供给此监听器，类别兼容时调用它。
    fn notify(&mut self, reply: &Reply) {
        match (self, reply) {
            (Listener::Void(f), Reply::Void | Reply::Int(_) | Reply::Long(_)) => f(),

            (Listener::Int(f), Reply::Int(n)) => f(*n),
            // 与 C 的强制转换一样截断。
            (Listener::Int(f), Reply::Long(n)) => f(*n as i32),
            (Listener::Int(f), Reply::Bytes(data)) => f(parse_int(data)),

            (Listener::Long(f), Reply::Int(n)) => f(i64::from(*n)),
            (Listener::Long(f), Reply::Long(n)) => f(*n),

            (Listener::Double(f), Reply::Double(d)) => f(*d),

            (Listener::Bool(f), Reply::Int(n)) => f(i64::from(*n) == SUCCESS),
            (Listener::Bool(f), Reply::Long(n)) => f(*n == SUCCESS),
            (Listener::Bool(f), Reply::Bytes(data)) => {
                f(matches!(data, Some(data) if &data[..] == b"OK"))
            }
            (Listener::Bool(f), Reply::Bool(b)) => f(*b),

            (Listener::Bytes(f), Reply::Bytes(data)) => f(data.clone()),

            (Listener::String(f) | Listener::TypeString(f), Reply::Bytes(data)) => {
                f(data.as_ref().map(|data| reply::utf8(data)))
            }
            (Listener::String(f) | Listener::TypeString(f), Reply::String(s)) => f(s.clone()),

            (Listener::MultiBytes(f), Reply::MultiBytes(items)) => f(items.clone()),
            (
                Listener::MultiString(f) | Listener::MultiTypeString(f),
                Reply::MultiBytes(items),
            ) => f(items.iter().map(|data| reply::utf8(data)).collect()),
            (Listener::MultiString(f), Reply::MultiString(items)) => f(items.clone()),

            (Listener::Dictionary(f), Reply::MultiBytes(items)) => f(reply::pairs(items)),
            (Listener::Dictionary(f), Reply::Dictionary(map)) => f(map.clone()),

            (Listener::Text(f), Reply::Data(frame)) => f(frame.to_string()),
            (Listener::Data(f), Reply::Data(frame)) => f(frame.clone()),

            _ => {}
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Listener({})", self.category())
    }
}

fn parse_int(data: &Option<Bytes>) -> i32 {
    data.as_ref()
        .and_then(|data| std::str::from_utf8(data).ok())
        .and_then(|s| s.parse::<i32>().ok())
        .unwrap_or(0)
}

/// 将监听器 panic 的载荷转换为错误。
fn listener_panic(payload: Box<dyn Any + Send>) -> crate::Error {
    let msg = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload");

    warn!(cause = msg, "listener panicked");
    format!("listener panicked: {}", msg).into()
}

type ErrorCallback = Box<dyn FnMut(&crate::Error) + Send>;

/// 一次延迟调用的读取部分。
///
/// 它在所属队列中的位置就是关联键：第 n 个操作消费第 n 个回复。
#[derive(Default)]
pub struct QueuedOperation {
    read: Option<ReadKind>,
    listeners: Vec<Listener>,
    on_error: Option<ErrorCallback>,
}

impl QueuedOperation {
    pub fn new() -> QueuedOperation {
        QueuedOperation::default()
    }

    /// 已绑定的回复形状（如果有）。
    pub fn read_kind(&self) -> Option<ReadKind> {
        self.read
    }

    pub fn listen(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// 设置错误回调，替换之前的回调。
    pub fn set_on_error(&mut self, f: impl FnMut(&crate::Error) + Send + 'static) {
        self.on_error = Some(Box::new(f));
    }

    /// 绑定回复形状。一个操作最多绑定一次。
    pub fn bind(&mut self, kind: ReadKind) -> crate::Result<()> {
        if let Some(bound) = self.read {
            warn!(?bound, requested = ?kind, "read command already bound");
            return Err(UsageError::ReadAlreadyBound.into());
        }

        self.read = Some(kind);
        Ok(())
    }

    /// 按注册顺序将解码后的回复提供给每个已注册的监听器。
    pub fn dispatch(&mut self, reply: &Reply) {
        for listener in &mut self.listeners {
            listener.notify(reply);
        }
    }

    /// 按绑定的形状解码 `frame` 并分发。
    ///
    /// 解码失败（包括服务器错误回复）或监听器 panic 时，有错误回调则交给它，否则返回错误。
    pub fn process(&mut self, frame: Frame) -> crate::Result<()> {
        let kind = self.read.ok_or(UsageError::ReadNotBound)?;

        let res = kind.decode(frame).and_then(|reply| {
            panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&reply)))
                .map_err(listener_panic)
        });

        match res {
            Ok(()) => Ok(()),
            Err(err) => match self.on_error.as_mut() {
                Some(on_error) => {
                    debug!(cause = %err, "reply delivered to error callback");
                    on_error(&err);
                    Ok(())
                }
                None => Err(err),
            },
        }
    }
}

impl fmt::Debug for QueuedOperation {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("QueuedOperation")
            .field("read", &self.read)
            .field("listeners", &self.listeners)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

type SyncWrite = Box<dyn FnMut(&mut Client) -> crate::Result<()> + Send>;
type AsyncWrite = Box<dyn for<'a> FnMut(&'a mut Client) -> BoxFuture<'a, crate::Result<()>> + Send>;

/// 一次延迟调用的写入部分。
///
/// 作为枚举，一个命令恰好有一个写入部分，且只有一种模式。
pub enum WriteCommand {
    Sync(SyncWrite),
    Async(AsyncWrite),
}

impl WriteCommand {
    pub fn mode(&self) -> Mode {
        match self {
            WriteCommand::Sync(_) => Mode::Sync,
            WriteCommand::Async(_) => Mode::Async,
        }
    }

    fn mismatch(&self, expected: Mode) -> crate::Error {
        UsageError::ModeMismatch {
            expected,
            actual: self.mode(),
        }
        .into()
    }
}

impl fmt::Debug for WriteCommand {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "WriteCommand({})", self.mode())
    }
}

/// 一次延迟调用的两个部分。
#[derive(Debug)]
pub struct QueuedCommand {
    pub(crate) op: QueuedOperation,
    write: WriteCommand,
}

impl QueuedCommand {
    pub fn new(write: WriteCommand) -> QueuedCommand {
        QueuedCommand {
            op: QueuedOperation::new(),
            write,
        }
    }

    pub fn operation(&self) -> &QueuedOperation {
        &self.op
    }

    pub fn mode(&self) -> Mode {
        self.write.mode()
    }

    /// 在阻塞路径上运行写入部分。
    pub fn execute(&mut self, client: &mut Client) -> crate::Result<()> {
        match &mut self.write {
            WriteCommand::Sync(write) => write(client),
            WriteCommand::Async(_) => Err(self.write.mismatch(Mode::Sync)),
        }
    }

    /// 在异步路径上运行写入部分。
    pub async fn execute_async(&mut self, client: &mut Client) -> crate::Result<()> {
        match &mut self.write {
            WriteCommand::Async(write) => write(client).await,
            WriteCommand::Sync(_) => Err(self.write.mismatch(Mode::Async)),
        }
    }

    /// 在入队时运行写入部分。
    ///
    /// 异步写入部分必须在第一次 poll 时完成：两条路径上的排队都是同步的。挂起的写入会被丢弃，不会恢复。
    pub(crate) fn execute_eager(&mut self, client: &mut Client) -> crate::Result<()> {
        match &mut self.write {
            WriteCommand::Sync(write) => write(client),
            WriteCommand::Async(write) => match write(client).now_or_never() {
                Some(res) => res,
                None => {
                    warn!("asynchronous write suspended while being queued");
                    Err(UsageError::WriteSuspended.into())
                }
            },
        }
    }
}
