//! 一个极简 Redis 客户端的管道与事务命令队列。
//!
//! 在 [`Pipeline`] 或 [`Transaction`] 上排队的命令会立即写入客户端的发送缓冲区。一次刷新就把它们全部发出，
//! 然后按顺序读回回复，每个回复按其命令要求的形状解码，再交给为它注册的回调。
//!
//! # 布局
//!
//! 主要组件有：
//!
//! * `clients`：异步 [`Client`] 以及包装它的 [`BlockingClient`]。两者都缓冲写入、读取类型化的回复，
//!   并持有把连接限定给一个活动批次的占用标记。
//!
//! * `pipeline`、`transaction`：两种批次。排队逻辑通过 [`QueueCommands`] trait 共享。
//!
//! * `queued`、`reply`：排队命令的组成，以及每种回复形状如何解码并分发给监听器。
//!
//! * `frame`、`connection`：RESP 线路格式和带缓冲的套接字。

pub mod clients;
pub use clients::{BlockingClient, Claim, Client};

pub mod cancel;
pub use cancel::{cancellation, Cancellation, Canceller};

pub mod command_queue;
pub use command_queue::{CommandQueue, OpenCommand, QueueCommands};

mod connection;
pub use connection::Connection;

pub mod error;
pub use error::{usage_error, UsageError};

pub mod frame;
pub use frame::Frame;

mod parse;

pub mod pipeline;
pub use pipeline::{Pipeline, State};

pub mod pipeline_command;
pub use pipeline_command::{BlockingPipelineCommand, PipelineCommand};

pub mod queued;
pub use queued::{Listener, Mode};

pub mod reply;
pub use reply::{ReadKind, Reply, SUCCESS};

pub mod transaction;
pub use transaction::Transaction;

/// Redis 服务器监听的默认端口。
pub const DEFAULT_PORT: u16 = 6379;

/// 大多数函数返回的错误。
///
/// 大多数失败是只需上报的协议错误或服务器错误，装箱的 `std::error::Error` 就够了。
/// 违反调用约定时返回装箱的 [`UsageError`]，可以用 `downcast_ref` 取回。
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// 客户端操作专用的 `Result` 类型。
///
/// 这是为了方便而定义的。
pub type Result<T> = std::result::Result<T, Error>;
