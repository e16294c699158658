//! 违反调用约定的错误。
//!
//! 这些错误表示调用代码有缺陷，而不是暂时状况，在违反处立即返回，不会重试。
//! 它们装箱在 `crate::Error` 中，用 `downcast_ref::<UsageError>()` 匹配。

use crate::clients::Claim;
use crate::queued::Mode;

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    /// 客户端上已有活动的管道或事务。
    AlreadyClaimed(Claim),

    /// 客户端不属于正在驱动的管道或事务。
    NotClaimed,

    /// 排队命令已开始但未完成。
    OperationStillOpen,

    /// 该操作已绑定读取命令。
    ReadAlreadyBound,

    /// 操作在没有读取命令的情况下进入了结果处理。
    ReadNotBound,

    /// 写入部分以错误的模式执行。
    ModeMismatch { expected: Mode, actual: Mode },

    /// 异步写入部分在排队时挂起。
    WriteSuspended,

    /// 管道或事务在当前状态下不能执行该调用。
    InvalidState(&'static str),

    /// 客户端在批次中途失败，不能再使用。
    ConnectionPoisoned,
}

impl std::error::Error for UsageError {}

impl fmt::Display for UsageError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UsageError::AlreadyClaimed(claim) => {
                write!(fmt, "a {} is already active on this connection", claim)
            }
            UsageError::NotClaimed => "connection is not owned by this batch".fmt(fmt),
            UsageError::OperationStillOpen => {
                "previous queued command has not been completed".fmt(fmt)
            }
            UsageError::ReadAlreadyBound => {
                "only a single read command can be bound to a queued operation".fmt(fmt)
            }
            UsageError::ReadNotBound => "queued operation has no read command".fmt(fmt),
            UsageError::ModeMismatch { expected, actual } => write!(
                fmt,
                "{} write command cannot be executed on the {} path",
                actual, expected
            ),
            UsageError::WriteSuspended => {
                "write command must complete without suspending when queued".fmt(fmt)
            }
            UsageError::InvalidState(msg) => write!(fmt, "invalid state; {}", msg),
            UsageError::ConnectionPoisoned => {
                "connection failed mid-batch and must be discarded".fmt(fmt)
            }
        }
    }
}

/// 返回 `err` 携带的 `UsageError`（如果有）。
pub fn usage_error(err: &crate::Error) -> Option<UsageError> {
    err.downcast_ref::<UsageError>().copied()
}
