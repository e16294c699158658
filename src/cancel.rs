use tokio::sync::broadcast;

/// 监听取消请求。
///
/// 使用 `broadcast::Receiver` 发送取消信号。仅发送一个值。一旦通过广播信道发送了一个值，等待此 `Cancellation` 的回复读取就会放弃。
///
/// `Cancellation` 结构监听信号并跟踪信号是否已接收。调用者可以查询是否已接收取消信号。
#[derive(Debug)]
pub struct Cancellation {
    /// 如果取消信号已接收，则为 `true`
    is_cancelled: bool,

    /// 用于监听取消的通道的接收端。
    notify: broadcast::Receiver<()>,
}

/// 发送端，由可能发起取消的一方持有。
#[derive(Debug, Clone)]
pub struct Canceller {
    notify: broadcast::Sender<()>,
}

/// 创建一对相连的 `Canceller` / `Cancellation`。
pub fn cancellation() -> (Canceller, Cancellation) {
    let (notify, rx) = broadcast::channel(1);

    (
        Canceller { notify },
        Cancellation {
            is_cancelled: false,
            notify: rx,
        },
    )
}

impl Canceller {
    /// 请求取消。多次调用没有额外效果。
    pub fn cancel(&self) {
        // 只有所有接收端都已丢弃时才会失败，此时没有人在等待。
        let _ = self.notify.send(());
    }
}

impl Cancellation {
    /// 如果已接收取消信号，则返回 `true`。
    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled
    }

    /// 接收取消通知，必要时等待。
    pub async fn recv(&mut self) {
        // 如果已经接收到取消信号，则立即返回。
        if self.is_cancelled {
            return;
        }

        match self.notify.recv().await {
            // 无法接收“滞后错误”，因为只发送一个值。
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            // 所有 `Canceller` 都未取消就被丢弃：永不返回。
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }

        // 记住已接收到信号。
        self.is_cancelled = true;
    }
}
