//! 集成测试用的脚本化 RESP 应答服务器。
//!
//! 服务器接受一个连接，用脚本中的下一帧回答每个请求。它运行在自己的线程和运行时上，
//! 因此阻塞客户端和异步客户端都能使用。

#![allow(dead_code)]

use mini_redis_pipeline::{Connection, Frame};

use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

/// 服务器收到的请求，每个命令一个单词列表。
pub type Requests = Vec<Vec<String>>;

/// 用下一个回复回答每个请求。回复用完后，读完客户端已发送的内容再断开。
pub fn scripted_server(replies: Vec<Frame>) -> (SocketAddr, JoinHandle<Requests>) {
    serve(replies, true)
}

/// 与 `scripted_server` 相同，但回复用完后保持连接打开且不作应答，直到客户端离开。
pub fn stalling_server(replies: Vec<Frame>) -> (SocketAddr, JoinHandle<Requests>) {
    serve(replies, false)
}

fn serve(replies: Vec<Frame>, hang_up: bool) -> (SocketAddr, JoinHandle<Requests>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async move {
            let listener = TcpListener::from_std(listener).unwrap();
            let (socket, _) = listener.accept().await.unwrap();
            let mut connection = Connection::new(socket);

            let mut replies = replies.into_iter();
            let mut requests = vec![];

            while let Ok(Some(request)) = connection.read_frame().await {
                requests.push(words(&request));

                match replies.next() {
                    Some(reply) => {
                        connection.write_frame(&reply);
                        connection.flush().await.unwrap();
                    }
                    None if hang_up => {
                        // 带着未读输入关闭会重置连接，而不是正常结束。
                        while let Ok(Ok(Some(request))) =
                            timeout(Duration::from_millis(50), connection.read_frame()).await
                        {
                            requests.push(words(&request));
                        }
                        break;
                    }
                    None => {}
                }
            }

            requests
        })
    });

    (addr, handle)
}

fn words(frame: &Frame) -> Vec<String> {
    match frame {
        Frame::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Frame::Bulk(data) => String::from_utf8_lossy(data).into_owned(),
                part => part.to_string(),
            })
            .collect(),
        frame => vec![frame.to_string()],
    }
}

pub fn ok() -> Frame {
    Frame::Simple("OK".to_string())
}

pub fn queued() -> Frame {
    Frame::Simple("QUEUED".to_string())
}

pub fn int(n: i64) -> Frame {
    Frame::Integer(n)
}

pub fn bulk(data: &'static str) -> Frame {
    Frame::Bulk(bytes::Bytes::from_static(data.as_bytes()))
}

pub fn err(msg: &str) -> Frame {
    Frame::Error(msg.to_string())
}
