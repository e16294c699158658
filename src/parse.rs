use crate::Frame;

use bytes::Bytes;
use std::{fmt, vec};

/// 用于遍历多条批量回复的实用工具
///
/// 多条批量回复被表示为数组帧，帧中的每个条目是回复的一个元素。`Parse` 被初始化为数组帧，
/// 并提供类似游标的 API。读到末尾时返回 `ParseError::EndOfStream`，解码器以此结束循环。
#[derive(Debug)]
pub(crate) struct Parse {
    /// 数组帧迭代器。
    parts: vec::IntoIter<Frame>,
}

/// 遍历多条批量回复时遇到的错误。
///
/// 只有 `EndOfStream` 错误在运行时被处理。所有其他错误导致当前回复解码失败。
#[derive(Debug)]
pub(crate) enum ParseError {
    /// 由于帧已完全消耗而尝试提取值失败。
    EndOfStream,

    /// 所有其他错误
    Other(crate::Error),
}

impl Parse {
    /// 创建一个新的 `Parse` 以遍历 `frame` 的内容。
    ///
    /// 空回复视为空的多条批量回复。其他非数组帧返回 `Err`。
    pub(crate) fn new(frame: Frame) -> Result<Parse, ParseError> {
        let array = match frame {
            Frame::Array(array) => array,
            Frame::Null => vec![],
            frame => return Err(format!("protocol error; expected array, got {:?}", frame).into()),
        };

        Ok(Parse {
            parts: array.into_iter(),
        })
    }

    /// 返回下一个条目。数组帧是帧的数组，因此下一个条目是帧。
    fn next(&mut self) -> Result<Frame, ParseError> {
        self.parts.next().ok_or(ParseError::EndOfStream)
    }

    /// 将下一个条目作为字符串返回。
    ///
    /// 无效的 UTF-8 会被替换，而不是报错。
    pub(crate) fn next_string(&mut self) -> Result<String, ParseError> {
        let bytes = self.next_bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// 将下一个条目作为原始字节返回。
    ///
    /// 多条批量回复中的空元素（例如 `MGET` 中不存在的键）返回空字节。
    pub(crate) fn next_bytes(&mut self) -> Result<Bytes, ParseError> {
        match self.next()? {
            Frame::Simple(s) => Ok(Bytes::from(s.into_bytes())),
            Frame::Bulk(data) => Ok(data),
            Frame::Integer(v) => Ok(Bytes::from(v.to_string())),
            Frame::Null => Ok(Bytes::new()),
            Frame::Error(msg) => Err(msg.into()),
            frame => Err(format!(
                "protocol error; expected simple frame or bulk frame, got {:?}",
                frame
            )
            .into()),
        }
    }
}

impl From<String> for ParseError {
    fn from(src: String) -> ParseError {
        ParseError::Other(src.into())
    }
}

impl From<&str> for ParseError {
    fn from(src: &str) -> ParseError {
        src.to_string().into()
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::EndOfStream => "protocol error; unexpected end of stream".fmt(f),
            ParseError::Other(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for ParseError {}
