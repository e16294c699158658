//! 回复形状，以及每种形状如何从帧解码。

use crate::parse::{Parse, ParseError};
use crate::Frame;

use bytes::Bytes;
use std::collections::HashMap;

/// 表示“true”/“OK”的标准整数回复。
pub const SUCCESS: i64 = 1;

/// 排队操作期望的回复形状。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    Void,
    Int,
    Long,
    Double,
    Bool,
    Bytes,
    MultiBytes,
    String,
    MultiString,
    Dictionary,
    Data,
}

/// 解码后的回复。每个 `ReadKind` 对应一个变体。
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Void,
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
    /// 空字符串块与空回复一样为 `None`。
    Bytes(Option<Bytes>),
    MultiBytes(Vec<Bytes>),
    String(Option<String>),
    MultiString(Vec<String>),
    Dictionary(HashMap<String, String>),
    Data(Frame),
}

impl ReadKind {
    /// 将 `frame` 解码为 `self` 描述的形状。
    ///
    /// 顶层的错误回复对任何形状都解码失败。
    pub fn decode(self, frame: Frame) -> crate::Result<Reply> {
        Ok(match self {
            ReadKind::Void => {
                success(frame)?;
                Reply::Void
            }
            ReadKind::Int => Reply::Int(int(frame)?),
            ReadKind::Long => Reply::Long(long(frame)?),
            ReadKind::Double => Reply::Double(double(frame)?),
            ReadKind::Bool => Reply::Bool(boolean(frame)?),
            ReadKind::Bytes => Reply::Bytes(bytes(frame)?),
            ReadKind::MultiBytes => Reply::MultiBytes(multi_bytes(frame)?),
            ReadKind::String => Reply::String(string(frame)?),
            ReadKind::MultiString => Reply::MultiString(multi_string(frame)?),
            ReadKind::Dictionary => Reply::Dictionary(dictionary(frame)?),
            ReadKind::Data => Reply::Data(data(frame)?),
        })
    }
}

/// 状态回复。
pub(crate) fn success(frame: Frame) -> crate::Result<()> {
    match frame {
        Frame::Simple(_) => Ok(()),
        Frame::Error(msg) => Err(msg.into()),
        frame => Err(frame.to_error()),
    }
}

pub(crate) fn long(frame: Frame) -> crate::Result<i64> {
    use atoi::atoi;

    match frame {
        Frame::Integer(n) => Ok(n),
        Frame::Bulk(ref data) => atoi::<i64>(data).ok_or_else(|| frame.to_error()),
        Frame::Simple(ref data) => atoi::<i64>(data.as_bytes()).ok_or_else(|| frame.to_error()),
        Frame::Error(msg) => Err(msg.into()),
        frame => Err(frame.to_error()),
    }
}

pub(crate) fn int(frame: Frame) -> crate::Result<i32> {
    let n = long(frame)?;
    i32::try_from(n).map_err(|_| format!("protocol error; integer {} out of range", n).into())
}

/// 浮点数以字符串块传输。空回复为 `NaN`。
pub(crate) fn double(frame: Frame) -> crate::Result<f64> {
    match frame {
        Frame::Integer(n) => Ok(n as f64),
        Frame::Null => Ok(f64::NAN),
        Frame::Error(msg) => Err(msg.into()),
        frame => match bytes(frame.clone())? {
            Some(data) => std::str::from_utf8(&data)
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or_else(|| frame.to_error()),
            None => Ok(f64::NAN),
        },
    }
}

pub(crate) fn boolean(frame: Frame) -> crate::Result<bool> {
    match frame {
        Frame::Integer(n) => Ok(n == SUCCESS),
        Frame::Simple(s) => Ok(s == "OK"),
        Frame::Bulk(ref data) => Ok(frame == "OK" || &data[..] == b"1"),
        Frame::Null => Ok(false),
        Frame::Error(msg) => Err(msg.into()),
        frame => Err(frame.to_error()),
    }
}

pub(crate) fn bytes(frame: Frame) -> crate::Result<Option<Bytes>> {
    let data = match frame {
        Frame::Bulk(data) => data,
        Frame::Simple(s) => Bytes::from(s.into_bytes()),
        Frame::Integer(n) => Bytes::from(n.to_string()),
        Frame::Null => return Ok(None),
        Frame::Error(msg) => return Err(msg.into()),
        frame => return Err(frame.to_error()),
    };

    Ok(if data.is_empty() { None } else { Some(data) })
}

pub(crate) fn string(frame: Frame) -> crate::Result<Option<String>> {
    Ok(bytes(frame)?.map(|data| utf8(&data)))
}

pub(crate) fn multi_bytes(frame: Frame) -> crate::Result<Vec<Bytes>> {
    if let Frame::Error(msg) = frame {
        return Err(msg.into());
    }

    let mut parse = Parse::new(frame)?;
    let mut out = vec![];

    loop {
        match parse.next_bytes() {
            Ok(data) => out.push(data),
            Err(ParseError::EndOfStream) => break,
            Err(err) => return Err(err.into()),
        }
    }

    Ok(out)
}

pub(crate) fn multi_string(frame: Frame) -> crate::Result<Vec<String>> {
    Ok(multi_bytes(frame)?.iter().map(|data| utf8(data)).collect())
}

/// 扁平的 `[key, value, key, value, ...]` 多条批量回复。
pub(crate) fn dictionary(frame: Frame) -> crate::Result<HashMap<String, String>> {
    if let Frame::Error(msg) = frame {
        return Err(msg.into());
    }

    let mut parse = Parse::new(frame)?;
    let mut out = HashMap::new();

    loop {
        let key = match parse.next_string() {
            Ok(key) => key,
            Err(ParseError::EndOfStream) => break,
            Err(err) => return Err(err.into()),
        };

        // 有键无值是格式错误，所以这里的 `EndOfStream` 是错误。
        let value = parse.next_string()?;
        out.insert(key, value);
    }

    Ok(out)
}

/// 任意回复树，原样保留。
pub(crate) fn data(frame: Frame) -> crate::Result<Frame> {
    match frame {
        Frame::Error(msg) => Err(msg.into()),
        frame => Ok(frame),
    }
}

/// 将扁平的多条批量回复两两配对为字典。末尾多余的键被丢弃。
pub(crate) fn pairs(items: &[Bytes]) -> HashMap<String, String> {
    items
        .chunks_exact(2)
        .map(|pair| (utf8(&pair[0]), utf8(&pair[1])))
        .collect()
}

pub(crate) fn utf8(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
