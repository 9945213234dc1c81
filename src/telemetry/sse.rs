//! # SSE 事件累加器
//!
//! 上游的 chunk 边界与 SSE 事件边界无关：一个 JSON 可能被切到多个 chunk。
//! 累加器缓存未完成的行，只在遇到空行时产出完整事件。

use bytes::BytesMut;
use serde_json::Value;
use std::io;
use tokio_util::codec::Decoder;

/// 一个完整的 SSE 事件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    /// 多行 `data:` 以换行拼接后的原始文本
    pub data: String,
}

impl SseEvent {
    /// 以 JSON 解析 `data`；`[DONE]` 与非 JSON 内容返回 None
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        let payload = self.data.trim();
        if payload.is_empty() || payload == "[DONE]" {
            return None;
        }
        let start = payload.find('{')?;
        serde_json::from_str(&payload[start..]).ok()
    }
}

/// 逐行解析 SSE 的解码器
#[derive(Debug, Default)]
pub struct SseDecoder {
    current: SseEvent,
    has_any: bool,
}

impl SseDecoder {
    fn take_event(&mut self) -> Option<SseEvent> {
        if !self.has_any {
            return None;
        }
        self.has_any = false;
        Some(std::mem::take(&mut self.current))
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').map_or((line, ""), |(field, value)| {
            (field, value.strip_prefix(' ').unwrap_or(value))
        });

        match field {
            "data" => {
                if self.has_any && !self.current.data.is_empty() {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_any = true;
            }
            "event" => {
                self.current.event = Some(value.to_string());
                self.has_any = true;
            }
            "id" => {
                self.current.id = Some(value.to_string());
                self.has_any = true;
            }
            _ => {}
        }
        None
    }

    fn take_one_line(src: &mut BytesMut) -> Option<String> {
        let pos = src.iter().position(|b| *b == b'\n')?;
        let mut line = src.split_to(pos + 1);
        line.truncate(line.len() - 1);
        if line.ends_with(b"\r") {
            line.truncate(line.len() - 1);
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl Decoder for SseDecoder {
    type Item = SseEvent;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        while let Some(line) = Self::take_one_line(src) {
            if let Some(event) = self.process_line(&line) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if !src.is_empty() {
            let rest = src.split_to(src.len());
            let line = String::from_utf8_lossy(&rest);
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                return Ok(Some(event));
            }
        }
        Ok(self.take_event())
    }
}

/// 跨 chunk 的事件累加器
#[derive(Debug, Default)]
pub struct SseAccumulator {
    decoder: SseDecoder,
    buffer: BytesMut,
}

impl SseAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个 chunk，返回其中所有已完整的事件
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.decoder.decode(&mut self.buffer) {
            events.push(event);
        }
        events
    }

    /// 流结束时处理残留数据，最多产出一个事件
    pub fn flush(&mut self) -> Option<SseEvent> {
        self.decoder.decode_eof(&mut self.buffer).ok().flatten()
    }

    /// 尚未组成完整事件的字节数
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}
