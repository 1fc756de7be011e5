//! 派发消息及其分块规则
//!
//! 派发消息只携带一个字段：逗号分隔的执行记录ID列表。传输层限制了消息的最大文本长度，
//! 因此候选选择器和溢出重发器都必须通过 [`MessageChunker`] 把ID列表切分成多条可独立派发的消息。

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::ExecutionId;
use retry_errors::{RetryError, RetryResult};

/// ID分隔符
pub const ID_DELIMITER: char = ',';

/// 单个ID编码后的最大宽度（`i64::MIN` 的十进制长度）
pub const MAX_ID_WIDTH: usize = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageOrigin {
    /// 由候选选择器周期性产生
    #[serde(rename = "SELECTION")]
    Selection,
    /// 预算耗尽后由溢出重发器产生
    #[serde(rename = "OVERFLOW")]
    Overflow,
}

impl MessageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOrigin::Selection => "selection",
            MessageOrigin::Overflow => "overflow",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchMessage {
    pub message_id: String,
    pub origin: MessageOrigin,
    /// 逗号分隔的执行记录ID
    pub payload: String,
    pub emitted_at: DateTime<Utc>,
}

impl DispatchMessage {
    pub fn new(origin: MessageOrigin, ids: &[ExecutionId]) -> Self {
        let payload = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self::from_payload(origin, payload)
    }

    /// 直接使用外部传入的原始文本构造消息，文本中可能包含无效ID
    pub fn from_payload<S: Into<String>>(origin: MessageOrigin, payload: S) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            origin,
            payload: payload.into(),
            emitted_at: Utc::now(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.payload.len()
    }

    pub fn parse_ids(&self) -> ParsedIds {
        parse_id_list(&self.payload)
    }
}

/// 解析结果：有效ID按首次出现顺序去重，无效片段单独收集
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedIds {
    pub ids: Vec<ExecutionId>,
    pub malformed: Vec<String>,
}

impl ParsedIds {
    /// 合并另一条消息的解析结果（同批次事件的ID取并集）
    pub fn merge(&mut self, other: ParsedIds) {
        let mut seen: HashSet<ExecutionId> = self.ids.iter().copied().collect();
        for id in other.ids {
            if seen.insert(id) {
                self.ids.push(id);
            }
        }
        self.malformed.extend(other.malformed);
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.malformed.is_empty()
    }
}

/// 解析逗号分隔的ID列表
///
/// 空片段直接忽略；无法解析或非正数的片段记为无效ID，不影响其余ID。
pub fn parse_id_list(payload: &str) -> ParsedIds {
    let mut parsed = ParsedIds::default();
    let mut seen = HashSet::new();

    for token in payload.split(ID_DELIMITER) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match parse_execution_id(token) {
            Ok(id) => {
                if seen.insert(id) {
                    parsed.ids.push(id);
                }
            }
            Err(_) => parsed.malformed.push(token.to_string()),
        }
    }

    parsed
}

pub fn parse_execution_id(token: &str) -> RetryResult<ExecutionId> {
    match token.trim().parse::<ExecutionId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(RetryError::malformed_id(token)),
    }
}

/// 消息分块器
///
/// 贪心地按顺序填充每条消息，同时满足ID数量上限和编码长度上限。
/// 切分保持ID顺序，不重复也不丢失任何ID。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageChunker {
    max_ids_per_message: usize,
    max_payload_len: usize,
}

impl MessageChunker {
    pub fn new(max_ids_per_message: usize, max_payload_len: usize) -> RetryResult<Self> {
        if max_ids_per_message == 0 {
            return Err(RetryError::config_error("每条消息的最大ID数必须大于0"));
        }
        if max_payload_len < MAX_ID_WIDTH {
            return Err(RetryError::config_error(format!(
                "消息最大长度 {max_payload_len} 小于单个ID的最大宽度 {MAX_ID_WIDTH}"
            )));
        }
        Ok(Self {
            max_ids_per_message,
            max_payload_len,
        })
    }

    pub fn max_ids_per_message(&self) -> usize {
        self.max_ids_per_message
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    /// 惰性地产生派发消息
    pub fn chunks<'a>(&self, origin: MessageOrigin, ids: &'a [ExecutionId]) -> MessageChunks<'a> {
        MessageChunks {
            ids,
            cursor: 0,
            origin,
            max_ids_per_message: self.max_ids_per_message,
            max_payload_len: self.max_payload_len,
        }
    }
}

pub struct MessageChunks<'a> {
    ids: &'a [ExecutionId],
    cursor: usize,
    origin: MessageOrigin,
    max_ids_per_message: usize,
    max_payload_len: usize,
}

impl MessageChunks<'_> {
    /// 已经放入消息的ID数量
    pub fn consumed(&self) -> usize {
        self.cursor
    }
}

impl Iterator for MessageChunks<'_> {
    type Item = DispatchMessage;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.ids.len() {
            return None;
        }

        let mut payload = String::new();
        let mut count = 0;
        while self.cursor < self.ids.len() && count < self.max_ids_per_message {
            let token = self.ids[self.cursor].to_string();
            let separator = usize::from(count > 0);
            if payload.len() + separator + token.len() > self.max_payload_len {
                break;
            }
            if separator == 1 {
                payload.push(ID_DELIMITER);
            }
            payload.push_str(&token);
            count += 1;
            self.cursor += 1;
        }

        Some(DispatchMessage::from_payload(self.origin, payload))
    }
}
