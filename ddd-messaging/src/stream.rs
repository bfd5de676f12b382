//! 具名消息流（MessageStream）
//!
//! 按流名划分的只追加日志：
//! - 读取不移除消息，每次 `read_messages` 调用维护自己的读取位点；
//! - 消息仅通过确认（单消费者模型）或裁剪被移除；
//! - 裁剪与追加在同一把流内锁下进行，裁剪期间的并发追加不会丢失。
//!
use crate::error::{MessagingError, MessagingResult};
use crate::sync::lock;
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_core::stream::BoxStream;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 连续读取时，没有新消息后的轮询间隔
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 流消息
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// 消息ID；为空时由流在追加时分配单调递增的ID
    #[builder(default, into)]
    id: String,
    /// 消息内容
    data: Value,
    /// 消息时间
    #[builder(default = Utc::now())]
    timestamp: DateTime<Utc>,
    /// 附加属性
    #[builder(default)]
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    properties: HashMap<String, Value>,
}

impl StreamMessage {
    pub fn new(data: impl Into<Value>) -> Self {
        Self::builder().data(data.into()).build()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }
}

/// 消息ID区间 `[start, end]`，按字典序比较，两端均可省略
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl IdRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(start: Option<impl Into<String>>, end: Option<impl Into<String>>) -> Self {
        Self {
            start: start.map(Into::into),
            end: end.map(Into::into),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.start.as_deref().is_none_or(|s| id >= s) && self.end.as_deref().is_none_or(|e| id <= e)
    }
}

/// 具名消息流
#[async_trait]
pub trait MessageStream: Send + Sync {
    /// 追加消息（流不存在时创建），返回消息ID
    async fn add_message(&self, stream_name: &str, message: StreamMessage)
    -> MessagingResult<String>;

    /// 确认并移除指定消息，返回是否存在
    async fn acknowledge_message(&self, stream_name: &str, message_id: &str)
    -> MessagingResult<bool>;

    /// 统计区间内的消息数（不移除）
    async fn count(&self, stream_name: &str, range: &IdRange) -> MessagingResult<usize>;

    /// 从头部淘汰，直到长度不超过 `max_size`，返回淘汰数量
    async fn trim_to_size(&self, stream_name: &str, max_size: usize) -> MessagingResult<usize>;

    /// 淘汰时间早于 `now - max_age` 的消息，返回淘汰数量
    async fn trim_by_age(&self, stream_name: &str, max_age: Duration) -> MessagingResult<usize>;

    /// 连续读取
    ///
    /// 每轮最多读取 `count` 条（0 表示不限），可按ID区间过滤；没有新消息时等待后重试，
    /// 取消后结束。取消在每次产出前检查，未产出的消息仍保留在流中。
    fn read_messages(
        &self,
        stream_name: &str,
        count: usize,
        range: IdRange,
        cancel: CancellationToken,
    ) -> BoxStream<'static, StreamMessage>;
}

struct StreamEntry {
    seq: u64,
    message: StreamMessage,
}

#[derive(Default)]
struct StreamLog {
    last_seq: u64,
    entries: VecDeque<StreamEntry>,
}

impl StreamLog {
    fn append(&mut self, mut message: StreamMessage) -> String {
        self.last_seq += 1;
        if message.id.is_empty() {
            message.id = format!("{:020}", self.last_seq);
        }
        let id = message.id.clone();
        self.entries.push_back(StreamEntry {
            seq: self.last_seq,
            message,
        });
        id
    }

    /// 位点之后第一条落在区间内的消息
    fn next_after(&self, cursor: u64, range: &IdRange) -> Option<(u64, StreamMessage)> {
        // 条目按 seq 递增排列
        let from = self.entries.partition_point(|e| e.seq <= cursor);
        self.entries
            .range(from..)
            .find(|e| range.contains(&e.message.id))
            .map(|e| (e.seq, e.message.clone()))
    }
}

type SharedLog = Arc<Mutex<StreamLog>>;

/// 内存版消息流
#[derive(Clone, Default)]
pub struct InMemoryStream {
    streams: Arc<DashMap<String, SharedLog>>,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streams(&self) -> Vec<String> {
        self.streams.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self, stream_name: &str) -> usize {
        self.log(stream_name).map(|log| lock(&log).entries.len()).unwrap_or(0)
    }

    fn log(&self, stream_name: &str) -> Option<SharedLog> {
        self.streams.get(stream_name).map(|l| l.value().clone())
    }
}

#[async_trait]
impl MessageStream for InMemoryStream {
    async fn add_message(
        &self,
        stream_name: &str,
        message: StreamMessage,
    ) -> MessagingResult<String> {
        let log = self
            .streams
            .entry(stream_name.to_string())
            .or_default()
            .value()
            .clone();
        let id = lock(&log).append(message);
        Ok(id)
    }

    async fn acknowledge_message(
        &self,
        stream_name: &str,
        message_id: &str,
    ) -> MessagingResult<bool> {
        let Some(log) = self.log(stream_name) else {
            return Ok(false);
        };
        let mut log = lock(&log);
        match log.entries.iter().position(|e| e.message.id == message_id) {
            Some(idx) => {
                log.entries.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count(&self, stream_name: &str, range: &IdRange) -> MessagingResult<usize> {
        Ok(self
            .log(stream_name)
            .map(|log| {
                lock(&log)
                    .entries
                    .iter()
                    .filter(|e| range.contains(&e.message.id))
                    .count()
            })
            .unwrap_or(0))
    }

    async fn trim_to_size(&self, stream_name: &str, max_size: usize) -> MessagingResult<usize> {
        let Some(log) = self.log(stream_name) else {
            return Ok(0);
        };
        let mut log = lock(&log);
        let evict = log.entries.len().saturating_sub(max_size);
        log.entries.drain(..evict);
        Ok(evict)
    }

    async fn trim_by_age(&self, stream_name: &str, max_age: Duration) -> MessagingResult<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| MessagingError::invalid_argument(format!("max_age: {e}")))?;
        let Some(log) = self.log(stream_name) else {
            return Ok(0);
        };
        // 截止时间早于可表示范围时，没有消息会过期
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return Ok(0);
        };

        let mut log = lock(&log);
        let before = log.entries.len();
        log.entries.retain(|e| e.message.timestamp >= cutoff);
        Ok(before - log.entries.len())
    }

    fn read_messages(
        &self,
        stream_name: &str,
        count: usize,
        range: IdRange,
        cancel: CancellationToken,
    ) -> BoxStream<'static, StreamMessage> {
        let reader = StreamReader {
            streams: self.streams.clone(),
            stream_name: stream_name.to_string(),
            batch: if count == 0 { usize::MAX } else { count },
            range,
            cancel,
            cursor: 0,
            read_in_batch: 0,
        };
        Box::pin(stream::unfold(reader, |mut reader| async move {
            let message = reader.next().await?;
            Some((message, reader))
        }))
    }
}

/// 单次 `read_messages` 调用的读取状态
struct StreamReader {
    streams: Arc<DashMap<String, SharedLog>>,
    stream_name: String,
    batch: usize,
    range: IdRange,
    cancel: CancellationToken,
    cursor: u64,
    read_in_batch: usize,
}

impl StreamReader {
    async fn next(&mut self) -> Option<StreamMessage> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            if self.read_in_batch < self.batch {
                if let Some((seq, message)) = self.poll_one() {
                    self.cursor = seq;
                    self.read_in_batch += 1;
                    return Some(message);
                }
            }

            self.read_in_batch = 0;
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(READ_POLL_INTERVAL) => {}
            }
        }
    }

    fn poll_one(&self) -> Option<(u64, StreamMessage)> {
        let log = self.streams.get(&self.stream_name)?.value().clone();
        let log = lock(&log);
        log.next_after(self.cursor, &self.range)
    }
}
