//! 确认队列（AckQueue）
//!
//! 条目状态机：Pending → InFlight → {Acknowledged | Pending（超时回收）}。
//! - `dequeue` 将条目从待投递队列转移到在途表；
//! - `ack` 将条目从在途表移除；
//! - 周期回收任务把超过 `ack_timeout` 仍未确认的条目重新追加到队尾。
//!
//! 提供的是至少一次投递：消费方处理超时后，同一条目可能被再次投递。
//!
use crate::event::{EventEnvelope, EventProperties};
use crate::sync::lock;
use bon::Builder;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_core::stream::BoxStream;
use futures_util::stream;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 连续读取时，队列为空后的轮询间隔
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 确认队列配置
#[derive(Builder, Clone, Copy, Debug)]
pub struct AckQueueConfig {
    /// 在途条目的确认超时
    #[builder(default = Duration::from_secs(60))]
    pub ack_timeout: Duration,
    /// 是否启动周期回收任务
    #[builder(default = true)]
    pub auto_requeue: bool,
    /// 回收任务的执行间隔
    #[builder(default = Duration::from_secs(60))]
    pub requeue_period: Duration,
}

impl Default for AckQueueConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// 队列条目：事件载荷 + 属性 + 入队时间
#[derive(Debug)]
pub struct AckQueueEntry<T> {
    envelope: EventEnvelope<T>,
    enqueued_at: DateTime<Utc>,
}

impl<T> AckQueueEntry<T> {
    pub fn event_id(&self) -> &str {
        self.envelope.event_id()
    }

    pub fn data(&self) -> &T {
        &self.envelope.data
    }

    pub fn properties(&self) -> &EventProperties {
        &self.envelope.properties
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// 以事件时间为准判断是否超过确认时限
    fn is_stale(&self, now: DateTime<Utc>, ack_timeout: Duration) -> bool {
        match (now - self.envelope.properties.event_at()).to_std() {
            Ok(age) => age > ack_timeout,
            // 事件时间晚于当前时间（时钟回拨或调用方指定了未来时间）
            Err(_) => false,
        }
    }
}

/// 同一事件ID可能同时有多次在途投递（调用方指定了重复ID），按出队顺序排列
type InFlight<T> = VecDeque<Arc<AckQueueEntry<T>>>;

struct AckQueueState<T> {
    pending: Mutex<VecDeque<Arc<AckQueueEntry<T>>>>,
    in_flight: DashMap<String, InFlight<T>>,
    ack_timeout: Duration,
}

impl<T> AckQueueState<T> {
    fn dequeue(&self) -> Option<Arc<AckQueueEntry<T>>> {
        let entry = lock(&self.pending).pop_front()?;
        let mut deliveries = self.in_flight.entry(entry.event_id().to_string()).or_default();
        if !deliveries.is_empty() {
            tracing::warn!(
                event_id = entry.event_id(),
                in_flight = deliveries.len(),
                "duplicate event id in flight"
            );
        }
        deliveries.push_back(entry.clone());
        Some(entry)
    }

    /// 确认该ID最早出队的一次投递
    fn ack(&self, event_id: &str) -> bool {
        let Entry::Occupied(mut slot) = self.in_flight.entry(event_id.to_string()) else {
            return false;
        };
        let acked = slot.get_mut().pop_front().is_some();
        if slot.get().is_empty() {
            slot.remove();
        }
        acked
    }

    fn in_flight_len(&self) -> usize {
        self.in_flight.iter().map(|e| e.value().len()).sum()
    }

    fn requeue_unacked(&self) -> usize {
        let now = Utc::now();
        let stale_ids: Vec<String> = self
            .in_flight
            .iter()
            .filter(|e| e.value().iter().any(|d| d.is_stale(now, self.ack_timeout)))
            .map(|e| e.key().clone())
            .collect();

        let mut requeued = 0;
        for event_id in stale_ids {
            // 在分片锁内重新判定：期间已被确认的投递不会被回收
            let stale = match self.in_flight.entry(event_id) {
                Entry::Occupied(mut slot) => {
                    let (stale, fresh): (InFlight<T>, InFlight<T>) = slot
                        .get_mut()
                        .drain(..)
                        .partition(|d| d.is_stale(now, self.ack_timeout));
                    if fresh.is_empty() {
                        slot.remove();
                    } else {
                        *slot.get_mut() = fresh;
                    }
                    stale
                }
                Entry::Vacant(_) => continue,
            };
            requeued += stale.len();
            lock(&self.pending).extend(stale);
        }

        if requeued > 0 {
            tracing::warn!(requeued, "requeued unacknowledged messages");
        }
        requeued
    }
}

/// 至少一次投递的内存队列
///
/// 启用 `auto_requeue` 时，构造需在 Tokio 运行时内进行；回收任务随队列一同释放。
pub struct AckQueue<T> {
    state: Arc<AckQueueState<T>>,
    config: AckQueueConfig,
    shutdown: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
}

impl<T> AckQueue<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(config: AckQueueConfig) -> Self {
        let state = Arc::new(AckQueueState {
            pending: Mutex::new(VecDeque::new()),
            in_flight: DashMap::new(),
            ack_timeout: config.ack_timeout,
        });
        let shutdown = CancellationToken::new();

        let sweeper = if config.auto_requeue {
            Self::spawn_sweeper(state.clone(), shutdown.clone(), config.requeue_period)
        } else {
            None
        };

        Self {
            state,
            config,
            shutdown,
            sweeper,
        }
    }

    fn spawn_sweeper(
        state: Arc<AckQueueState<T>>,
        token: CancellationToken,
        period: Duration,
    ) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime available, automatic requeue disabled");
            return None;
        };

        Some(runtime.spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // 单次回收失败不影响后续周期
                        let pass = std::panic::catch_unwind(AssertUnwindSafe(|| {
                            state.requeue_unacked()
                        }));
                        if pass.is_err() {
                            tracing::error!("requeue sweep failed");
                        }
                    }
                }
            }
        }))
    }

    pub fn config(&self) -> &AckQueueConfig {
        &self.config
    }

    /// 入队；缺省属性时生成事件ID与时间，返回事件ID
    pub fn enqueue(&self, data: T, properties: Option<EventProperties>) -> String {
        let entry = Arc::new(AckQueueEntry {
            envelope: EventEnvelope::new(data, properties),
            enqueued_at: Utc::now(),
        });
        let event_id = entry.event_id().to_string();
        lock(&self.state.pending).push_back(entry);
        tracing::debug!(event_id = %event_id, "message enqueued");
        event_id
    }

    /// 取出队首条目并转入在途表；队列为空时返回 `None`
    pub fn dequeue(&self) -> Option<Arc<AckQueueEntry<T>>> {
        self.state.dequeue()
    }

    /// 确认；未知或已确认的ID视为无操作，返回是否确有条目被移除
    pub fn ack(&self, event_id: &str) -> bool {
        let removed = self.state.ack(event_id);
        if removed {
            tracing::debug!(event_id, "message acknowledged");
        }
        removed
    }

    /// 执行一次回收：超时未确认的条目移回队尾，返回回收数量
    pub fn requeue_unacked(&self) -> usize {
        self.state.requeue_unacked()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.state.pending).len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.in_flight_len()
    }

    /// 连续读取：持续取出待投递条目（每条转入在途表），为空时等待后重试，取消后结束
    pub fn read_all(&self, cancel: CancellationToken) -> BoxStream<'static, Arc<AckQueueEntry<T>>> {
        let state = self.state.clone();
        Box::pin(stream::unfold((state, cancel), |(state, cancel)| async move {
            loop {
                if cancel.is_cancelled() {
                    return None;
                }
                if let Some(entry) = state.dequeue() {
                    return Some((entry, (state, cancel)));
                }
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = time::sleep(READ_POLL_INTERVAL) => {}
                }
            }
        }))
    }
}

impl<T> Drop for AckQueue<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    fn manual() -> AckQueueConfig {
        AckQueueConfig::builder().auto_requeue(false).build()
    }

    #[test]
    fn defaults() {
        let c = AckQueueConfig::default();
        assert_eq!(c.ack_timeout, Duration::from_secs(60));
        assert_eq!(c.requeue_period, Duration::from_secs(60));
        assert!(c.auto_requeue);
    }

    #[test]
    fn dequeue_moves_entry_in_flight() {
        let q = AckQueue::new(manual());
        let id = q.enqueue("m1", None);
        assert!(!id.is_empty());
        assert_eq!(q.pending_len(), 1);

        let entry = q.dequeue().unwrap();
        assert_eq!(*entry.data(), "m1");
        assert_eq!(entry.event_id(), id);
        assert_eq!(q.pending_len(), 0);
        assert_eq!(q.in_flight_len(), 1);
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn fifo_order() {
        let q = AckQueue::new(manual());
        q.enqueue(1, None);
        q.enqueue(2, None);
        q.enqueue(3, None);
        let got: Vec<i32> = std::iter::from_fn(|| q.dequeue()).map(|e| *e.data()).collect();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[test]
    fn ack_is_idempotent() {
        let q = AckQueue::new(manual());
        q.enqueue("m", Some(EventProperties::builder().event_id("m-1").build()));
        q.dequeue().unwrap();

        assert!(q.ack("m-1"));
        assert!(!q.ack("m-1"));
        assert!(!q.ack("unknown"));
        assert_eq!(q.in_flight_len(), 0);
    }

    #[test]
    fn manual_sweep_requeues_only_stale_entries() {
        let q = AckQueue::new(
            AckQueueConfig::builder()
                .auto_requeue(false)
                .ack_timeout(Duration::from_secs(60))
                .build(),
        );
        let old = Utc::now() - chrono::Duration::minutes(2);
        q.enqueue("old", Some(EventProperties::builder().event_at(old).build()));
        q.enqueue("fresh", None);
        q.dequeue().unwrap();
        q.dequeue().unwrap();

        assert_eq!(q.requeue_unacked(), 1);
        assert_eq!(q.in_flight_len(), 1);
        assert_eq!(*q.dequeue().unwrap().data(), "old");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unacked_message_is_redelivered() {
        let q = AckQueue::new(
            AckQueueConfig::builder()
                .ack_timeout(Duration::from_millis(200))
                .requeue_period(Duration::from_millis(100))
                .build(),
        );
        q.enqueue("m1", None);
        assert_eq!(*q.dequeue().unwrap().data(), "m1");

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(q.pending_len(), 1);
        assert_eq!(*q.dequeue().unwrap().data(), "m1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn acked_message_is_never_redelivered() {
        let q = AckQueue::new(
            AckQueueConfig::builder()
                .ack_timeout(Duration::from_millis(200))
                .requeue_period(Duration::from_millis(100))
                .build(),
        );
        q.enqueue("m2", None);
        let entry = q.dequeue().unwrap();
        assert!(q.ack(entry.event_id()));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(q.pending_len(), 0);
        assert!(q.dequeue().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_all_drains_then_stops_on_cancel() {
        let q = AckQueue::new(manual());
        q.enqueue("a", None);
        q.enqueue("b", None);

        let cancel = CancellationToken::new();
        let mut reader = q.read_all(cancel.clone());
        assert_eq!(*reader.next().await.unwrap().data(), "a");
        assert_eq!(*reader.next().await.unwrap().data(), "b");
        assert_eq!(q.in_flight_len(), 2);

        // 空队列时等待新条目
        q.enqueue("c", None);
        let c = tokio::time::timeout(Duration::from_secs(1), reader.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*c.data(), "c");

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let end = tokio::time::timeout(Duration::from_secs(1), reader.next()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropping_the_queue_stops_the_sweeper() {
        let q = AckQueue::<u8>::new(
            AckQueueConfig::builder()
                .requeue_period(Duration::from_millis(10))
                .build(),
        );
        let token = q.shutdown.clone();
        drop(q);
        assert!(token.is_cancelled());
    }

    #[test]
    fn duplicate_ids_keep_every_delivery() {
        let q = AckQueue::new(manual());
        let dup = || Some(EventProperties::builder().event_id("dup").build());
        q.enqueue("first", dup());
        q.enqueue("second", dup());
        q.dequeue().unwrap();
        q.dequeue().unwrap();
        assert_eq!(q.in_flight_len(), 2);

        assert!(q.ack("dup"));
        assert_eq!(q.in_flight_len(), 1);
        assert!(q.ack("dup"));
        assert!(!q.ack("dup"));
        assert_eq!(q.in_flight_len(), 0);
    }

    #[test]
    fn stale_duplicates_are_all_requeued() {
        let q = AckQueue::new(manual());
        let old = Utc::now() - chrono::Duration::minutes(5);
        let dup = || Some(EventProperties::builder().event_id("dup").event_at(old).build());
        q.enqueue("first", dup());
        q.enqueue("second", dup());
        q.dequeue().unwrap();
        q.dequeue().unwrap();

        assert_eq!(q.requeue_unacked(), 2);
        assert_eq!(q.in_flight_len(), 0);
        assert_eq!(*q.dequeue().unwrap().data(), "first");
        assert_eq!(*q.dequeue().unwrap().data(), "second");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_and_consumers_deliver_each_entry_once() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;
        const CONSUMERS: usize = 4;
        const TOTAL: usize = PRODUCERS * PER_PRODUCER;

        // 不启用回收任务：没有条目会超时重投
        let q = Arc::new(AckQueue::<(usize, usize)>::new(manual()));
        let acked = Arc::new(AtomicUsize::new(0));

        let mut producers = JoinSet::new();
        for p in 0..PRODUCERS {
            let q = q.clone();
            producers.spawn(async move {
                for i in 0..PER_PRODUCER {
                    q.enqueue((p, i), None);
                    tokio::task::yield_now().await;
                }
            });
        }

        let mut consumers = JoinSet::new();
        for _ in 0..CONSUMERS {
            let q = q.clone();
            let acked = acked.clone();
            consumers.spawn(async move {
                let mut got = Vec::new();
                while acked.load(Ordering::SeqCst) < TOTAL {
                    match q.dequeue() {
                        Some(entry) => {
                            assert!(q.ack(entry.event_id()));
                            acked.fetch_add(1, Ordering::SeqCst);
                            got.push(*entry.data());
                        }
                        None => tokio::task::yield_now().await,
                    }
                }
                got
            });
        }

        let mut delivered = Vec::with_capacity(TOTAL);
        let all_done = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(res) = producers.join_next().await {
                res.unwrap();
            }
            while let Some(res) = consumers.join_next().await {
                delivered.extend(res.unwrap());
            }
        })
        .await;
        assert!(all_done.is_ok(), "consumers did not drain the queue");

        delivered.sort();
        let expected: Vec<_> = (0..PRODUCERS)
            .flat_map(|p| (0..PER_PRODUCER).map(move |i| (p, i)))
            .collect();
        assert_eq!(delivered, expected);
        assert_eq!(q.pending_len() + q.in_flight_len(), 0);
    }
}
