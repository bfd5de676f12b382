use async_trait::async_trait;
use ddd_messaging::dispatch::{DelegateEventHandler, EventBus, EventHandler};
use ddd_messaging::event::{Event, EventProperties};
use ddd_messaging::publisher::{EventPublisher, EventQueuePublisher};
use ddd_messaging::queue::{
    AckQueue, AckQueueConfig, EventQueue, EventQueueExt, InMemoryEventQueue,
};
use ddd_messaging::store::{EventStore, InMemoryEventStore};
use ddd_messaging::stream::{IdRange, InMemoryStream, MessageStream, StreamMessage};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountOpened {
    account_id: String,
    initial_balance: i64,
}

impl Event for AccountOpened {
    const EVENT_TYPE: &'static str = "account.opened";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MoneyWithdrawn {
    account_id: String,
    amount: i64,
}

impl Event for MoneyWithdrawn {
    const EVENT_TYPE: &'static str = "account.withdrawn";
}

/// 把开户事件写入审计流
struct AuditTrail {
    stream: InMemoryStream,
}

#[async_trait]
impl EventHandler<AccountOpened> for AuditTrail {
    async fn handle(&self, event: &AccountOpened, props: &EventProperties) -> anyhow::Result<()> {
        let msg = StreamMessage::builder()
            .data(serde_json::to_value(event)?)
            .properties(
                [(
                    "event_id".to_string(),
                    serde_json::Value::from(props.event_id()),
                )]
                .into(),
            )
            .build();
        self.stream.add_message("audit", msg).await?;
        Ok(())
    }
}

struct FraudCheck;

#[async_trait]
impl EventHandler<MoneyWithdrawn> for FraudCheck {
    async fn handle(&self, event: &MoneyWithdrawn, _props: &EventProperties) -> anyhow::Result<()> {
        anyhow::ensure!(
            event.amount <= 500,
            "withdrawal of {} on {} needs review",
            event.amount,
            event.account_id
        );
        Ok(())
    }
}

async fn run_bus(stream: &InMemoryStream) -> anyhow::Result<()> {
    let bus = EventBus::new();
    bus.subscribe_handler::<AccountOpened, _>(Arc::new(AuditTrail {
        stream: stream.clone(),
    }));
    bus.subscribe_handler::<MoneyWithdrawn, _>(Arc::new(FraudCheck));
    bus.subscribe_handler::<MoneyWithdrawn, _>(Arc::new(DelegateEventHandler::new(
        |event: MoneyWithdrawn, props: EventProperties| async move {
            tracing::info!(
                account_id = %event.account_id,
                amount = event.amount,
                event_id = props.event_id(),
                "withdrawal recorded"
            );
            anyhow::Ok(())
        },
    )));

    for account_id in ["acc-1", "acc-2"] {
        EventPublisher::publish(
            &bus,
            AccountOpened {
                account_id: account_id.to_string(),
                initial_balance: 100,
            },
        )
        .await?;
    }
    // 其中一次会被 FraudCheck 拒绝，失败只进入日志
    for amount in [50, 900] {
        bus.publish(
            MoneyWithdrawn {
                account_id: "acc-1".to_string(),
                amount,
            },
            None,
        );
    }
    bus.wait_idle().await;

    bus.unsubscribe::<AccountOpened, AuditTrail>();
    let accepted = bus.publish(
        AccountOpened {
            account_id: "acc-3".to_string(),
            initial_balance: 0,
        },
        None,
    );
    tracing::info!(accepted, "published without subscribers");
    Ok(())
}

async fn run_ack_queue() {
    let queue = AckQueue::new(
        AckQueueConfig::builder()
            .ack_timeout(Duration::from_millis(300))
            .requeue_period(Duration::from_millis(100))
            .build(),
    );
    for amount in [10, 20, 30] {
        queue.enqueue(
            MoneyWithdrawn {
                account_id: "acc-2".to_string(),
                amount,
            },
            None,
        );
    }

    let cancel = CancellationToken::new();
    let mut entries = queue.read_all(cancel.clone());
    let mut skipped_once = false;
    let mut acked = 0;
    while acked < 3 {
        let Ok(Some(entry)) = tokio::time::timeout(Duration::from_secs(2), entries.next()).await
        else {
            break;
        };
        if entry.data().amount == 20 && !skipped_once {
            skipped_once = true;
            tracing::info!(event_id = entry.event_id(), "leaving entry unacknowledged");
            continue;
        }
        queue.ack(entry.event_id());
        acked += 1;
        tracing::info!(amount = entry.data().amount, "acknowledged");
    }
    cancel.cancel();
    tracing::info!(
        pending = queue.pending_len(),
        in_flight = queue.in_flight_len(),
        "ack queue drained"
    );
}

async fn run_event_queue() -> anyhow::Result<()> {
    let queue = Arc::new(InMemoryEventQueue::new());
    let publisher = EventQueuePublisher::builder().queue(queue.clone()).build();
    publisher
        .publish(AccountOpened {
            account_id: "acc-9".to_string(),
            initial_balance: 5,
        })
        .await?;

    let store = InMemoryEventStore::new();
    while let Some(event) = queue.dequeue_default().await? {
        let opened = event.decode::<AccountOpened>()?;
        tracing::info!(account_id = %opened.account_id, "dequeued from event queue");
        store.save_events(vec![event]).await?;
    }
    let queues = queue.queues().await?;
    tracing::info!(stored = store.len(), ?queues, "event queue done");
    Ok(())
}

async fn run_stream(stream: &InMemoryStream) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let mut audit = stream.read_messages("audit", 10, IdRange::all(), cancel.clone());
    let total = stream.count("audit", &IdRange::all()).await?;
    for _ in 0..total {
        if let Some(msg) = audit.next().await {
            tracing::info!(id = msg.id(), data = %msg.data(), "audit entry");
            stream.acknowledge_message("audit", msg.id()).await?;
        }
    }
    cancel.cancel();

    for i in 0..5 {
        stream
            .add_message("metrics", StreamMessage::new(serde_json::json!({ "tick": i })))
            .await?;
    }
    let evicted = stream.trim_to_size("metrics", 2).await?;
    tracing::info!(evicted, remaining = stream.len("metrics"), "metrics trimmed");
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let stream = InMemoryStream::new();
    run_bus(&stream).await?;
    run_ack_queue().await;
    run_event_queue().await?;
    run_stream(&stream).await?;
    Ok(())
}
