/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
use std::time::Duration;

use tracing::*;

use fbus::prelude::*;
use fbus_test::prelude::*;

use crate::setup::*;

mod setup;

const WAIT: Duration = Duration::from_secs(5);

#[bus_test]
async fn test_ping_pong_reply_reaches_sender_once() -> anyhow::Result<()> {
    initialize_tracing();
    let endpoint = endpoint("ping-pong");
    let journal = Journal::default();

    let responder = BusBuilder::configure()
        .with_name("pp-b")
        .with_consumer::<PingConsumer>()
        .use_transport(endpoint.clone())
        .build()?;
    responder.start().await?;

    let pongs = journal.clone();
    let requester = BusBuilder::configure()
        .with_name("pp-a")
        .with_handler(move |ctx: Conversation, msg: Pong| {
            let pongs = pongs.clone();
            async move {
                assert_eq!(ctx.sender(), "pp-b");
                pongs.record(format!("pong:{}", msg.to));
                Ok::<(), HandlerError>(())
            }
        })
        .use_transport(endpoint)
        .build()?;
    let initiator = requester.start().await?;

    initiator
        .send("pp-b", &Ping {
            from: "pp-a".to_string(),
        })
        .await?;

    eventually(WAIT, || journal.contains("pong:pp-a")).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(journal.count("pong:pp-a"), 1, "reply must arrive exactly once");
    eventually(WAIT, || responder.stats().handled == 1).await?;

    requester.stop().await?;
    responder.stop().await?;
    assert_eq!(requester.state(), RuntimeState::Stopped);
    Ok(())
}

#[bus_test]
async fn test_events_fan_out_to_every_subscriber() -> anyhow::Result<()> {
    initialize_tracing();
    let endpoint = endpoint("fan-out");
    let north = Journal::default();
    let south = Journal::default();

    let mut runtimes = Vec::new();
    for (name, journal) in [("audit-north", &north), ("audit-south", &south)] {
        let journal = journal.clone();
        let runtime = BusBuilder::configure()
            .with_name(name)
            .with_consumer_factory::<OrderAudit, _>(move || OrderAudit {
                journal: journal.clone(),
            })
            .use_transport(endpoint.clone())
            .build()?;
        runtime.start().await?;
        runtimes.push(runtime);
    }

    let publisher = BusBuilder::configure()
        .with_name("orders")
        .use_transport(endpoint)
        .build()?;
    let initiator = publisher.start().await?;

    initiator
        .publish(&OrderPlaced {
            order_id: 7,
            customer_name: Some("Ada".to_string()),
        })
        .await?;

    eventually(WAIT, || north.contains("order:7:Ada") && south.contains("order:7:Ada")).await?;
    assert_eq!(north.len(), 1);
    assert_eq!(south.len(), 1);

    publisher.stop().await?;
    for runtime in runtimes {
        runtime.stop().await?;
    }
    Ok(())
}

#[bus_test]
async fn test_competing_runtimes_share_a_queue() -> anyhow::Result<()> {
    initialize_tracing();
    let endpoint = endpoint("competing");
    let journal = Journal::default();

    let mut workers = Vec::new();
    for _ in 0..2 {
        let journal = journal.clone();
        let runtime = BusBuilder::configure()
            .with_name("workers")
            .with_consumer_factory::<WorkConsumer, _>(move || WorkConsumer {
                journal: journal.clone(),
            })
            .use_transport(endpoint.clone())
            .build()?;
        runtime.start().await?;
        workers.push(runtime);
    }

    let client = BusBuilder::configure()
        .with_name("work-client")
        .use_transport(endpoint)
        .build()?;
    let initiator = client.start().await?;
    for id in 0..10 {
        initiator.send("workers", &Work { id, fail: false }).await?;
    }

    eventually(WAIT, || journal.len() == 10).await?;
    for id in 0..10 {
        assert_eq!(journal.count(&format!("work:{id}")), 1, "work {id} handled once");
    }
    eventually(WAIT, || workers.iter().map(|w| w.stats().handled).sum::<u64>() == 10).await?;

    client.stop().await?;
    for worker in workers {
        worker.stop().await?;
    }
    Ok(())
}

#[bus_test]
async fn test_shards_have_their_own_queue() -> anyhow::Result<()> {
    initialize_tracing();
    let endpoint = endpoint("shards");
    let broker = InMemoryBroker::for_endpoint(&endpoint);
    let journal = Journal::default();

    let shard = BusBuilder::configure()
        .with_name("ledger")
        .with_shard("2")
        .with_consumer::<PingConsumer>()
        .use_transport(endpoint.clone())
        .build()?;
    shard.start().await?;

    let pongs = journal.clone();
    let client = BusBuilder::configure()
        .with_name("ledger-client")
        .with_handler(move |_ctx: Conversation, msg: Pong| {
            let pongs = pongs.clone();
            async move {
                pongs.record(format!("pong:{}", msg.to));
                Ok::<(), HandlerError>(())
            }
        })
        .use_transport(endpoint)
        .build()?;
    let initiator = client.start().await?;

    initiator
        .send_to_shard("ledger", "2", &Ping {
            from: "sharded".to_string(),
        })
        .await?;
    initiator
        .send("ledger", &Ping {
            from: "unsharded".to_string(),
        })
        .await?;

    eventually(WAIT, || journal.contains("pong:sharded")).await?;
    assert!(!journal.contains("pong:unsharded"));
    assert_eq!(broker.queue_depth("ledger"), 1, "unsharded ping waits in its own queue");
    assert_eq!(broker.queue_depth("ledger/2"), 0);

    client.stop().await?;
    shard.stop().await?;
    Ok(())
}

#[bus_test]
async fn test_forward_keeps_original_sender() -> anyhow::Result<()> {
    initialize_tracing();
    let endpoint = endpoint("forward");
    let journal = Journal::default();

    let front = BusBuilder::configure()
        .with_name("fwd-front")
        .with_consumer_factory::<PingForwarder, _>(|| PingForwarder {
            to: "fwd-back".to_string(),
        })
        .use_transport(endpoint.clone())
        .build()?;
    front.start().await?;

    let back = BusBuilder::configure()
        .with_name("fwd-back")
        .with_consumer::<PingConsumer>()
        .use_transport(endpoint.clone())
        .build()?;
    back.start().await?;

    let pongs = journal.clone();
    let client = BusBuilder::configure()
        .with_name("fwd-client")
        .with_handler(move |ctx: Conversation, msg: Pong| {
            let pongs = pongs.clone();
            async move {
                pongs.record(format!("pong:{}:{}", msg.to, ctx.sender()));
                Ok::<(), HandlerError>(())
            }
        })
        .use_transport(endpoint)
        .build()?;
    let initiator = client.start().await?;

    initiator
        .send("fwd-front", &Ping {
            from: "client".to_string(),
        })
        .await?;

    eventually(WAIT, || journal.contains("pong:client:fwd-back")).await?;
    eventually(WAIT, || front.stats().handled == 1 && back.stats().handled == 1).await?;

    client.stop().await?;
    back.stop().await?;
    front.stop().await?;
    Ok(())
}

#[bus_test]
async fn test_message_kind_is_enforced_on_send() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = BusBuilder::configure()
        .with_name("kinds")
        .use_transport(endpoint("kinds"))
        .build()?;
    let initiator = runtime.start().await?;

    let published = initiator
        .publish(&Ping {
            from: "kinds".to_string(),
        })
        .await;
    assert!(matches!(published, Err(BusError::Configuration(_))));

    let sent = initiator
        .send("anyone", &OrderPlaced {
            order_id: 1,
            customer_name: None,
        })
        .await;
    assert!(matches!(sent, Err(BusError::Configuration(_))));

    runtime.stop().await?;
    Ok(())
}

#[bus_test]
async fn test_custom_codec_options_round_trip() -> anyhow::Result<()> {
    initialize_tracing();
    let endpoint = endpoint("camel-case");
    let journal = Journal::default();

    let audit_journal = journal.clone();
    let audit = BusBuilder::configure()
        .with_name("camel-audit")
        .with_consumer_factory::<OrderAudit, _>(move || OrderAudit {
            journal: audit_journal.clone(),
        })
        .use_codec(|options| {
            options.field_naming = FieldNaming::CamelCase;
            options.ignore_null_fields = true;
        })
        .use_transport(endpoint.clone())
        .build()?;
    audit.start().await?;

    let publisher = BusBuilder::configure()
        .with_name("camel-orders")
        .use_codec(|options| {
            options.field_naming = FieldNaming::CamelCase;
            options.ignore_null_fields = true;
        })
        .use_transport(endpoint)
        .build()?;
    let initiator = publisher.start().await?;

    initiator
        .publish(&OrderPlaced {
            order_id: 11,
            customer_name: Some("Grace".to_string()),
        })
        .await?;
    initiator
        .publish(&OrderPlaced {
            order_id: 12,
            customer_name: None,
        })
        .await?;

    eventually(WAIT, || journal.len() == 2).await?;
    assert!(journal.contains("order:11:Grace"));
    assert!(journal.contains("order:12:"));
    debug!(entries = ?journal.entries(), "camel-case round trip");

    publisher.stop().await?;
    audit.stop().await?;
    Ok(())
}
