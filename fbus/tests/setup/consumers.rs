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
#![allow(unused)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::*;

use fbus::prelude::*;

use super::messages::*;

/// Ordered record of what consumers and hooks observed.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        let entry = entry.into();
        trace!(%entry, "journal");
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| e.as_str() == entry).count()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.count(entry) > 0
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Answers every `Ping` with a `Pong` to the sender.
#[bus_consumer(Ping)]
pub struct PingConsumer;

#[async_trait]
impl BusConsumer<Ping> for PingConsumer {
    async fn handle(&self, ctx: &Conversation, msg: Ping) -> Result<(), HandlerError> {
        info!(from = %msg.from, sender = ctx.sender(), "Ping received");
        ctx.reply(&Pong { to: msg.from }).await?;
        Ok(())
    }
}

/// Passes every `Ping` on to another client.
#[bus_consumer(Ping, no_default)]
pub struct PingForwarder {
    pub to: String,
}

#[async_trait]
impl BusConsumer<Ping> for PingForwarder {
    async fn handle(&self, ctx: &Conversation, _msg: Ping) -> Result<(), HandlerError> {
        ctx.forward(&self.to).await?;
        Ok(())
    }
}

#[bus_consumer(OrderPlaced, no_default)]
pub struct OrderAudit {
    pub journal: Journal,
}

#[async_trait]
impl BusConsumer<OrderPlaced> for OrderAudit {
    async fn handle(&self, _ctx: &Conversation, msg: OrderPlaced) -> Result<(), HandlerError> {
        self.journal.record(format!(
            "order:{}:{}",
            msg.order_id,
            msg.customer_name.unwrap_or_default()
        ));
        Ok(())
    }
}

/// Records successful work items; fails the ones flagged `fail`.
#[bus_consumer(Work, Slow, no_default)]
pub struct WorkConsumer {
    pub journal: Journal,
}

#[async_trait]
impl BusConsumer<Work> for WorkConsumer {
    async fn handle(&self, _ctx: &Conversation, msg: Work) -> Result<(), HandlerError> {
        if msg.fail {
            return Err(HandlerError::new(format!("work item {} failed", msg.id)));
        }
        self.journal.record(format!("work:{}", msg.id));
        Ok(())
    }
}

#[async_trait]
impl BusConsumer<Slow> for WorkConsumer {
    async fn handle(&self, _ctx: &Conversation, msg: Slow) -> Result<(), HandlerError> {
        self.journal.record("slow:start");
        tokio::time::sleep(Duration::from_millis(msg.millis)).await;
        self.journal.record("slow:done");
        Ok(())
    }
}
