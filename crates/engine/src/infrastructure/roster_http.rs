//! REST adapter for the roster store, with a poll-and-diff change feed.
//!
//! The store itself is external; this adapter reads its record list and
//! synthesizes insert/update/delete events by diffing successive fetches.
//! That gives the feed's consumers exactly the contract they are written
//! against: at-least-once delivery, unspecified order.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;

use plaza_domain::{RosterEvent, RosterRecord};

use crate::infrastructure::ports::{FeedGuard, RosterError, RosterFeed, RosterStorePort};

/// Buffer for pending feed events before the room consumes them.
const FEED_CHANNEL_BUFFER: usize = 64;

pub struct HttpRosterStore {
    client: Client,
    base_url: String,
    poll_interval: Duration,
}

impl HttpRosterStore {
    pub fn new(base_url: &str, poll_interval: Duration) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
        }
    }

    async fn fetch(&self) -> Result<Vec<RosterRecord>, RosterError> {
        let response = self
            .client
            .get(format!("{}/prompts", self.base_url))
            .send()
            .await
            .map_err(|e| RosterError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RosterError::Request(format!(
                "roster store returned {}",
                response.status()
            )));
        }

        let records: Vec<WireRecord> = response
            .json()
            .await
            .map_err(|e| RosterError::InvalidPayload(e.to_string()))?;

        Ok(records.into_iter().map(RosterRecord::from).collect())
    }
}

#[async_trait]
impl RosterStorePort for HttpRosterStore {
    async fn list_all(&self) -> Result<Vec<RosterRecord>, RosterError> {
        self.fetch().await
    }

    async fn subscribe(&self) -> Result<RosterFeed, RosterError> {
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_BUFFER);

        // Seed the snapshot so subscribers do not replay records they have
        // already loaded via list_all. A failed seed just means the first
        // successful poll re-emits everything as inserts, which consumers
        // must tolerate anyway.
        let mut snapshot: HashMap<i64, RosterRecord> = match self.fetch().await {
            Ok(records) => records.into_iter().map(|r| (r.external_id, r)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Initial roster fetch failed, feed starts empty");
                HashMap::new()
            }
        };

        let store = Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            poll_interval: self.poll_interval,
        };

        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(store.poll_interval).await;
                let records = match store.fetch().await {
                    Ok(records) => records,
                    Err(e) => {
                        tracing::warn!(error = %e, "Roster poll failed");
                        continue;
                    }
                };
                for event in diff_records(&mut snapshot, records) {
                    if tx.send(event).await.is_err() {
                        // Subscriber dropped the feed; stop polling.
                        return;
                    }
                }
            }
        });

        Ok(RosterFeed::new(rx, FeedGuard::from_task(task)))
    }
}

/// Diff the previous snapshot against a fresh fetch, updating the snapshot
/// in place and returning the change events.
fn diff_records(
    snapshot: &mut HashMap<i64, RosterRecord>,
    current: Vec<RosterRecord>,
) -> Vec<RosterEvent> {
    let mut events = Vec::new();

    let mut seen = std::collections::HashSet::new();
    for record in current {
        seen.insert(record.external_id);
        match snapshot.get(&record.external_id) {
            None => {
                snapshot.insert(record.external_id, record.clone());
                events.push(RosterEvent::Insert(record));
            }
            Some(previous) if *previous != record => {
                snapshot.insert(record.external_id, record.clone());
                events.push(RosterEvent::Update(record));
            }
            Some(_) => {}
        }
    }

    let vanished: Vec<i64> = snapshot
        .keys()
        .copied()
        .filter(|id| !seen.contains(id))
        .collect();
    for external_id in vanished {
        snapshot.remove(&external_id);
        events.push(RosterEvent::Delete { external_id });
    }

    events
}

/// The store's record shape: `id` / `bot_name` / `bot_prompt`.
#[derive(Debug, Deserialize)]
struct WireRecord {
    id: i64,
    #[serde(default)]
    bot_name: String,
    #[serde(default)]
    bot_prompt: Option<String>,
}

impl From<WireRecord> for RosterRecord {
    fn from(wire: WireRecord) -> Self {
        Self {
            external_id: wire.id,
            name: wire.bot_name,
            prompt: wire.bot_prompt.filter(|p| !p.is_empty()),
        }
    }
}
