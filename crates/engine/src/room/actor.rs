//! The session room: single serialized owner of all shared state.
//!
//! One tokio task per room. Every operation enters as a `RoomCommand` on the
//! room's queue and is applied to completion before the next one starts;
//! `apply` is a plain synchronous function, so no command can observe another
//! mid-mutation. The only slow path - the delegate call for a directed
//! message to a synthetic participant - runs on its own task and re-enters
//! the queue as `DeliverReply`, so its latency never stalls other traffic.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::mpsc;

use plaza_domain::{
    participant::placeholder_username, Participant, Position, RoomState, RosterEvent,
    RosterRecord, SessionId, UpdateOutcome, HERO_VARIANTS,
};
use plaza_protocol::{ParticipantInfo, ServerMessage};

use crate::infrastructure::ports::RosterStorePort;
use crate::room::responder::DelegateResponder;

/// Commands queued per room before backpressure kicks in.
const ROOM_QUEUE_BUFFER: usize = 256;

/// Spawn coordinates are rolled in this square, matching what the web
/// clients expect.
const SPAWN_EXTENT: f64 = 100.0;

/// Everything a room needs besides its own state.
#[derive(Clone)]
pub struct RoomDeps {
    pub responder: Arc<DelegateResponder>,
    pub roster: Arc<dyn RosterStorePort>,
    pub fallback_prompt: String,
}

/// One operation on the room, applied atomically in arrival order.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        session_id: SessionId,
        username: Option<String>,
        observer: bool,
        sender: mpsc::Sender<ServerMessage>,
    },
    Leave {
        session_id: SessionId,
        consented: bool,
    },
    Move {
        session_id: SessionId,
        x: f64,
        y: f64,
    },
    Chat {
        session_id: SessionId,
        text: String,
    },
    Direct {
        from: SessionId,
        to: String,
        text: String,
    },
    UpdatePrompt {
        session_id: SessionId,
        prompt: String,
    },
    Roster(RosterEvent),
    /// Completion of a delegate call spawned by `Direct`.
    DeliverReply {
        to: SessionId,
        speaker: SessionId,
        text: String,
    },
    Dispose,
}

/// Cloneable address of a running room.
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Enqueue a command. Returns false once the room has disposed.
    pub async fn send(&self, command: RoomCommand) -> bool {
        self.tx.send(command).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A connected WebSocket client as the room sees it.
struct ClientHandle {
    sender: mpsc::Sender<ServerMessage>,
    observer: bool,
}

enum Flow {
    Continue,
    Dispose,
}

pub struct Room {
    key: String,
    state: RoomState,
    clients: HashMap<SessionId, ClientHandle>,
    deps: RoomDeps,
    tx: mpsc::Sender<RoomCommand>,
    rx: mpsc::Receiver<RoomCommand>,
}

impl Room {
    pub fn new(key: String, deps: RoomDeps) -> (RoomHandle, Self) {
        let (tx, rx) = mpsc::channel(ROOM_QUEUE_BUFFER);
        let handle = RoomHandle { tx: tx.clone() };
        let state = RoomState::new(deps.fallback_prompt.clone());
        (
            handle,
            Self {
                key,
                state,
                clients: HashMap::new(),
                deps,
                tx,
                rx,
            },
        )
    }

    /// Run the room to disposal: synchronous setup (initial roster load,
    /// change-feed subscription), then the serialized command loop.
    pub async fn run(mut self) {
        tracing::info!(room = %self.key, "Room created");

        let roster = Arc::clone(&self.deps.roster);
        match roster.list_all().await {
            Ok(records) => {
                for record in &records {
                    self.materialize_record(record);
                }
                tracing::info!(
                    room = %self.key,
                    count = records.len(),
                    "Initial roster loaded"
                );
            }
            Err(e) => {
                tracing::warn!(room = %self.key, error = %e, "Initial roster load failed");
            }
        }

        match roster.subscribe().await {
            Ok(mut feed) => {
                // Forward feed events into the command queue so reconciliation
                // runs as ordinary serialized operations. The forwarder owns
                // the feed, and the feed guard aborts the store's poll task,
                // so disposing the room (dropping `rx`) tears the whole chain
                // down on every exit path.
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            event = feed.recv() => match event {
                                Some(event) => {
                                    if tx.send(RoomCommand::Roster(event)).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                            _ = tx.closed() => break,
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(room = %self.key, error = %e, "Roster feed subscription failed");
            }
        }

        while let Some(command) = self.rx.recv().await {
            if let Flow::Dispose = self.apply(command) {
                break;
            }
        }

        tracing::info!(room = %self.key, "Room disposed");
    }

    /// Apply one command. Deliberately synchronous: the room never suspends
    /// between reading and writing its own state.
    fn apply(&mut self, command: RoomCommand) -> Flow {
        match command {
            RoomCommand::Join {
                session_id,
                username,
                observer,
                sender,
            } => self.handle_join(session_id, username, observer, sender),
            RoomCommand::Leave {
                session_id,
                consented,
            } => return self.handle_leave(session_id, consented),
            RoomCommand::Move { session_id, x, y } => {
                if self.state.move_to(session_id.as_str(), Position::new(x, y)) {
                    self.broadcast_state();
                }
            }
            RoomCommand::Chat { session_id, text } => {
                self.state.append_chat(text.clone());
                self.broadcast(ServerMessage::ChatMessage {
                    user: session_id.to_string(),
                    text,
                });
            }
            RoomCommand::Direct { from, to, text } => self.handle_direct(from, to, text),
            RoomCommand::UpdatePrompt { session_id, prompt } => {
                match self.clients.get(&session_id) {
                    Some(client) if client.observer => {
                        tracing::info!(room = %self.key, "Room fallback prompt updated");
                        self.state.set_fallback_prompt(prompt);
                    }
                    _ => {
                        tracing::warn!(
                            room = %self.key,
                            session_id = %session_id,
                            "update_prompt from non-editor connection ignored"
                        );
                    }
                }
            }
            RoomCommand::Roster(event) => self.handle_roster(event),
            RoomCommand::DeliverReply { to, speaker, text } => {
                match self.clients.get(&to) {
                    Some(client) => self.send_on(&to, client, ServerMessage::PrivateMessage {
                        user: speaker.to_string(),
                        text,
                    }),
                    None => {
                        tracing::debug!(
                            room = %self.key,
                            session_id = %to,
                            "Delegate reply arrived after requester left, dropped"
                        );
                    }
                }
            }
            RoomCommand::Dispose => return Flow::Dispose,
        }
        Flow::Continue
    }

    fn handle_join(
        &mut self,
        session_id: SessionId,
        username: Option<String>,
        observer: bool,
        sender: mpsc::Sender<ServerMessage>,
    ) {
        if observer {
            self.clients.insert(
                session_id.clone(),
                ClientHandle {
                    sender,
                    observer: true,
                },
            );
            tracing::info!(room = %self.key, session_id = %session_id, "Observer joined");
            self.send_to(&session_id, ServerMessage::Joined {
                session_id: session_id.to_string(),
                observer: true,
            });
            self.send_to(&session_id, self.state_message());
            return;
        }

        let username = username.unwrap_or_else(|| placeholder_username(&session_id));
        let mut rng = rand::thread_rng();
        let participant = Participant::human(
            session_id.clone(),
            username,
            rng.gen_range(1..=HERO_VARIANTS),
            Position::new(
                rng.gen_range(0.0..SPAWN_EXTENT),
                rng.gen_range(0.0..SPAWN_EXTENT),
            ),
        );
        drop(rng);

        let participant = match participant {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(room = %self.key, error = %e, "Failed to create participant");
                return;
            }
        };
        if let Err(e) = self.state.insert(participant) {
            tracing::error!(room = %self.key, error = %e, "Join collided with live session id");
            return;
        }

        self.clients.insert(
            session_id.clone(),
            ClientHandle {
                sender,
                observer: false,
            },
        );
        tracing::info!(room = %self.key, session_id = %session_id, "Client joined");

        self.send_to(&session_id, ServerMessage::Joined {
            session_id: session_id.to_string(),
            observer: false,
        });
        self.broadcast_player_list();
        self.broadcast_state();
    }

    fn handle_leave(&mut self, session_id: SessionId, consented: bool) -> Flow {
        let client = self.clients.remove(&session_id);
        let participant = self.state.remove(session_id.as_str());

        if client.is_none() && participant.is_none() {
            return Flow::Continue;
        }
        tracing::info!(
            room = %self.key,
            session_id = %session_id,
            consented,
            "Client left"
        );

        if participant.is_some() {
            self.broadcast_player_list();
            self.broadcast_state();
        }

        if self.clients.is_empty() {
            return Flow::Dispose;
        }
        Flow::Continue
    }

    fn handle_direct(&mut self, from: SessionId, to: String, text: String) {
        if let Some(client) = self.clients.get(to.as_str()) {
            // Connected client: deliver only to them.
            let message = ServerMessage::PrivateMessage {
                user: from.to_string(),
                text,
            };
            let to = SessionId::new(to);
            self.send_on(&to, client, message);
        } else if self.state.is_synthetic(&to) {
            let Some(prompt) = self.state.prompt_for(&to) else {
                return;
            };
            let responder = self.deps.responder.clone();
            let tx = self.tx.clone();
            let speaker = SessionId::new(to);
            // The delegate call suspends out here; the room keeps processing
            // other commands while the reply is pending.
            tokio::spawn(async move {
                let reply = responder.respond(&prompt, &text).await;
                let _ = tx
                    .send(RoomCommand::DeliverReply {
                        to: from,
                        speaker,
                        text: reply,
                    })
                    .await;
            });
        } else {
            tracing::debug!(
                room = %self.key,
                recipient = %to,
                "Directed message to unknown recipient dropped"
            );
        }
    }

    fn handle_roster(&mut self, event: RosterEvent) {
        match event {
            RosterEvent::Insert(record) => {
                if self.materialize_record(&record) {
                    self.broadcast_player_list();
                    self.broadcast_state();
                }
            }
            RosterEvent::Update(record) => match self.state.apply_update(&record) {
                UpdateOutcome::Updated => self.broadcast_state(),
                UpdateOutcome::Missing => {
                    tracing::warn!(
                        room = %self.key,
                        external_id = record.external_id,
                        "Update for unmaterialized record, creating it"
                    );
                    if self.materialize_record(&record) {
                        self.broadcast_player_list();
                        self.broadcast_state();
                    }
                }
            },
            RosterEvent::Delete { external_id } => match self.state.apply_delete(external_id) {
                Some(participant) => {
                    tracing::info!(
                        room = %self.key,
                        external_id,
                        username = %participant.username,
                        "Synthetic participant removed"
                    );
                    self.broadcast_player_list();
                    self.broadcast_state();
                }
                None => {
                    tracing::warn!(
                        room = %self.key,
                        external_id,
                        "Delete for unknown roster record ignored"
                    );
                }
            },
        }
    }

    /// Materialize a roster record as a synthetic participant. Idempotent per
    /// external id; returns whether a participant was created.
    fn materialize_record(&mut self, record: &RosterRecord) -> bool {
        let session_id = self.unique_synthetic_id();
        let mut rng = rand::thread_rng();
        let hero_variant = rng.gen_range(1..=HERO_VARIANTS);
        let position = Position::new(
            rng.gen_range(0.0..SPAWN_EXTENT),
            rng.gen_range(0.0..SPAWN_EXTENT),
        );
        drop(rng);

        match self
            .state
            .materialize(record, session_id, hero_variant, position)
        {
            Ok(created) => {
                if created {
                    tracing::info!(
                        room = %self.key,
                        external_id = record.external_id,
                        name = %record.name,
                        "Synthetic participant materialized"
                    );
                }
                created
            }
            Err(e) => {
                tracing::error!(
                    room = %self.key,
                    external_id = record.external_id,
                    error = %e,
                    "Failed to materialize roster record"
                );
                false
            }
        }
    }

    /// 8-digit numeric session id not colliding with anything live.
    fn unique_synthetic_id(&self) -> SessionId {
        loop {
            let id = rand::thread_rng()
                .gen_range(10_000_000i64..100_000_000)
                .to_string();
            if !self.state.contains(&id) && !self.clients.contains_key(id.as_str()) {
                return SessionId::new(id);
            }
        }
    }

    fn state_message(&self) -> ServerMessage {
        ServerMessage::StateSync {
            participants: self
                .state
                .participants()
                .map(|p| ParticipantInfo {
                    session_id: p.session_id.to_string(),
                    username: p.username.clone(),
                    hero_variant: p.hero_variant,
                    x: p.position.x,
                    y: p.position.y,
                })
                .collect(),
        }
    }

    fn broadcast_state(&self) {
        self.broadcast(self.state_message());
    }

    fn broadcast_player_list(&self) {
        self.broadcast(ServerMessage::PlayerList {
            players: self
                .state
                .session_ids()
                .into_iter()
                .map(String::from)
                .collect(),
        });
    }

    fn broadcast(&self, message: ServerMessage) {
        for (session_id, client) in &self.clients {
            self.send_on(session_id, client, message.clone());
        }
    }

    fn send_to(&self, session_id: &SessionId, message: ServerMessage) {
        if let Some(client) = self.clients.get(session_id) {
            self.send_on(session_id, client, message);
        }
    }

    fn send_on(&self, session_id: &SessionId, client: &ClientHandle, message: ServerMessage) {
        if let Err(e) = client.sender.try_send(message) {
            tracing::warn!(
                room = %self.key,
                session_id = %session_id,
                error = %e,
                "Failed to send message to client"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    use crate::infrastructure::ports::{
        ChatError, ChatModelPort, ChatRequest, RosterError, RosterFeed, RosterStorePort,
    };
    use crate::room::responder::{DelegateResponder, RetryConfig};

    /// Chat endpoint that records every request. When gated, calls park until
    /// the test releases them.
    struct StubChat {
        calls: AtomicU32,
        reply: String,
        seen: Mutex<Vec<(String, String)>>,
        gate: Option<Arc<Notify>>,
    }

    impl StubChat {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                reply: reply.to_string(),
                seen: Mutex::new(Vec::new()),
                gate: None,
            })
        }

        fn gated(reply: &str, gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                reply: reply.to_string(),
                seen: Mutex::new(Vec::new()),
                gate: Some(gate),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn seen(&self) -> Vec<(String, String)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModelPort for StubChat {
        async fn complete(&self, request: ChatRequest) -> Result<String, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((request.system_prompt, request.user_message));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(self.reply.clone())
        }
    }

    /// Roster store with a fixed record set and a feed that never fires;
    /// tests drive change events through the command queue directly.
    struct StaticRoster(Vec<RosterRecord>);

    #[async_trait]
    impl RosterStorePort for StaticRoster {
        async fn list_all(&self) -> Result<Vec<RosterRecord>, RosterError> {
            Ok(self.0.clone())
        }

        async fn subscribe(&self) -> Result<RosterFeed, RosterError> {
            Ok(RosterFeed::empty())
        }
    }

    fn record(external_id: i64, name: &str, prompt: Option<&str>) -> RosterRecord {
        RosterRecord {
            external_id,
            name: name.to_string(),
            prompt: prompt.map(str::to_string),
        }
    }

    fn spawn_room(records: Vec<RosterRecord>, chat: Arc<StubChat>) -> RoomHandle {
        let deps = RoomDeps {
            responder: Arc::new(DelegateResponder::new(
                chat,
                150,
                RetryConfig {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(1),
                },
            )),
            roster: Arc::new(StaticRoster(records)),
            fallback_prompt: "room default".to_string(),
        };
        let (handle, room) = Room::new("test".to_string(), deps);
        tokio::spawn(room.run());
        handle
    }

    async fn join_as(
        handle: &RoomHandle,
        id: &str,
        observer: bool,
    ) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(64);
        assert!(
            handle
                .send(RoomCommand::Join {
                    session_id: SessionId::new(id),
                    username: Some(id.to_string()),
                    observer,
                    sender: tx,
                })
                .await
        );
        rx
    }

    async fn join(handle: &RoomHandle, id: &str) -> mpsc::Receiver<ServerMessage> {
        join_as(handle, id, false).await
    }

    async fn recv(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("room dropped the client channel")
    }

    /// Skip broadcasts until one satisfies the predicate; the per-message
    /// timeout bounds the wait.
    async fn recv_until(
        rx: &mut mpsc::Receiver<ServerMessage>,
        pred: impl Fn(&ServerMessage) -> bool,
    ) -> ServerMessage {
        loop {
            let msg = recv(rx).await;
            if pred(&msg) {
                return msg;
            }
        }
    }

    /// Wait for a `player_list` broadcast matching exactly this member set.
    async fn wait_for_player_list(rx: &mut mpsc::Receiver<ServerMessage>, expected: &[&str]) {
        let mut want: Vec<&str> = expected.to_vec();
        want.sort_unstable();
        loop {
            if let ServerMessage::PlayerList { players } =
                recv_until(rx, |m| matches!(m, ServerMessage::PlayerList { .. })).await
            {
                let mut got: Vec<&str> = players.iter().map(String::as_str).collect();
                got.sort_unstable();
                if got == want {
                    return;
                }
            }
        }
    }

    /// Pull state syncs until one contains a participant with this username,
    /// and return that participant's session id.
    async fn find_session_id(rx: &mut mpsc::Receiver<ServerMessage>, username: &str) -> String {
        loop {
            if let ServerMessage::StateSync { participants } =
                recv_until(rx, |m| matches!(m, ServerMessage::StateSync { .. })).await
            {
                if let Some(p) = participants.iter().find(|p| p.username == username) {
                    return p.session_id.clone();
                }
            }
        }
    }

    #[tokio::test]
    async fn join_and_leave_broadcast_the_roster() {
        let handle = spawn_room(vec![], StubChat::replying("ok"));

        let mut a = join(&handle, "aaa").await;
        wait_for_player_list(&mut a, &["aaa"]).await;

        let _b = join(&handle, "bbb").await;
        wait_for_player_list(&mut a, &["aaa", "bbb"]).await;

        handle
            .send(RoomCommand::Leave {
                session_id: SessionId::new("bbb"),
                consented: true,
            })
            .await;
        wait_for_player_list(&mut a, &["aaa"]).await;
    }

    #[tokio::test]
    async fn observer_joins_without_a_participant() {
        let handle = spawn_room(vec![], StubChat::replying("ok"));

        let mut editor = join_as(&handle, "editor", true).await;
        let joined = recv(&mut editor).await;
        assert!(matches!(
            joined,
            ServerMessage::Joined { observer: true, .. }
        ));

        let _a = join(&handle, "aaa").await;
        // The observer sees broadcasts, but never appears in the roster.
        wait_for_player_list(&mut editor, &["aaa"]).await;
    }

    #[tokio::test]
    async fn directed_message_to_unknown_recipient_is_dropped() {
        let handle = spawn_room(vec![], StubChat::replying("ok"));
        let mut a = join(&handle, "aaa").await;
        wait_for_player_list(&mut a, &["aaa"]).await;

        handle
            .send(RoomCommand::Direct {
                from: SessionId::new("aaa"),
                to: "ghost".to_string(),
                text: "hello?".to_string(),
            })
            .await;
        handle
            .send(RoomCommand::Chat {
                session_id: SessionId::new("aaa"),
                text: "still here".to_string(),
            })
            .await;

        // The room stays healthy and nothing private ever shows up.
        let msg = recv_until(&mut a, |m| {
            matches!(m, ServerMessage::ChatMessage { .. } | ServerMessage::PrivateMessage { .. })
        })
        .await;
        assert!(matches!(
            msg,
            ServerMessage::ChatMessage { text, .. } if text == "still here"
        ));
    }

    #[tokio::test]
    async fn directed_message_to_human_reaches_only_the_recipient() {
        let handle = spawn_room(vec![], StubChat::replying("ok"));
        let mut a = join(&handle, "aaa").await;
        let mut b = join(&handle, "bbb").await;
        wait_for_player_list(&mut a, &["aaa", "bbb"]).await;

        handle
            .send(RoomCommand::Direct {
                from: SessionId::new("aaa"),
                to: "bbb".to_string(),
                text: "psst".to_string(),
            })
            .await;

        let msg = recv_until(&mut b, |m| matches!(m, ServerMessage::PrivateMessage { .. })).await;
        assert!(matches!(
            msg,
            ServerMessage::PrivateMessage { user, text } if user == "aaa" && text == "psst"
        ));

        // The sender gets no copy; the next thing it sees is ordinary chat.
        handle
            .send(RoomCommand::Chat {
                session_id: SessionId::new("bbb"),
                text: "done".to_string(),
            })
            .await;
        let msg = recv_until(&mut a, |m| {
            matches!(m, ServerMessage::ChatMessage { .. } | ServerMessage::PrivateMessage { .. })
        })
        .await;
        assert!(matches!(msg, ServerMessage::ChatMessage { .. }));
    }

    #[tokio::test]
    async fn bot_conversation_round_trip() {
        let chat = StubChat::replying("short answer");
        let handle = spawn_room(vec![record(1, "Bot", Some("You are terse."))], chat.clone());

        let mut a = join(&handle, "aaa").await;
        let bot_id = find_session_id(&mut a, "Bot").await;

        handle
            .send(RoomCommand::Direct {
                from: SessionId::new("aaa"),
                to: bot_id.clone(),
                text: "hi".to_string(),
            })
            .await;

        let msg = recv_until(&mut a, |m| matches!(m, ServerMessage::PrivateMessage { .. })).await;
        assert!(matches!(
            msg,
            ServerMessage::PrivateMessage { ref user, ref text }
                if *user == bot_id && text == "short answer"
        ));
        assert_eq!(
            chat.seen(),
            vec![("You are terse.".to_string(), "hi".to_string())]
        );

        // After the asker leaves, the roster is down to the bot.
        let mut b = join(&handle, "bbb").await;
        handle
            .send(RoomCommand::Leave {
                session_id: SessionId::new("aaa"),
                consented: true,
            })
            .await;
        wait_for_player_list(&mut b, &[bot_id.as_str(), "bbb"]).await;
    }

    #[tokio::test]
    async fn duplicate_insert_events_materialize_once() {
        let handle = spawn_room(vec![], StubChat::replying("ok"));
        let mut a = join(&handle, "aaa").await;

        handle
            .send(RoomCommand::Roster(RosterEvent::Insert(record(
                7,
                "Bot",
                None,
            ))))
            .await;
        let _bot_id = find_session_id(&mut a, "Bot").await;

        handle
            .send(RoomCommand::Roster(RosterEvent::Insert(record(
                7,
                "Bot",
                None,
            ))))
            .await;
        handle
            .send(RoomCommand::Chat {
                session_id: SessionId::new("aaa"),
                text: "ping".to_string(),
            })
            .await;

        // Nothing new materialized: no roster broadcast between the
        // duplicate insert and the chat.
        let msg = recv_until(&mut a, |m| {
            matches!(m, ServerMessage::ChatMessage { .. } | ServerMessage::PlayerList { .. })
        })
        .await;
        assert!(matches!(msg, ServerMessage::ChatMessage { .. }));
    }

    #[tokio::test]
    async fn update_for_unknown_record_materializes_then_updates_in_place() {
        let handle = spawn_room(vec![], StubChat::replying("ok"));
        let mut a = join(&handle, "aaa").await;

        handle
            .send(RoomCommand::Roster(RosterEvent::Update(record(
                9,
                "Newbie",
                Some("p"),
            ))))
            .await;
        let first_id = find_session_id(&mut a, "Newbie").await;

        handle
            .send(RoomCommand::Roster(RosterEvent::Update(record(
                9,
                "Renamed",
                Some("p2"),
            ))))
            .await;
        let second_id = find_session_id(&mut a, "Renamed").await;

        // Same participant, renamed in place.
        assert_eq!(first_id, second_id);
    }

    #[tokio::test]
    async fn delete_for_unknown_record_changes_nothing() {
        let handle = spawn_room(vec![record(1, "Bot", None)], StubChat::replying("ok"));
        let mut a = join(&handle, "aaa").await;
        let _bot_id = find_session_id(&mut a, "Bot").await;

        handle
            .send(RoomCommand::Roster(RosterEvent::Delete { external_id: 99 }))
            .await;
        handle
            .send(RoomCommand::Chat {
                session_id: SessionId::new("aaa"),
                text: "ping".to_string(),
            })
            .await;

        // No roster broadcast precedes the chat; the bot is still there.
        let msg = recv_until(&mut a, |m| {
            matches!(m, ServerMessage::ChatMessage { .. } | ServerMessage::PlayerList { .. })
        })
        .await;
        assert!(matches!(msg, ServerMessage::ChatMessage { .. }));

        handle
            .send(RoomCommand::Roster(RosterEvent::Delete { external_id: 1 }))
            .await;
        wait_for_player_list(&mut a, &["aaa"]).await;
    }

    #[tokio::test]
    async fn fallback_prompt_is_editor_writable_only() {
        let chat = StubChat::replying("r");
        // Record without a prompt: the room-wide fallback applies.
        let handle = spawn_room(vec![record(2, "Blank", None)], chat.clone());

        let mut a = join(&handle, "aaa").await;
        let bot_id = find_session_id(&mut a, "Blank").await;

        // A regular client cannot overwrite the room prompt.
        handle
            .send(RoomCommand::UpdatePrompt {
                session_id: SessionId::new("aaa"),
                prompt: "hijacked".to_string(),
            })
            .await;
        handle
            .send(RoomCommand::Direct {
                from: SessionId::new("aaa"),
                to: bot_id.clone(),
                text: "q1".to_string(),
            })
            .await;
        recv_until(&mut a, |m| matches!(m, ServerMessage::PrivateMessage { .. })).await;

        // An editor connection can.
        let _editor = join_as(&handle, "editor", true).await;
        handle
            .send(RoomCommand::UpdatePrompt {
                session_id: SessionId::new("editor"),
                prompt: "be wise".to_string(),
            })
            .await;
        handle
            .send(RoomCommand::Direct {
                from: SessionId::new("aaa"),
                to: bot_id,
                text: "q2".to_string(),
            })
            .await;
        recv_until(&mut a, |m| matches!(m, ServerMessage::PrivateMessage { .. })).await;

        assert_eq!(
            chat.seen(),
            vec![
                ("room default".to_string(), "q1".to_string()),
                ("be wise".to_string(), "q2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn slow_delegate_call_does_not_block_other_traffic() {
        let gate = Arc::new(Notify::new());
        let chat = StubChat::gated("delayed reply", gate.clone());
        let handle = spawn_room(vec![record(1, "Bot", Some("p"))], chat.clone());

        let mut a = join(&handle, "aaa").await;
        let bot_id = find_session_id(&mut a, "Bot").await;
        let _b = join(&handle, "bbb").await;

        handle
            .send(RoomCommand::Direct {
                from: SessionId::new("aaa"),
                to: bot_id.clone(),
                text: "hi".to_string(),
            })
            .await;
        handle
            .send(RoomCommand::Chat {
                session_id: SessionId::new("bbb"),
                text: "while waiting".to_string(),
            })
            .await;

        // Chat lands while the delegate call is still parked on the gate.
        let msg = recv_until(&mut a, |m| {
            matches!(m, ServerMessage::ChatMessage { .. } | ServerMessage::PrivateMessage { .. })
        })
        .await;
        assert!(matches!(
            msg,
            ServerMessage::ChatMessage { text, .. } if text == "while waiting"
        ));

        gate.notify_one();
        let msg = recv_until(&mut a, |m| matches!(m, ServerMessage::PrivateMessage { .. })).await;
        assert!(matches!(
            msg,
            ServerMessage::PrivateMessage { ref user, ref text }
                if *user == bot_id && text == "delayed reply"
        ));
    }

    #[tokio::test]
    async fn reply_for_departed_requester_is_dropped() {
        let gate = Arc::new(Notify::new());
        let chat = StubChat::gated("too late", gate.clone());
        let handle = spawn_room(vec![record(1, "Bot", Some("p"))], chat.clone());

        let mut a = join(&handle, "aaa").await;
        let bot_id = find_session_id(&mut a, "Bot").await;
        let mut b = join(&handle, "bbb").await;

        handle
            .send(RoomCommand::Direct {
                from: SessionId::new("aaa"),
                to: bot_id,
                text: "hi".to_string(),
            })
            .await;
        handle
            .send(RoomCommand::Leave {
                session_id: SessionId::new("aaa"),
                consented: false,
            })
            .await;
        gate.notify_one();

        // The reply has nowhere to go; the room keeps serving everyone else.
        handle
            .send(RoomCommand::Chat {
                session_id: SessionId::new("bbb"),
                text: "probe".to_string(),
            })
            .await;
        let msg = recv_until(&mut b, |m| {
            matches!(m, ServerMessage::ChatMessage { .. } | ServerMessage::PrivateMessage { .. })
        })
        .await;
        assert!(matches!(msg, ServerMessage::ChatMessage { .. }));
        assert_eq!(chat.calls(), 1);
    }

    #[tokio::test]
    async fn move_overwrites_position_unconditionally() {
        let handle = spawn_room(vec![], StubChat::replying("ok"));
        let mut a = join(&handle, "aaa").await;
        wait_for_player_list(&mut a, &["aaa"]).await;

        for _ in 0..2 {
            handle
                .send(RoomCommand::Move {
                    session_id: SessionId::new("aaa"),
                    x: -42.5,
                    y: 9000.25,
                })
                .await;
            let msg = recv_until(&mut a, |m| {
                matches!(
                    m,
                    ServerMessage::StateSync { participants }
                        if participants.iter().any(|p| p.session_id == "aaa" && p.x == -42.5)
                )
            })
            .await;
            if let ServerMessage::StateSync { participants } = msg {
                let p = participants.iter().find(|p| p.session_id == "aaa").unwrap();
                assert_eq!((p.x, p.y), (-42.5, 9000.25));
            }
        }
    }

    #[tokio::test]
    async fn room_disposes_when_last_client_leaves() {
        let handle = spawn_room(vec![record(1, "Bot", None)], StubChat::replying("ok"));
        let _ = join(&handle, "aaa").await;

        handle
            .send(RoomCommand::Leave {
                session_id: SessionId::new("aaa"),
                consented: true,
            })
            .await;

        for _ in 0..100 {
            if handle.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("room did not dispose after last client left");
    }
}
