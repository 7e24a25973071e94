//! Port traits for infrastructure boundaries.
//!
//! These are the only abstractions in the engine. Ports exist for:
//! - the generation endpoint (could swap OpenAI -> Ollama/Claude)
//! - the roster store (could swap the REST adapter for a push feed)
//! - token verification (external service, or guest mode)

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use plaza_domain::{RosterEvent, RosterRecord};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    /// The endpoint rejected the request for rate. Retryable.
    #[error("Generation endpoint rate limited the request")]
    RateLimited,
    /// Anything else: transport failure, non-429 status, bad payload.
    #[error("Generation request failed: {0}")]
    Upstream(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("Roster request failed: {0}")]
    Request(String),
    #[error("Invalid roster payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication rejected")]
    Rejected,
    #[error("Verifier request failed: {0}")]
    Verifier(String),
}

// =============================================================================
// Generation endpoint
// =============================================================================

/// One turn against the generation endpoint.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub max_tokens: u32,
}

#[async_trait]
pub trait ChatModelPort: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, ChatError>;
}

// =============================================================================
// Roster store
// =============================================================================

/// A live change-feed subscription. Dropping the feed aborts whatever task
/// produces its events, so a disposed room can never be called back.
pub struct RosterFeed {
    events: mpsc::Receiver<RosterEvent>,
    _guard: FeedGuard,
}

impl RosterFeed {
    pub fn new(events: mpsc::Receiver<RosterEvent>, guard: FeedGuard) -> Self {
        Self {
            events,
            _guard: guard,
        }
    }

    /// A feed that never yields. Used when no roster store is configured.
    pub fn empty() -> Self {
        let (_tx, rx) = mpsc::channel(1);
        Self {
            events: rx,
            _guard: FeedGuard::noop(),
        }
    }

    pub async fn recv(&mut self) -> Option<RosterEvent> {
        self.events.recv().await
    }
}

/// Aborts the feed's producing task when dropped.
pub struct FeedGuard(Option<JoinHandle<()>>);

impl FeedGuard {
    pub fn from_task(handle: JoinHandle<()>) -> Self {
        Self(Some(handle))
    }

    pub fn noop() -> Self {
        Self(None)
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

#[async_trait]
pub trait RosterStorePort: Send + Sync {
    /// Full fetch of the current record set.
    async fn list_all(&self) -> Result<Vec<RosterRecord>, RosterError>;

    /// Subscribe to record changes. Delivery is at-least-once and order is
    /// unspecified; consumers must tolerate duplicate inserts and events for
    /// unknown ids.
    async fn subscribe(&self) -> Result<RosterFeed, RosterError>;
}

/// Store adapter for deployments without a roster service: no records, and a
/// feed that never fires.
pub struct NoRosterStore;

#[async_trait]
impl RosterStorePort for NoRosterStore {
    async fn list_all(&self) -> Result<Vec<RosterRecord>, RosterError> {
        Ok(Vec::new())
    }

    async fn subscribe(&self) -> Result<RosterFeed, RosterError> {
        Ok(RosterFeed::empty())
    }
}

// =============================================================================
// Token verification
// =============================================================================

/// What a verified token says about the joining user.
#[derive(Debug, Clone, Default)]
pub struct AuthClaims {
    pub username: Option<String>,
}

#[async_trait]
pub trait AuthPort: Send + Sync {
    async fn verify(&self, token: Option<&str>) -> Result<AuthClaims, AuthError>;
}
