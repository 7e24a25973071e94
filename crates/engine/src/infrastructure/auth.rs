//! Token verification adapters.
//!
//! Token issuance is external; the engine only hands tokens to a verifier
//! and acts on the result. Deployments without a verifier admit tokenless
//! guests, which is the development posture.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::infrastructure::ports::{AuthClaims, AuthError, AuthPort};

/// Verifies tokens against an external HTTP verifier.
pub struct HttpAuthVerifier {
    client: Client,
    verify_url: String,
}

impl HttpAuthVerifier {
    pub fn new(verify_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            verify_url: verify_url.to_string(),
        }
    }
}

#[async_trait]
impl AuthPort for HttpAuthVerifier {
    async fn verify(&self, token: Option<&str>) -> Result<AuthClaims, AuthError> {
        let Some(token) = token else {
            return Err(AuthError::Rejected);
        };

        let response = self
            .client
            .post(&self.verify_url)
            .json(&VerifyRequest { token })
            .send()
            .await
            .map_err(|e| AuthError::Verifier(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::Rejected),
            status if status.is_success() => {
                let claims: VerifyResponse = response
                    .json()
                    .await
                    .map_err(|e| AuthError::Verifier(e.to_string()))?;
                Ok(AuthClaims {
                    username: claims.username,
                })
            }
            status => Err(AuthError::Verifier(format!(
                "verifier returned {status}"
            ))),
        }
    }
}

/// Admits every connection with no username claim. Used when no verifier is
/// configured.
pub struct GuestVerifier;

#[async_trait]
impl AuthPort for GuestVerifier {
    async fn verify(&self, _token: Option<&str>) -> Result<AuthClaims, AuthError> {
        Ok(AuthClaims::default())
    }
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    username: Option<String>,
}
