//! Single-use approval tokens for out-of-band approval links.
//!
//! The secret is 256 bits from the OS RNG, hex-encoded for the link. Only its
//! SHA-256 digest is persisted. Verification never mutates; consumption happens
//! inside the workflow transaction that performs the authorized transition.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::booking::{BookingId, ResourceKind};
use crate::domain::token::{ApprovalToken, TokenId};
use crate::domain::user::ApproverRef;
use crate::workflow::stages::Stage;
use crate::workflow::store::{StoreError, WorkflowTransaction};

const SECRET_BYTES: usize = 32;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("approval token not found")]
    NotFound,
    #[error("approval token already used")]
    AlreadyUsed,
    #[error("approval token expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TokenError {
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound => "Token tidak valid".to_string(),
            Self::AlreadyUsed => "Token sudah digunakan".to_string(),
            Self::Expired => "Token sudah kedaluwarsa".to_string(),
            Self::Store(_) => "Terjadi kesalahan internal".to_string(),
        }
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_token(&self, token: &ApprovalToken) -> Result<(), StoreError>;

    async fn find_token(
        &self,
        booking_id: &BookingId,
        secret_digest: &str,
    ) -> Result<Option<ApprovalToken>, StoreError>;
}

/// A freshly issued token. `secret` goes into the link and is never stored.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub secret: String,
    pub token: ApprovalToken,
}

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn TokenStore>,
    ttl: Duration,
}

impl TokenService {
    pub fn new(store: Arc<dyn TokenStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn issue(
        &self,
        booking_id: &BookingId,
        resource_kind: ResourceKind,
        stage: Stage,
        approver: Option<ApproverRef>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let secret = generate_secret();
        let token = ApprovalToken {
            id: TokenId::generate(),
            booking_id: booking_id.clone(),
            resource_kind,
            stage,
            approver,
            secret_digest: digest_secret(&secret),
            used: false,
            created_at: now,
            expires_at: now + self.ttl,
            used_at: None,
        };
        self.store.insert_token(&token).await?;

        tracing::debug!(
            event_name = "approval.token.issued",
            booking_id = %booking_id,
            stage = %stage,
            token_id = %token.id.0,
            "approval token issued"
        );
        Ok(IssuedToken { secret, token })
    }

    pub async fn verify(
        &self,
        booking_id: &BookingId,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalToken, TokenError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(TokenError::NotFound);
        }

        let token = self
            .store
            .find_token(booking_id, &digest_secret(secret))
            .await?
            .ok_or(TokenError::NotFound)?;

        if token.used {
            return Err(TokenError::AlreadyUsed);
        }
        if token.is_expired(now) {
            return Err(TokenError::Expired);
        }
        Ok(token)
    }

    /// Marks `token` used inside `tx`. Fails if another request consumed it first.
    pub async fn consume(
        &self,
        tx: &mut dyn WorkflowTransaction,
        token: &ApprovalToken,
        now: DateTime<Utc>,
    ) -> Result<(), TokenError> {
        if tx.consume_token(&token.id, now).await? {
            Ok(())
        } else {
            Err(TokenError::AlreadyUsed)
        }
    }
}

pub fn generate_secret() -> String {
    let mut bytes = [0_u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn digest_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}
