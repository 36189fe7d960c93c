//! One-time code gate
//!
//! Generates, stores and verifies the short-lived numeric codes that gate
//! delivery confirmation and pickup collection. Records live in a process
//! local TTL map behind an async `RwLock`; the lock only ever guards map
//! access, never I/O. One live code per subject: issuing a new code for a
//! subject invalidates any prior unconsumed one.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ServiceError;

/// How a record is keyed: a fresh opaque session id (delivery flow) or the
/// subject id itself (pickup flow).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtpKeying {
    Session,
    Subject,
}

#[derive(Clone, Debug)]
struct OtpRecord {
    code: String,
    subject_id: String,
    requester_id: String,
    expires_at: DateTime<Utc>,
}

/// Handed back to the caller on issue. The code is here so the caller can
/// dispatch it over the out-of-band channel; it must never appear in an API
/// response.
#[derive(Clone, Debug)]
pub struct IssuedOtp {
    pub key: String,
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OtpError {
    #[error("code expired or not issued")]
    Expired,
    #[error("code mismatch")]
    Mismatch,
    #[error("code was requested by a different actor")]
    WrongRequester,
}

impl From<OtpError> for ServiceError {
    fn from(e: OtpError) -> Self {
        match e {
            OtpError::Expired => ServiceError::OtpExpired,
            OtpError::Mismatch => ServiceError::OtpMismatch,
            OtpError::WrongRequester => {
                ServiceError::Forbidden("code was requested by a different actor".to_string())
            }
        }
    }
}

#[derive(Default)]
pub struct OtpGate {
    records: RwLock<HashMap<String, OtpRecord>>,
}

impl OtpGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn issue(
        &self,
        subject_id: &str,
        requester_id: &str,
        ttl: Duration,
        keying: OtpKeying,
    ) -> IssuedOtp {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let key = match keying {
            OtpKeying::Session => Uuid::new_v4().to_string(),
            OtpKeying::Subject => subject_id.to_string(),
        };
        let code = format!("{:04}", rand::thread_rng().gen_range(0..10_000u32));
        let record = OtpRecord {
            code: code.clone(),
            subject_id: subject_id.to_string(),
            requester_id: requester_id.to_string(),
            expires_at,
        };

        let mut records = self.records.write().await;
        // Single-writer rule: drop any earlier code for this subject.
        records.retain(|_, r| r.subject_id != subject_id);
        records.insert(key.clone(), record);

        IssuedOtp {
            key,
            code,
            issued_at: now,
            expires_at,
        }
    }

    /// Verify and consume. A code verifies at most once; a mismatch or a
    /// wrong requester leaves the record in place until its TTL lapses.
    pub async fn verify(
        &self,
        key: &str,
        code: &str,
        requester_id: &str,
        require_same_requester: bool,
    ) -> Result<(), OtpError> {
        self.verify_at(key, code, requester_id, require_same_requester, Utc::now())
            .await
    }

    async fn verify_at(
        &self,
        key: &str,
        code: &str,
        requester_id: &str,
        require_same_requester: bool,
        now: DateTime<Utc>,
    ) -> Result<(), OtpError> {
        let mut records = self.records.write().await;
        let record = records.get(key).ok_or(OtpError::Expired)?;
        if now > record.expires_at {
            records.remove(key);
            return Err(OtpError::Expired);
        }
        if record.code != code {
            return Err(OtpError::Mismatch);
        }
        if require_same_requester && record.requester_id != requester_id {
            return Err(OtpError::WrongRequester);
        }
        records.remove(key);
        Ok(())
    }

    /// Drop lapsed records. Called opportunistically; correctness does not
    /// depend on it since `verify` checks expiry itself.
    pub async fn purge_expired(&self) {
        let now = Utc::now();
        self.records.write().await.retain(|_, r| r.expires_at >= now);
    }

    #[cfg(test)]
    async fn live_records(&self) -> usize {
        self.records.read().await.len()
    }
}
