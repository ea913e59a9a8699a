//! Profile Module
//!
//! Resolves who is calling and what they may see. Profiles and session
//! identities are cached with their own short TTL, independent of the data
//! cache, so role changes take effect within a bounded delay.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::DataError;
use crate::remote::{ProfileRow, RemoteStore, RetryPolicy};

// == Caller ==
/// An authenticated caller: stable identity plus the token used to act on
/// their behalf against the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Caller {
    pub id: String,
    pub access_token: Option<String>,
}

impl Caller {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            access_token: None,
        }
    }

    pub fn with_token(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            access_token: Some(token.into()),
        }
    }
}

// == Role ==
/// Authorization scope of a caller. Closed: every query shape matches on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", content = "id", rename_all = "camelCase")]
pub enum Role {
    /// Sees every section and team
    Unscoped,
    /// Sees one section
    SectionScoped(String),
    /// Sees one team
    TeamScoped(String),
}

// == Profile Record ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileRecord {
    pub role: Role,
    pub section_id: Option<String>,
    pub team_id: Option<String>,
    pub active: bool,
}

impl ProfileRecord {
    /// Maps a backend row onto a closed role.
    ///
    /// `gestor_pop` is unscoped, `gerente_secao` and `ba_ce` are
    /// section-scoped, `ba_op` is team-scoped. A scoped role missing its id,
    /// or an unknown role, is refused rather than left unfiltered.
    pub fn from_row(row: ProfileRow) -> Result<Self, DataError> {
        let role = match row.role.as_str() {
            "gestor_pop" => Role::Unscoped,
            "gerente_secao" | "ba_ce" => Role::SectionScoped(row.section_id.clone().ok_or_else(
                || DataError::PermissionDenied(format!("role '{}' has no section", row.role)),
            )?),
            "ba_op" => Role::TeamScoped(row.team_id.clone().ok_or_else(|| {
                DataError::PermissionDenied(format!("role '{}' has no team", row.role))
            })?),
            other => {
                return Err(DataError::PermissionDenied(format!(
                    "unrecognized role '{other}'"
                )))
            }
        };

        Ok(Self {
            role,
            section_id: row.section_id,
            team_id: row.team_id,
            active: row.active,
        })
    }
}

struct Timed<T> {
    value: T,
    resolved_at: i64,
}

// == Profile Resolver ==
pub struct ProfileResolver {
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    retry: RetryPolicy,
    /// caller id -> profile
    profiles: Mutex<HashMap<String, Timed<ProfileRecord>>>,
    /// token digest -> caller id
    sessions: Mutex<HashMap<String, Timed<String>>>,
}

impl ProfileResolver {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            remote,
            clock,
            ttl,
            retry,
            profiles: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn is_live(&self, resolved_at: i64) -> bool {
        self.clock.now_ms().saturating_sub(resolved_at) < self.ttl.as_millis() as i64
    }

    // == Identify ==
    /// Turns an access token into a [`Caller`], caching the mapping.
    ///
    /// Fails with [`DataError::AuthExpired`] if the backend rejects the token.
    pub async fn identify(&self, access_token: &str) -> Result<Caller, DataError> {
        let digest = hex::encode(Sha256::digest(access_token.as_bytes()));

        {
            let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
            match sessions.get(&digest) {
                Some(hit) if self.is_live(hit.resolved_at) => {
                    return Ok(Caller::with_token(hit.value.clone(), access_token));
                }
                Some(_) => {
                    sessions.remove(&digest);
                }
                None => {}
            }
        }

        let remote = Arc::clone(&self.remote);
        let id = self
            .retry
            .run("identify", || {
                let remote = Arc::clone(&remote);
                let token = access_token.to_string();
                async move { remote.identify(&token).await }
            })
            .await?;

        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions.insert(
            digest,
            Timed {
                value: id.clone(),
                resolved_at: self.clock.now_ms(),
            },
        );
        Ok(Caller::with_token(id, access_token))
    }

    // == Resolve Profile ==
    /// Returns the caller's profile, from cache while within the TTL.
    ///
    /// Fails with [`DataError::AuthExpired`] for an invalid session and
    /// [`DataError::ProfileInactive`] for a missing or inactive profile.
    /// Failures are not cached.
    pub async fn resolve_profile(&self, caller: &Caller) -> Result<ProfileRecord, DataError> {
        {
            let mut profiles = self.profiles.lock().unwrap_or_else(|p| p.into_inner());
            match profiles.get(&caller.id) {
                Some(hit) if self.is_live(hit.resolved_at) => {
                    debug!("Profile cache hit for {}", caller.id);
                    return Ok(hit.value.clone());
                }
                Some(_) => {
                    profiles.remove(&caller.id);
                }
                None => {}
            }
        }

        let remote = Arc::clone(&self.remote);
        let row = self
            .retry
            .run("profile lookup", || {
                let remote = Arc::clone(&remote);
                let caller = caller.clone();
                async move { remote.fetch_profile(&caller).await }
            })
            .await?;

        let Some(row) = row else {
            warn!("No profile found for {}", caller.id);
            return Err(DataError::ProfileInactive);
        };
        if !row.active {
            warn!("Profile for {} is inactive", caller.id);
            return Err(DataError::ProfileInactive);
        }
        let profile = ProfileRecord::from_row(row)?;

        info!("Resolved profile for {}: {:?}", caller.id, profile.role);
        let mut profiles = self.profiles.lock().unwrap_or_else(|p| p.into_inner());
        profiles.insert(
            caller.id.clone(),
            Timed {
                value: profile.clone(),
                resolved_at: self.clock.now_ms(),
            },
        );
        Ok(profile)
    }

    // == Invalidate ==
    /// Forgets one caller's profile and sessions.
    pub fn invalidate(&self, caller_id: &str) {
        self.profiles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(caller_id);
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|_, session| session.value != caller_id);
    }

    /// Forgets every profile and session.
    pub fn clear(&self) {
        self.profiles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    // == Purge Expired ==
    /// Drops profiles and sessions older than the TTL. Returns how many
    /// were removed.
    pub fn purge_expired(&self) -> usize {
        let mut profiles = self.profiles.lock().unwrap_or_else(|p| p.into_inner());
        let before = profiles.len();
        profiles.retain(|_, hit| self.is_live(hit.resolved_at));
        let mut removed = before - profiles.len();
        drop(profiles);

        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let before = sessions.len();
        sessions.retain(|_, hit| self.is_live(hit.resolved_at));
        removed += before - sessions.len();
        removed
    }

    /// Number of cached profiles, live or not.
    pub fn cached_profiles(&self) -> usize {
        self.profiles
            .lock()
            .map(|profiles| profiles.len())
            .unwrap_or(0)
    }

    /// Number of cached token mappings, live or not.
    pub fn cached_sessions(&self) -> usize {
        self.sessions
            .lock()
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }
}
