//! In-memory stores
//!
//! Process-local implementations of [`TokenStore`], [`ActivityLog`] and
//! [`UserDirectory`]. Used when no `DATABASE_URL` is configured and by the
//! engine tests. Data is lost on restart.
//!
//! The token table sits behind one async mutex so that `mark_used`,
//! `revoke_family` and `create_if_absent` are each atomic, matching the
//! transactional guarantees of the PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::db::models::{
    ActivityField, NewRefreshToken, NewTokenActivity, RefreshTokenRecord, TokenActivityRecord,
    User,
};
use crate::core::db::repositories::activity::{ActivityLog, ActivityLogError};
use crate::core::db::repositories::refresh_token::{StoreError, TokenStore, hash_token};
use crate::core::db::repositories::user::{UserDirectory, UserRepositoryError, hash_password};

// ============================================================================
// Token Store
// ============================================================================

#[derive(Default)]
struct TokenTable {
    records: HashMap<Uuid, RefreshTokenRecord>,
    by_hash: HashMap<String, Uuid>,
    revoked_families: HashSet<Uuid>,
}

/// In-memory refresh token store
#[derive(Default)]
pub struct MemoryTokenStore {
    table: Mutex<TokenTable>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.table.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn create_if_absent(
        &self,
        new: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let token_hash = hash_token(&new.token);
        let mut table = self.table.lock().await;

        if table.by_hash.contains_key(&token_hash) {
            return Err(StoreError::Collision);
        }

        let burned = table.revoked_families.contains(&new.family);
        let now = Utc::now();
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            token_hash: token_hash.clone(),
            user_id: new.user_id,
            family: new.family,
            device_fingerprint: new.device_fingerprint,
            ip_address: new.ip_address,
            user_agent: new.user_agent,
            is_used: burned,
            is_revoked: burned,
            expires_at: new.expires_at,
            created_at: now,
            updated_at: now,
        };

        table.by_hash.insert(token_hash, record.id);
        table.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let table = self.table.lock().await;
        let record = table
            .by_hash
            .get(&hash_token(token))
            .and_then(|id| table.records.get(id))
            .cloned();

        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.table.lock().await.records.get(&id).cloned())
    }

    async fn find_by_family(
        &self,
        family: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let table = self.table.lock().await;
        let mut records: Vec<RefreshTokenRecord> = table
            .records
            .values()
            .filter(|r| r.family == family)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);

        Ok(records)
    }

    async fn mark_used(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut table = self.table.lock().await;
        match table.records.get_mut(&id) {
            Some(record) if record.is_live() => {
                record.is_used = true;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_family(&self, family: Uuid) -> Result<u64, StoreError> {
        let mut table = self.table.lock().await;
        table.revoked_families.insert(family);

        let now = Utc::now();
        let mut changed = 0;
        for record in table
            .records
            .values_mut()
            .filter(|r| r.family == family && !r.is_revoked)
        {
            record.is_revoked = true;
            record.is_used = true;
            record.updated_at = now;
            changed += 1;
        }

        Ok(changed)
    }

    async fn active_families(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let table = self.table.lock().await;
        let families: HashSet<Uuid> = table
            .records
            .values()
            .filter(|r| r.user_id == user_id && r.is_live() && !r.is_expired_at(now))
            .map(|r| r.family)
            .collect();

        Ok(families.into_iter().collect())
    }
}

// ============================================================================
// Activity Log
// ============================================================================

/// In-memory activity log, sharded per token id
#[derive(Default)]
pub struct MemoryActivityLog {
    events: DashMap<Uuid, Vec<TokenActivityRecord>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event with an explicit timestamp
    pub fn record_at(&self, event: NewTokenActivity, created_at: DateTime<Utc>) {
        let record = TokenActivityRecord {
            id: Uuid::new_v4(),
            refresh_token_id: event.refresh_token_id,
            activity: event.activity,
            ip_address: event.ip_address,
            user_agent: event.user_agent,
            created_at,
        };
        self.events
            .entry(record.refresh_token_id)
            .or_default()
            .push(record);
    }
}

#[async_trait]
impl ActivityLog for MemoryActivityLog {
    async fn record(&self, event: NewTokenActivity) -> Result<(), ActivityLogError> {
        self.record_at(event, Utc::now());
        Ok(())
    }

    async fn count_recent(
        &self,
        token_id: Uuid,
        window: Duration,
    ) -> Result<u64, ActivityLogError> {
        let since = Utc::now() - window;
        let count = self
            .events
            .get(&token_id)
            .map(|events| events.iter().filter(|e| e.created_at >= since).count())
            .unwrap_or(0);

        Ok(count as u64)
    }

    async fn count_distinct(
        &self,
        token_id: Uuid,
        field: ActivityField,
    ) -> Result<u64, ActivityLogError> {
        let count = self
            .events
            .get(&token_id)
            .map(|events| {
                events
                    .iter()
                    .map(|e| field.value_of(e))
                    .collect::<HashSet<_>>()
                    .len()
            })
            .unwrap_or(0);

        Ok(count as u64)
    }

    async fn list_for_token(
        &self,
        token_id: Uuid,
    ) -> Result<Vec<TokenActivityRecord>, ActivityLogError> {
        let mut events = self
            .events
            .get(&token_id)
            .map(|events| events.clone())
            .unwrap_or_default();
        events.sort_by_key(|e| e.created_at);

        Ok(events)
    }
}

// ============================================================================
// User Directory
// ============================================================================

/// In-memory user directory keyed by email
pub struct MemoryUserDirectory {
    users: DashMap<String, User>,
    bcrypt_cost: u32,
}

impl MemoryUserDirectory {
    pub fn new(bcrypt_cost: u32) -> Self {
        Self {
            users: DashMap::new(),
            bcrypt_cost,
        }
    }
}

impl Default for MemoryUserDirectory {
    fn default() -> Self {
        Self::new(crate::core::db::repositories::user::BCRYPT_COST)
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError> {
        Ok(self.users.get(email).map(|u| u.clone()))
    }

    async fn create(
        &self,
        email: &str,
        password: &str,
        user_name: &str,
    ) -> Result<User, UserRepositoryError> {
        let password_hash = hash_password(password, self.bcrypt_cost)?;
        let now = Utc::now();

        match self.users.entry(email.to_string()) {
            Entry::Occupied(_) => Err(UserRepositoryError::EmailAlreadyExists),
            Entry::Vacant(slot) => {
                let user = User {
                    id: Uuid::new_v4(),
                    email: email.to_string(),
                    password_hash,
                    user_name: user_name.to_string(),
                    created_at: now,
                    updated_at: now,
                };
                slot.insert(user.clone());
                Ok(user)
            }
        }
    }
}
