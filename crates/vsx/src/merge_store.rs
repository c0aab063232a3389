//! 🔀 MergeStore: insert-or-merge, one identity at a time.
//!
//! 🎬 *[two refresh cycles reach for the same Slot at the same moment. the
//! store raises one hand. "one at a time," it says. they wait. nobody gets a
//! duplicate.]*
//!
//! ```text
//!   upsert(parent_key, record)
//!     ├─ parse record ─────────────── Invalid?       → UpsertError::Invalid
//!     ├─ find parent by external id ─ absent?        → UpsertError::ParentMissing
//!     └─ lock(child identity)
//!          ├─ find child ─ absent  → insert (linked to parent)
//!          └─────────────  present → merge fields, save
//! ```
//!
//! 🧠 Knowledge graph:
//! - Upserts to the same identity are serialized by an in-process lock keyed
//!   on (table, external id). Different identities never wait on each other.
//! - Overlapping fields from two racing records resolve last-write-wins: the
//!   second holder of the lock merges on top of the first.
//! - Redelivering the same record is a no-op on the stored fields.
//! - Store failures map onto `UpsertError::Storage` / `StoreUnavailable`.
//!
//! 🦆

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::backends::EntityRepository;
use crate::common::{ExternalId, RawRecord};
use crate::entities::{Schedule, ScheduleRecord, Slot, SlotRecord};
use crate::errors::UpsertError;

/// ✍️ What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Inserted,
    Merged,
}

/// 📦 The stored entity after the upsert, plus how it got there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted<T> {
    pub entity: T,
    pub action: UpsertAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Table {
    Schedule,
    Slot,
}

type IdentityLocks = HashMap<(Table, ExternalId), Arc<Mutex<()>>>;

/// 🗄️ The only door into storage for the pipeline. All mutation goes through here.
#[derive(Debug)]
pub struct MergeStore {
    repository: Arc<dyn EntityRepository>,
    identity_locks: Mutex<IdentityLocks>,
}

impl MergeStore {
    pub fn new(repository: Arc<dyn EntityRepository>) -> Self {
        Self {
            repository,
            identity_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn EntityRepository> {
        &self.repository
    }

    /// 🎟️ Insert or merge one Slot under the Schedule identified by `parent_key`.
    pub async fn upsert(
        &self,
        parent_key: &ExternalId,
        record: &RawRecord,
    ) -> Result<Upserted<Slot>, UpsertError> {
        let incoming = SlotRecord::try_from(record)?;

        let parent = self
            .repository
            .find_schedule_by_external_id(parent_key)
            .await?
            .ok_or_else(|| UpsertError::ParentMissing(parent_key.clone()))?;

        let key = (Table::Slot, incoming.external_id.clone());
        self.serialized(key, || self.insert_or_merge_slot(&parent, &incoming))
            .await
    }

    /// 🗓️ Insert or merge one Schedule. Schedules are parents, nothing to resolve.
    pub async fn upsert_schedule(
        &self,
        record: &RawRecord,
    ) -> Result<Upserted<Schedule>, UpsertError> {
        let incoming = ScheduleRecord::try_from(record)?;

        let key = (Table::Schedule, incoming.external_id.clone());
        self.serialized(key, || self.insert_or_merge_schedule(&incoming))
            .await
    }

    async fn insert_or_merge_slot(
        &self,
        parent: &Schedule,
        incoming: &SlotRecord,
    ) -> Result<Upserted<Slot>, UpsertError> {
        let existing = self
            .repository
            .find_slot_by_external_id(&incoming.external_id)
            .await?;

        match existing {
            None => {
                let slot = self
                    .repository
                    .insert_slot(
                        incoming.external_id.clone(),
                        parent.id,
                        incoming.fields.clone(),
                    )
                    .await?;
                debug!(record_id = %slot.external_id, slot = %slot.id, schedule = %parent.id, "🆕 inserted slot");
                Ok(Upserted {
                    entity: slot,
                    action: UpsertAction::Inserted,
                })
            }
            Some(existing) => {
                // 🔗 The newest record decides which schedule the slot hangs off.
                let merged = Slot {
                    fields: existing.fields.merge(&incoming.fields),
                    schedule_id: parent.id,
                    ..existing
                };
                let slot = self.repository.save_slot(merged).await?;
                debug!(record_id = %slot.external_id, slot = %slot.id, "🔀 merged slot");
                Ok(Upserted {
                    entity: slot,
                    action: UpsertAction::Merged,
                })
            }
        }
    }

    async fn insert_or_merge_schedule(
        &self,
        incoming: &ScheduleRecord,
    ) -> Result<Upserted<Schedule>, UpsertError> {
        let existing = self
            .repository
            .find_schedule_by_external_id(&incoming.external_id)
            .await?;

        match existing {
            None => {
                let schedule = self
                    .repository
                    .insert_schedule(incoming.external_id.clone(), incoming.fields.clone())
                    .await?;
                debug!(record_id = %schedule.external_id, schedule = %schedule.id, "🆕 inserted schedule");
                Ok(Upserted {
                    entity: schedule,
                    action: UpsertAction::Inserted,
                })
            }
            Some(existing) => {
                let merged = Schedule {
                    fields: existing.fields.merge(&incoming.fields),
                    ..existing
                };
                let schedule = self.repository.save_schedule(merged).await?;
                debug!(record_id = %schedule.external_id, schedule = %schedule.id, "🔀 merged schedule");
                Ok(Upserted {
                    entity: schedule,
                    action: UpsertAction::Merged,
                })
            }
        }
    }

    /// 🔒 Run `op` while holding the lock for `key`, then tidy the lock table.
    async fn serialized<T, F, Fut>(&self, key: (Table, ExternalId), op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let identity_lock = {
            let mut locks = self.identity_locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let result = {
            let _held = identity_lock.lock().await;
            op().await
        };

        // 🧹 Only the table and this task still hold it: nobody is waiting, drop the entry.
        let mut locks = self.identity_locks.lock().await;
        if Arc::strong_count(&identity_lock) == 2 {
            locks.remove(&key);
        }
        result
    }
}
