//! 🔌 Backends: where Schedules and Slots go to live.
//!
//! 🎭 The pipeline never touches storage directly. It talks to an
//! [`EntityRepository`], which knows four verbs (find, find, insert, save) and
//! keeps its opinions about transactions to itself. How those verbs hit a disk,
//! a database, or a HashMap is the backend's business.
//!
//! Today there is exactly one backend and it lives in RAM. Persistence
//! internals are somebody else's sprint.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::Deserialize;

use crate::common::ExternalId;
use crate::entities::{EntityId, Schedule, ScheduleFields, Slot, SlotFields};
use crate::errors::StoreError;

pub(crate) mod in_mem;

pub use in_mem::InMemoryRepository;

/// 🗄️ The persistence contract the merge store is written against.
///
/// # Contract
/// - `find_*` returns `Ok(None)` for an unknown identity, never an error.
/// - `insert_*` assigns the [`EntityId`]. Inserting an identity that already
///   exists is a `StoreError`, the caller is expected to look first.
/// - `save_*` overwrites the entity with the matching id.
/// - `StoreError::Unavailable` means "stop calling me", `Transient` means
///   "this one call failed".
#[async_trait]
pub trait EntityRepository: Debug + Send + Sync {
    async fn find_schedule_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Schedule>, StoreError>;

    async fn insert_schedule(
        &self,
        external_id: ExternalId,
        fields: ScheduleFields,
    ) -> Result<Schedule, StoreError>;

    async fn save_schedule(&self, schedule: Schedule) -> Result<Schedule, StoreError>;

    async fn find_slot_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Slot>, StoreError>;

    async fn insert_slot(
        &self,
        external_id: ExternalId,
        schedule_id: EntityId,
        fields: SlotFields,
    ) -> Result<Slot, StoreError>;

    async fn save_slot(&self, slot: Slot) -> Result<Slot, StoreError>;

    /// 🔢 How many slots exist. For reports and for tests with trust issues.
    async fn count_slots(&self) -> Result<usize, StoreError>;

    async fn count_schedules(&self) -> Result<usize, StoreError>;
}

/// 🔧 Which backend to stand up. Picked from config, like a universal remote
/// with exactly one button.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub enum StoreConfig {
    #[default]
    InMemory,
}

/// 🎭 The many faces of a repository. Dispatches to whichever concrete backend
/// the config asked for, so the supervisor stays blissfully ignorant.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    InMemory(InMemoryRepository),
}

impl StoreBackend {
    pub fn from_config(config: &StoreConfig) -> Self {
        match config {
            StoreConfig::InMemory => StoreBackend::InMemory(InMemoryRepository::new()),
        }
    }
}

#[async_trait]
impl EntityRepository for StoreBackend {
    async fn find_schedule_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Schedule>, StoreError> {
        match self {
            StoreBackend::InMemory(repo) => repo.find_schedule_by_external_id(external_id).await,
        }
    }

    async fn insert_schedule(
        &self,
        external_id: ExternalId,
        fields: ScheduleFields,
    ) -> Result<Schedule, StoreError> {
        match self {
            StoreBackend::InMemory(repo) => repo.insert_schedule(external_id, fields).await,
        }
    }

    async fn save_schedule(&self, schedule: Schedule) -> Result<Schedule, StoreError> {
        match self {
            StoreBackend::InMemory(repo) => repo.save_schedule(schedule).await,
        }
    }

    async fn find_slot_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Slot>, StoreError> {
        match self {
            StoreBackend::InMemory(repo) => repo.find_slot_by_external_id(external_id).await,
        }
    }

    async fn insert_slot(
        &self,
        external_id: ExternalId,
        schedule_id: EntityId,
        fields: SlotFields,
    ) -> Result<Slot, StoreError> {
        match self {
            StoreBackend::InMemory(repo) => {
                repo.insert_slot(external_id, schedule_id, fields).await
            }
        }
    }

    async fn save_slot(&self, slot: Slot) -> Result<Slot, StoreError> {
        match self {
            StoreBackend::InMemory(repo) => repo.save_slot(slot).await,
        }
    }

    async fn count_slots(&self) -> Result<usize, StoreError> {
        match self {
            StoreBackend::InMemory(repo) => repo.count_slots().await,
        }
    }

    async fn count_schedules(&self) -> Result<usize, StoreError> {
        match self {
            StoreBackend::InMemory(repo) => repo.count_schedules().await,
        }
    }
}
