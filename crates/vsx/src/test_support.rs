//! 🧪 Test doubles shared across module tests.
//!
//! [`FailingRepository`] wraps a real [`InMemoryRepository`] and sabotages
//! every slot write. Schedule traffic passes through so tests can still seed
//! parents.

use async_trait::async_trait;

use crate::backends::{EntityRepository, InMemoryRepository};
use crate::common::ExternalId;
use crate::entities::{EntityId, Schedule, ScheduleFields, Slot, SlotFields};
use crate::errors::StoreError;

#[derive(Debug, Clone)]
enum Sabotage {
    Fail(StoreError),
    Panic,
}

#[derive(Debug, Clone)]
pub(crate) struct FailingRepository {
    inner: InMemoryRepository,
    sabotage: Sabotage,
}

impl FailingRepository {
    pub(crate) fn new(inner: InMemoryRepository, error: StoreError) -> Self {
        Self {
            inner,
            sabotage: Sabotage::Fail(error),
        }
    }

    /// 💣 Slot writes panic instead of failing. For testing what happens to
    /// the task that was holding the pen.
    pub(crate) fn panicking(inner: InMemoryRepository) -> Self {
        Self {
            inner,
            sabotage: Sabotage::Panic,
        }
    }

    fn sabotage(&self) -> StoreError {
        match &self.sabotage {
            Sabotage::Fail(error) => error.clone(),
            Sabotage::Panic => panic!("💣 repository exploded on a slot write"),
        }
    }
}

#[async_trait]
impl EntityRepository for FailingRepository {
    async fn find_schedule_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Schedule>, StoreError> {
        self.inner.find_schedule_by_external_id(external_id).await
    }

    async fn insert_schedule(
        &self,
        external_id: ExternalId,
        fields: ScheduleFields,
    ) -> Result<Schedule, StoreError> {
        self.inner.insert_schedule(external_id, fields).await
    }

    async fn save_schedule(&self, schedule: Schedule) -> Result<Schedule, StoreError> {
        self.inner.save_schedule(schedule).await
    }

    async fn find_slot_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Slot>, StoreError> {
        self.inner.find_slot_by_external_id(external_id).await
    }

    async fn insert_slot(
        &self,
        _external_id: ExternalId,
        _schedule_id: EntityId,
        _fields: SlotFields,
    ) -> Result<Slot, StoreError> {
        Err(self.sabotage())
    }

    async fn save_slot(&self, _slot: Slot) -> Result<Slot, StoreError> {
        Err(self.sabotage())
    }

    async fn count_slots(&self) -> Result<usize, StoreError> {
        self.inner.count_slots().await
    }

    async fn count_schedules(&self) -> Result<usize, StoreError> {
        self.inner.count_schedules().await
    }
}
