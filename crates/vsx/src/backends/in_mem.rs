//! # Previously, on vsx...
//!
//! 🎬 The slots were homeless. Parsed, validated, merged, and then... nowhere
//! to go. Someone had to give them a roof. Someone had to be a HashMap.
//!
//! `in_mem` is the RAM-only [`EntityRepository`]. Everything is gone the moment
//! the process exits, which makes it perfect for tests and local runs and
//! exactly wrong for production.
//!
//! 🔒 State sits behind `Arc<tokio::sync::Mutex<...>>` so the repository can be
//! cloned into the pipeline while a test keeps a handle to peek inside.
//!
//! 🦆

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backends::EntityRepository;
use crate::common::ExternalId;
use crate::entities::{EntityId, Schedule, ScheduleFields, Slot, SlotFields};
use crate::errors::StoreError;

#[derive(Debug, Default)]
struct State {
    schedules: HashMap<ExternalId, Schedule>,
    slots: HashMap<ExternalId, Slot>,
    /// 🔢 Shared id sequence for both tables. Ids are never reused.
    next_id: u64,
}

impl State {
    fn allocate_id(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId(self.next_id)
    }
}

/// 📦 A repository that never forgets (until the process does).
#[derive(Debug, Default, Clone)]
pub struct InMemoryRepository {
    state: Arc<Mutex<State>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔍 Every stored slot, sorted by id. Handy for assertions.
    pub async fn slots(&self) -> Vec<Slot> {
        let state = self.state.lock().await;
        let mut slots: Vec<Slot> = state.slots.values().cloned().collect();
        slots.sort_by_key(|slot| slot.id);
        slots
    }

    pub async fn schedules(&self) -> Vec<Schedule> {
        let state = self.state.lock().await;
        let mut schedules: Vec<Schedule> = state.schedules.values().cloned().collect();
        schedules.sort_by_key(|schedule| schedule.id);
        schedules
    }
}

#[async_trait]
impl EntityRepository for InMemoryRepository {
    async fn find_schedule_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Schedule>, StoreError> {
        Ok(self.state.lock().await.schedules.get(external_id).cloned())
    }

    async fn insert_schedule(
        &self,
        external_id: ExternalId,
        fields: ScheduleFields,
    ) -> Result<Schedule, StoreError> {
        let mut state = self.state.lock().await;
        if state.schedules.contains_key(&external_id) {
            return Err(StoreError::Transient(format!(
                "schedule {external_id} already exists"
            )));
        }
        let schedule = Schedule {
            id: state.allocate_id(),
            external_id: external_id.clone(),
            fields,
        };
        state.schedules.insert(external_id, schedule.clone());
        Ok(schedule)
    }

    async fn save_schedule(&self, schedule: Schedule) -> Result<Schedule, StoreError> {
        let mut state = self.state.lock().await;
        match state.schedules.get_mut(&schedule.external_id) {
            Some(stored) if stored.id == schedule.id => {
                *stored = schedule.clone();
                Ok(schedule)
            }
            _ => Err(StoreError::Transient(format!(
                "schedule {} ({}) is not stored",
                schedule.id, schedule.external_id
            ))),
        }
    }

    async fn find_slot_by_external_id(
        &self,
        external_id: &ExternalId,
    ) -> Result<Option<Slot>, StoreError> {
        Ok(self.state.lock().await.slots.get(external_id).cloned())
    }

    async fn insert_slot(
        &self,
        external_id: ExternalId,
        schedule_id: EntityId,
        fields: SlotFields,
    ) -> Result<Slot, StoreError> {
        let mut state = self.state.lock().await;
        if state.slots.contains_key(&external_id) {
            return Err(StoreError::Transient(format!(
                "slot {external_id} already exists"
            )));
        }
        let slot = Slot {
            id: state.allocate_id(),
            external_id: external_id.clone(),
            schedule_id,
            fields,
        };
        state.slots.insert(external_id, slot.clone());
        Ok(slot)
    }

    async fn save_slot(&self, slot: Slot) -> Result<Slot, StoreError> {
        let mut state = self.state.lock().await;
        match state.slots.get_mut(&slot.external_id) {
            Some(stored) if stored.id == slot.id => {
                *stored = slot.clone();
                Ok(slot)
            }
            _ => Err(StoreError::Transient(format!(
                "slot {} ({}) is not stored",
                slot.id, slot.external_id
            ))),
        }
    }

    async fn count_slots(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().await.slots.len())
    }

    async fn count_schedules(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().await.schedules.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_clones_share_the_same_shelves() {
        let repo = InMemoryRepository::new();
        let peeking_handle = repo.clone();

        repo.insert_schedule(ExternalId::original("7"), ScheduleFields::default())
            .await
            .expect("💀 insert should work on an empty store");

        assert_eq!(peeking_handle.count_schedules().await, Ok(1));
    }

    #[tokio::test]
    async fn the_one_where_the_same_identity_cannot_move_in_twice() {
        let repo = InMemoryRepository::new();
        let schedule = repo
            .insert_schedule(ExternalId::original("7"), ScheduleFields::default())
            .await
            .expect("💀 first insert should work");
        repo.insert_slot(ExternalId::original("a"), schedule.id, SlotFields::default())
            .await
            .expect("💀 first slot insert should work");

        let again = repo
            .insert_slot(ExternalId::original("a"), schedule.id, SlotFields::default())
            .await;

        assert!(matches!(again, Err(StoreError::Transient(_))));
        assert_eq!(repo.count_slots().await, Ok(1));
    }

    #[tokio::test]
    async fn the_one_where_save_only_updates_what_exists() {
        let repo = InMemoryRepository::new();
        let schedule = repo
            .insert_schedule(ExternalId::original("7"), ScheduleFields::default())
            .await
            .expect("💀 insert should work");
        let mut slot = repo
            .insert_slot(ExternalId::original("a"), schedule.id, SlotFields::default())
            .await
            .expect("💀 insert should work");

        slot.fields.status = Some("busy".into());
        repo.save_slot(slot.clone()).await.expect("💀 save should work");
        let stored = repo
            .find_slot_by_external_id(&ExternalId::original("a"))
            .await
            .expect("💀 find should work");
        assert_eq!(stored, Some(slot));

        let ghost = Slot {
            id: EntityId(999),
            external_id: ExternalId::original("ghost"),
            schedule_id: schedule.id,
            fields: SlotFields::default(),
        };
        assert!(repo.save_slot(ghost).await.is_err());
    }
}
