//! 🗓️ Entities: the Schedules and Slots that actually end up in the store.
//!
//! 🎬 *[a Slot walks into a store. the bouncer asks for its Schedule. the Slot
//! pats its pockets. "it's in the other file," it says. it is not let in.]*
//!
//! Two halves live here:
//! - the persisted shapes ([`Schedule`], [`Slot`]) and their business fields,
//! - the pure merge rules and the FHIR-to-fields parsing that feeds them.
//!
//! 🧠 Knowledge graph:
//! - Merge is field-level: an incoming value that is present and non-empty
//!   overwrites, anything absent or blank leaves the stored value alone.
//! - Merging the same record twice yields the same fields. Idempotence is the
//!   whole reason redelivery is safe.
//! - Parsing failures are `UpsertError::Invalid`, which is record-scoped.
//!
//! 🦆

use serde_json::Value;

use crate::common::{ExternalId, RawRecord};
use crate::errors::UpsertError;

// 🏷️ Smart-scheduling-links extensions. Slot capacity and booking details hide
// in `extension[]` under these URLs.
pub const SLOT_CAPACITY_EXTENSION: &str =
    "http://fhir-registry.smarthealthit.org/StructureDefinition/slot-capacity";
pub const BOOKING_LINK_EXTENSION: &str =
    "http://fhir-registry.smarthealthit.org/StructureDefinition/booking-deep-link";
pub const BOOKING_PHONE_EXTENSION: &str =
    "http://fhir-registry.smarthealthit.org/StructureDefinition/booking-phone";

/// 🔢 Store-assigned identity. The store hands these out, nobody else does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ===== Schedule (the parent) =====

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleFields {
    /// 📍 Who or where this schedule belongs to, e.g. `Location/123`.
    pub actor_ref: Option<String>,
    pub service_type: Option<String>,
}

impl ScheduleFields {
    /// 🔀 Pure merge. `self` is what we have, `incoming` is what just arrived.
    pub fn merge(&self, incoming: &ScheduleFields) -> ScheduleFields {
        ScheduleFields {
            actor_ref: overwrite_text(&self.actor_ref, &incoming.actor_ref),
            service_type: overwrite_text(&self.service_type, &incoming.service_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub id: EntityId,
    pub external_id: ExternalId,
    pub fields: ScheduleFields,
}

// ===== Slot (the child) =====

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotFields {
    /// `free`, `busy`, and friends.
    pub status: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub capacity: Option<u32>,
    pub booking_link: Option<String>,
    pub booking_phone: Option<String>,
}

impl SlotFields {
    /// 🔀 Pure merge, same rule as [`ScheduleFields::merge`].
    ///
    /// ```text
    ///   existing: { status: "busy", booking_link: "https://book" }
    ///   incoming: { status: "free", booking_link: None }
    ///   merged:   { status: "free", booking_link: "https://book" }
    /// ```
    pub fn merge(&self, incoming: &SlotFields) -> SlotFields {
        SlotFields {
            status: overwrite_text(&self.status, &incoming.status),
            start: overwrite_text(&self.start, &incoming.start),
            end: overwrite_text(&self.end, &incoming.end),
            capacity: incoming.capacity.or(self.capacity),
            booking_link: overwrite_text(&self.booking_link, &incoming.booking_link),
            booking_phone: overwrite_text(&self.booking_phone, &incoming.booking_phone),
        }
    }
}

/// 🎟️ One bookable appointment window, owned by exactly one [`Schedule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub id: EntityId,
    pub external_id: ExternalId,
    pub schedule_id: EntityId,
    pub fields: SlotFields,
}

fn overwrite_text(existing: &Option<String>, incoming: &Option<String>) -> Option<String> {
    match incoming {
        Some(value) if !value.trim().is_empty() => Some(value.clone()),
        _ => existing.clone(),
    }
}

// ===== Parsing decoded records into merge inputs =====

/// 🎟️ A Slot record, validated and flattened, ready for `MergeStore::upsert`.
///
/// The parent key travels separately: callers derive it with
/// [`slot_parent_key`] and pass it to the store next to the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    pub external_id: ExternalId,
    pub fields: SlotFields,
}

impl TryFrom<&RawRecord> for SlotRecord {
    type Error = UpsertError;

    fn try_from(record: &RawRecord) -> Result<Self, Self::Error> {
        let id = record.resource_id().ok_or_else(|| {
            UpsertError::Invalid(format!("Slot on line {} has no id", record.line))
        })?;
        let body = &record.body;

        Ok(SlotRecord {
            external_id: ExternalId::original(id),
            fields: SlotFields {
                status: text_at(body, "/status"),
                start: text_at(body, "/start"),
                end: text_at(body, "/end"),
                capacity: extension(body, SLOT_CAPACITY_EXTENSION)
                    .and_then(|ext| ext.get("valueInteger"))
                    .and_then(Value::as_u64)
                    .and_then(|capacity| u32::try_from(capacity).ok()),
                booking_link: extension(body, BOOKING_LINK_EXTENSION)
                    .and_then(|ext| text_at(ext, "/valueUrl")),
                booking_phone: extension(body, BOOKING_PHONE_EXTENSION)
                    .and_then(|ext| text_at(ext, "/valueString")),
            },
        })
    }
}

/// 🔑 Derive the parent lookup key from `schedule.reference`.
///
/// `Schedule/7` and a bare `7` both resolve to the Schedule whose publisher id
/// is `7`. Anything without a usable id part is `Invalid`.
pub fn slot_parent_key(record: &RawRecord) -> Result<ExternalId, UpsertError> {
    let reference = text_at(&record.body, "/schedule/reference").ok_or_else(|| {
        UpsertError::Invalid(format!(
            "Slot on line {} has no schedule.reference",
            record.line
        ))
    })?;

    let id_part = reference.rsplit('/').next().unwrap_or_default().trim();
    if id_part.is_empty() {
        return Err(UpsertError::Invalid(format!(
            "Slot on line {} references schedule '{reference}' without an id",
            record.line
        )));
    }
    Ok(ExternalId::original(id_part))
}

/// 🗓️ A Schedule record, flattened for `MergeStore::upsert_schedule`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRecord {
    pub external_id: ExternalId,
    pub fields: ScheduleFields,
}

impl TryFrom<&RawRecord> for ScheduleRecord {
    type Error = UpsertError;

    fn try_from(record: &RawRecord) -> Result<Self, Self::Error> {
        let id = record.resource_id().ok_or_else(|| {
            UpsertError::Invalid(format!("Schedule on line {} has no id", record.line))
        })?;
        let body = &record.body;

        Ok(ScheduleRecord {
            external_id: ExternalId::original(id),
            fields: ScheduleFields {
                actor_ref: text_at(body, "/actor/0/reference"),
                service_type: text_at(body, "/serviceType/0/coding/0/code")
                    .or_else(|| text_at(body, "/serviceType/0/text")),
            },
        })
    }
}

fn text_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn extension<'a>(body: &'a Value, url: &str) -> Option<&'a Value> {
    body.get("extension")?
        .as_array()?
        .iter()
        .find(|ext| ext.get("url").and_then(Value::as_str) == Some(url))
}
