//! Snapshot Version Migrations
//!
//! Older snapshots are upgraded one version at a time on the raw JSON
//! document before it is decoded. Snapshots without a readable version,
//! or from a newer engine, are rejected outright.
//!
//! # Version History
//!
//! - **1**: timer occurrence state stored inline on each task record
//!   (`"timer": {"next_due", "fired"}`), single top-level `next_id`
//! - **2**: timer state moved to a `schedules` list, counters grouped
//!   under `counters` together with the delivered message count

use log::{debug, info};
use serde_json::{json, Map, Value};

use super::format::CURRENT_VERSION;
use crate::error::SnapshotError;

/// Reads the version tag of a snapshot document.
pub fn version_of(document: &Value) -> Result<u32, SnapshotError> {
    let raw = document
        .get("version")
        .and_then(Value::as_u64)
        .ok_or(SnapshotError::MissingVersion)?;
    if raw == 0 || raw > u64::from(CURRENT_VERSION) {
        return Err(SnapshotError::UnsupportedVersion {
            found: raw,
            supported: CURRENT_VERSION,
        });
    }
    u32::try_from(raw).map_err(|_| SnapshotError::UnsupportedVersion {
        found: raw,
        supported: CURRENT_VERSION,
    })
}

/// Upgrades a snapshot document to the current version.
pub fn upgrade(mut document: Value) -> Result<Value, SnapshotError> {
    let mut version = version_of(&document)?;
    if version < CURRENT_VERSION {
        info!(
            "Upgrading snapshot from version {} to {}",
            version, CURRENT_VERSION
        );
    }

    while version < CURRENT_VERSION {
        document = match version {
            1 => v1_to_v2(document)?,
            other => {
                return Err(SnapshotError::Migration {
                    from: other,
                    reason: "no upgrade path".to_string(),
                })
            }
        };
        version += 1;
        debug!("Snapshot now at version {}", version);
    }
    Ok(document)
}

fn v1_to_v2(document: Value) -> Result<Value, SnapshotError> {
    let fail = |reason: &str| SnapshotError::Migration {
        from: 1,
        reason: reason.to_string(),
    };

    let Value::Object(mut root) = document else {
        return Err(fail("document is not an object"));
    };
    let next_id = root
        .remove("next_id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| fail("missing 'next_id'"))?;
    let Some(Value::Array(tasks)) = root.remove("tasks") else {
        return Err(fail("missing 'tasks'"));
    };

    let mut records = Vec::with_capacity(tasks.len());
    let mut schedules = Vec::new();
    for task in tasks {
        let Value::Object(mut record) = task else {
            return Err(fail("task record is not an object"));
        };
        if let Some(timer) = record.remove("timer") {
            let Value::Object(timer) = timer else {
                return Err(fail("timer state is not an object"));
            };
            let id = record.get("id").cloned().ok_or_else(|| fail("task record without 'id'"))?;
            let mut schedule = Map::new();
            schedule.insert("task".to_string(), id);
            for key in ["next_due", "fired"] {
                let value = timer
                    .get(key)
                    .cloned()
                    .ok_or_else(|| fail("timer state is incomplete"))?;
                schedule.insert(key.to_string(), value);
            }
            schedules.push(Value::Object(schedule));
        }
        records.push(Value::Object(record));
    }

    root.insert("version".to_string(), json!(2));
    root.insert("tasks".to_string(), Value::Array(records));
    root.insert("schedules".to_string(), Value::Array(schedules));
    root.insert(
        "counters".to_string(),
        json!({"next_task_id": next_id, "messages_delivered": 0}),
    );
    Ok(Value::Object(root))
}
