//! Datastore backup records.
//!
//! Peripheral to the job-graph core: backups belong to the data-resource
//! lifecycle, which shares the bounded parallel executor. Only the record
//! shape and the list-retention rule live here.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::id::BackupId;

/// Backups older than this are filtered from list results.
pub const BACKUP_RETENTION_DAYS: i64 = 90;

/// A point-in-time backup of a datastore resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSpec {
    /// Backup identifier.
    pub id: BackupId,
    /// Name of the resource that was backed up.
    pub resource: String,
    /// Free-form description.
    pub description: String,
    /// Backup configuration (TTL, target dataset, ...).
    pub config: BTreeMap<String, String>,
    /// Result per destination URN produced by the backup.
    pub result: BTreeMap<String, String>,
    /// When the backup was taken.
    pub created_at: DateTime<Utc>,
}

/// Filters out backups past the retention window.
///
/// Keeps only backups created within [`BACKUP_RETENTION_DAYS`] of `now`,
/// preserving input order.
#[must_use]
pub fn filter_expired(backups: Vec<BackupSpec>, now: DateTime<Utc>) -> Vec<BackupSpec> {
    let cutoff = now - Duration::days(BACKUP_RETENTION_DAYS);
    backups
        .into_iter()
        .filter(|b| b.created_at >= cutoff)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn backup(created_at: DateTime<Utc>) -> BackupSpec {
        BackupSpec {
            id: BackupId::generate(),
            resource: "bigquery://project.dataset.table".into(),
            description: String::new(),
            config: BTreeMap::new(),
            result: BTreeMap::new(),
            created_at,
        }
    }

    #[test]
    fn filter_drops_backups_older_than_ninety_days() {
        let now = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
        let fresh = backup(now - Duration::days(10));
        let stale = backup(now - Duration::days(120));
        let boundary = backup(now - Duration::days(BACKUP_RETENTION_DAYS));

        let kept = filter_expired(vec![fresh.clone(), stale, boundary.clone()], now);
        assert_eq!(kept, vec![fresh, boundary]);
    }
}
