//! Time of the last accepted submission, so the posting cooldown outlives
//! a single run of the client.

use chrono::{DateTime, Utc};

use anonchat_shared::constants::LAST_SUBMISSION_KEY;

use crate::database::LocalDatabase;
use crate::error::Result;

/// `None` when nothing was recorded or the stored value is unreadable.
pub fn last_submission(db: &LocalDatabase) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = db.get_value(LAST_SUBMISSION_KEY)? else {
        return Ok(None);
    };
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(at) => Ok(Some(at.with_timezone(&Utc))),
        Err(e) => {
            tracing::warn!(value = %raw, error = %e, "ignoring unreadable last submission time");
            Ok(None)
        }
    }
}

pub fn record_submission(db: &LocalDatabase, at: DateTime<Utc>) -> Result<()> {
    db.set_value(LAST_SUBMISSION_KEY, &at.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_round_trip_and_overwrite() {
        let db = LocalDatabase::open_in_memory().unwrap();
        assert_eq!(last_submission(&db).unwrap(), None);

        let first = Utc.with_ymd_and_hms(2024, 2, 1, 9, 30, 0).unwrap();
        record_submission(&db, first).unwrap();
        assert_eq!(last_submission(&db).unwrap(), Some(first));

        let later = first + chrono::Duration::milliseconds(1500);
        record_submission(&db, later).unwrap();
        assert_eq!(last_submission(&db).unwrap(), Some(later));
    }

    #[test]
    fn test_garbage_is_ignored() {
        let db = LocalDatabase::open_in_memory().unwrap();
        db.set_value(LAST_SUBMISSION_KEY, "yesterday").unwrap();
        assert_eq!(last_submission(&db).unwrap(), None);
    }
}
