//! Key-value access to the `local_state` table.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::database::LocalDatabase;
use crate::error::Result;

impl LocalDatabase {
    /// Read a value, `None` when the key was never written.
    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM local_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Insert or overwrite a value.
    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO local_state (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                            updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Returns `true` if a row was removed.
    pub fn remove_value(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM local_state WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_overwrite_remove() {
        let db = LocalDatabase::open_in_memory().unwrap();
        assert_eq!(db.get_value("k").unwrap(), None);

        db.set_value("k", "one").unwrap();
        assert_eq!(db.get_value("k").unwrap().as_deref(), Some("one"));

        db.set_value("k", "two").unwrap();
        assert_eq!(db.get_value("k").unwrap().as_deref(), Some("two"));

        assert!(db.remove_value("k").unwrap());
        assert!(!db.remove_value("k").unwrap());
        assert_eq!(db.get_value("k").unwrap(), None);
    }
}
