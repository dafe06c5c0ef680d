//! Per-profile anonymous identity.

use anonchat_shared::constants::IDENTITY_KEY;
use anonchat_shared::Identity;

use crate::database::LocalDatabase;
use crate::error::Result;

/// Return the identity stored in this profile, generating and persisting a
/// fresh one on first use. Stable across restarts until the database is
/// cleared.
pub fn get_or_create_identity(db: &LocalDatabase) -> Result<Identity> {
    if let Some(existing) = db.get_value(IDENTITY_KEY)? {
        if !existing.trim().is_empty() {
            return Ok(Identity::new(existing));
        }
        tracing::warn!("stored identity is blank, generating a new one");
    }

    let identity = Identity::generate();
    db.set_value(IDENTITY_KEY, identity.as_str())?;
    tracing::info!(%identity, "created anonymous identity");
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_stable() {
        let db = LocalDatabase::open_in_memory().unwrap();
        let first = get_or_create_identity(&db).unwrap();
        let second = get_or_create_identity(&db).unwrap();
        assert_eq!(first, second);
        assert!(first.as_str().starts_with("anon-"));
    }

    #[test]
    fn test_identity_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let db = LocalDatabase::open_in_dir(dir.path()).unwrap();
            get_or_create_identity(&db).unwrap()
        };
        let db = LocalDatabase::open_in_dir(dir.path()).unwrap();
        assert_eq!(get_or_create_identity(&db).unwrap(), first);
    }

    #[test]
    fn test_cleared_storage_yields_new_identity() {
        let db = LocalDatabase::open_in_memory().unwrap();
        let first = get_or_create_identity(&db).unwrap();
        db.remove_value(IDENTITY_KEY).unwrap();
        let second = get_or_create_identity(&db).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_existing_value_is_used() {
        let db = LocalDatabase::open_in_memory().unwrap();
        db.set_value(IDENTITY_KEY, "anon-abc123xyz").unwrap();
        assert_eq!(
            get_or_create_identity(&db).unwrap().as_str(),
            "anon-abc123xyz"
        );
    }
}
