//! Coarse model versioning and offline migrations.
//!
//! The layer stamps a single model version into `layer/meta`. At open, the
//! stored version is compared against [`MODEL_VERSION`]: fresh databases are
//! stamped current, older databases run the ordered migrations between the
//! two versions, and newer databases are refused (opening data written by a
//! future release is never safe).
//!
//! Layers flagged `canrev = false` refuse revision: a pending migration is
//! an error instead of an upgrade.

use anyhow::{Context, Result};

use super::errors::LayerError;
use super::schema::{LayerSubsystem, MetaCfKey, MetaCfValue, Metas, META_CANREV, META_VERSION};
use crate::rocksdb::{ColumnFamily, ColumnFamilySerde, Storage};

/// The model version this build reads and writes.
pub const MODEL_VERSION: u64 = 1;

type Migration = fn(&Storage<LayerSubsystem>) -> Result<()>;

/// Ordered migrations: `(target_version, step)`. Each step upgrades from
/// `target_version - 1` and the version stamp follows a successful step.
const MIGRATIONS: &[(u64, Migration)] = &[(1, migrate_v1_baseline)];

/// Baseline stamp. Version 0 databases predate versioning and carry the
/// same physical layout; nothing to rewrite.
fn migrate_v1_baseline(_storage: &Storage<LayerSubsystem>) -> Result<()> {
    Ok(())
}

fn read_meta(storage: &Storage<LayerSubsystem>, name: &str) -> Result<Option<u64>> {
    let key = Metas::key_to_bytes(&MetaCfKey(name.to_string()));
    match storage.db_access()?.get_cf(Metas::CF_NAME, &key)? {
        Some(bytes) => Ok(Some(Metas::value_from_bytes(&bytes)?.0)),
        None => Ok(None),
    }
}

fn write_meta(storage: &Storage<LayerSubsystem>, name: &str, value: u64) -> Result<()> {
    let txn_db = storage.transaction_db()?;
    let cf = txn_db
        .cf_handle(Metas::CF_NAME)
        .ok_or_else(|| anyhow::anyhow!("Column family '{}' not found", Metas::CF_NAME))?;
    let txn = txn_db.transaction();
    let key = Metas::key_to_bytes(&MetaCfKey(name.to_string()));
    let bytes = Metas::value_to_bytes(&MetaCfValue(value))?;
    txn.put_cf(cf, key, bytes)?;
    txn.commit()
        .with_context(|| format!("Failed to write meta '{}'", name))?;
    Ok(())
}

/// Whether this layer may be revised (migrated, truncated).
pub(crate) fn canrev(storage: &Storage<LayerSubsystem>) -> Result<bool> {
    Ok(read_meta(storage, META_CANREV)?.unwrap_or(1) != 0)
}

pub(crate) fn set_canrev(storage: &Storage<LayerSubsystem>, canrev: bool) -> Result<()> {
    write_meta(storage, META_CANREV, canrev as u64)
}

/// Bring the stored model version up to [`MODEL_VERSION`].
///
/// Runs at open, before the writer task starts, so migrations never race
/// with edits.
#[tracing::instrument(skip(storage))]
pub(crate) fn migrate(storage: &Storage<LayerSubsystem>) -> Result<()> {
    let stored = match read_meta(storage, META_VERSION)? {
        Some(version) => version,
        None => {
            // Fresh database: stamp current, nothing to migrate.
            write_meta(storage, META_VERSION, MODEL_VERSION)?;
            tracing::debug!(version = MODEL_VERSION, "Stamped fresh layer");
            return Ok(());
        }
    };

    if stored == MODEL_VERSION {
        return Ok(());
    }
    if stored > MODEL_VERSION {
        anyhow::bail!(
            "Layer model version {} is newer than supported version {}",
            stored,
            MODEL_VERSION
        );
    }
    if !canrev(storage)? {
        return Err(LayerError::ReadOnlyLayer.into());
    }

    for (target, step) in MIGRATIONS.iter().filter(|(v, _)| *v > stored) {
        tracing::info!(from = target - 1, to = target, "Running layer migration");
        step(storage).with_context(|| format!("Migration to version {} failed", target))?;
        write_meta(storage, META_VERSION, *target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Storage<LayerSubsystem> {
        let mut storage = Storage::readwrite(&dir.path().join("db"));
        storage.ready().expect("storage ready");
        storage
    }

    #[test]
    fn test_fresh_layer_stamped_current() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        migrate(&storage).unwrap();
        assert_eq!(read_meta(&storage, META_VERSION).unwrap(), Some(MODEL_VERSION));
        // Idempotent.
        migrate(&storage).unwrap();
    }

    #[test]
    fn test_old_version_upgraded() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        write_meta(&storage, META_VERSION, 0).unwrap();
        migrate(&storage).unwrap();
        assert_eq!(read_meta(&storage, META_VERSION).unwrap(), Some(MODEL_VERSION));
    }

    #[test]
    fn test_future_version_refused() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        write_meta(&storage, META_VERSION, MODEL_VERSION + 1).unwrap();
        assert!(migrate(&storage).is_err());
    }

    #[test]
    fn test_canrev_false_refuses_migration() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        write_meta(&storage, META_VERSION, 0).unwrap();
        set_canrev(&storage, false).unwrap();
        let err = migrate(&storage).unwrap_err();
        assert!(err.downcast_ref::<LayerError>().is_some());
    }

    #[test]
    fn test_canrev_default_true() {
        let dir = TempDir::new().unwrap();
        let storage = open(&dir);
        assert!(canrev(&storage).unwrap());
        set_canrev(&storage, false).unwrap();
        assert!(!canrev(&storage).unwrap());
    }
}
