//! redb-backed persistence for consistent maps
//!
//! All maps share one table. Keys are the map name, a zero byte and the
//! bincode encoding of the map key; values are bincode-encoded
//! `Versioned<V>` records.

use crate::config::StorageConfig;
use crate::error::{SdnError, SdnResult};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

pub struct MapPersistence {
    database: Arc<Database>,
    table_name: String,
}

impl MapPersistence {
    /// Open or create the database file
    pub fn open(path: impl AsRef<Path>, table_name: impl Into<String>) -> SdnResult<Self> {
        let database = Database::create(path.as_ref())?;
        Ok(Self {
            database: Arc::new(database),
            table_name: table_name.into(),
        })
    }

    /// Open the database named in the storage configuration, if any
    pub fn from_config(config: &StorageConfig) -> SdnResult<Option<Arc<Self>>> {
        match &config.database_path {
            Some(path) => Ok(Some(Arc::new(Self::open(path, config.table_name.clone())?))),
            None => Ok(None),
        }
    }

    fn entry_key<K: Serialize>(map: &str, key: &K) -> SdnResult<Vec<u8>> {
        let mut bytes = map_prefix(map);
        bytes.extend(bincode::serialize(key)?);
        Ok(bytes)
    }

    pub async fn store<K, V>(&self, map: &str, key: &K, value: &V) -> SdnResult<()>
    where
        K: Serialize,
        V: Serialize,
    {
        let db = self.database.clone();
        let table_name = self.table_name.clone();
        let key_bytes = Self::entry_key(map, key)?;
        let value_bytes = bincode::serialize(value)?;

        tokio::task::spawn_blocking(move || -> SdnResult<()> {
            let table: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&table_name);
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(table)?;
                table.insert(key_bytes.as_slice(), value_bytes.as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await?
    }

    pub async fn delete<K: Serialize>(&self, map: &str, key: &K) -> SdnResult<()> {
        let db = self.database.clone();
        let table_name = self.table_name.clone();
        let key_bytes = Self::entry_key(map, key)?;

        tokio::task::spawn_blocking(move || -> SdnResult<()> {
            let table: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&table_name);
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(table)?;
                table.remove(key_bytes.as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await?
    }

    /// Load every entry belonging to `map`
    pub fn load<K, V>(&self, map: &str) -> SdnResult<Vec<(K, V)>>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        let table: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&self.table_name);
        let prefix = map_prefix(map);
        let read_txn = self.database.begin_read()?;
        let table = match read_txn.open_table(table) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for item in table.range(prefix.as_slice()..)? {
            let (key, value) = item?;
            let key = key.value();
            if !key.starts_with(&prefix) {
                break;
            }
            let decoded_key: K = bincode::deserialize(&key[prefix.len()..])
                .map_err(|e| SdnError::serialization("decode_map_key", e))?;
            let decoded_value: V = bincode::deserialize(value.value())
                .map_err(|e| SdnError::serialization("decode_map_value", e))?;
            entries.push((decoded_key, decoded_value));
        }
        Ok(entries)
    }
}

fn map_prefix(map: &str) -> Vec<u8> {
    let mut bytes = map.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_and_reload_by_map() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("maps.redb");
        let persistence = MapPersistence::open(&path, "maps").unwrap();

        persistence.store("a", &"k1".to_string(), &1u64).await.unwrap();
        persistence.store("a", &"k2".to_string(), &2u64).await.unwrap();
        persistence.store("ab", &"k1".to_string(), &3u64).await.unwrap();
        persistence.delete("a", &"k2".to_string()).await.unwrap();

        let loaded: Vec<(String, u64)> = persistence.load("a").unwrap();
        assert_eq!(loaded, vec![("k1".to_string(), 1)]);

        let other: Vec<(String, u64)> = persistence.load("ab").unwrap();
        assert_eq!(other, vec![("k1".to_string(), 3)]);
    }

    #[test]
    fn test_missing_table_loads_empty() {
        let dir = TempDir::new().unwrap();
        let persistence = MapPersistence::open(dir.path().join("empty.redb"), "maps").unwrap();
        let loaded: Vec<(String, u64)> = persistence.load("a").unwrap();
        assert!(loaded.is_empty());
    }
}
