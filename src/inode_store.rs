//! File content persistence, keyed by inode id

use crate::{error::Result, FsError};
use sqlx::{AnyConnection, Row};

/// Accessor for the `inodes` table
///
/// Every method runs on a caller-supplied connection so that the adapter can
/// group several statements into one transaction.
#[derive(Debug, Default, Clone, Copy)]
pub struct InodeStore;

impl InodeStore {
    /// Fetch the content of an inode, `None` when no row exists.
    pub async fn get(&self, conn: &mut AnyConnection, id: u64) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT content FROM inodes WHERE id = ?")
            .bind(id as i64)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get(0)?)),
            None => Ok(None),
        }
    }

    /// Replace the full content of an existing inode.
    pub async fn put(&self, conn: &mut AnyConnection, id: u64, content: &[u8]) -> Result<()> {
        sqlx::query("UPDATE inodes SET content = ? WHERE id = ?")
            .bind(content)
            .bind(id as i64)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Insert a new inode and return its freshly assigned id.
    pub async fn insert(&self, conn: &mut AnyConnection, content: &[u8]) -> Result<u64> {
        let result = sqlx::query("INSERT INTO inodes (content) VALUES (?)")
            .bind(content)
            .execute(&mut *conn)
            .await?;

        result
            .last_insert_id()
            .map(|id| id as u64)
            .ok_or_else(|| FsError::Query("insert into inodes returned no id".to_string()))
    }

    /// Delete an inode row. Ids are never handed out again.
    pub async fn remove(&self, conn: &mut AnyConnection, id: u64) -> Result<()> {
        sqlx::query("DELETE FROM inodes WHERE id = ?")
            .bind(id as i64)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqlBackend;

    #[tokio::test]
    #[cfg(feature = "sqlite")]
    async fn test_inode_roundtrip() {
        let db = SqlBackend::sqlite(":memory:").await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let store = InodeStore;

        let id = store.insert(&mut conn, b"").await.unwrap();
        assert_eq!(store.get(&mut conn, id).await.unwrap(), Some(Vec::new()));

        let binary = [0_u8, 159, 146, 150, 255, b'\n'];
        store.put(&mut conn, id, &binary).await.unwrap();
        assert_eq!(store.get(&mut conn, id).await.unwrap(), Some(binary.to_vec()));

        store.remove(&mut conn, id).await.unwrap();
        assert_eq!(store.get(&mut conn, id).await.unwrap(), None);
    }

    #[tokio::test]
    #[cfg(feature = "sqlite")]
    async fn test_ids_increase_and_are_not_reused() {
        let db = SqlBackend::sqlite(":memory:").await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let store = InodeStore;

        let first = store.insert(&mut conn, b"a").await.unwrap();
        let second = store.insert(&mut conn, b"b").await.unwrap();
        assert!(second > first);

        store.remove(&mut conn, second).await.unwrap();
        let third = store.insert(&mut conn, b"c").await.unwrap();
        assert!(third > second);
    }
}
