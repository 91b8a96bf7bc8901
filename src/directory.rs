//! Name -> inode links and parent linkage

use crate::{error::Result, FsError};
use sqlx::{any::AnyRow, AnyConnection, Row};

/// One row of the `files` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Monotonic row id, only meaningful as a listing cursor
    pub sequence_id: u64,
    pub name: String,
    pub inode: u64,
    pub parent_inode: u64,
}

impl FileEntry {
    fn from_row(row: &AnyRow) -> Result<Self> {
        let sequence_id: i64 = row.try_get("id")?;
        let inode: i64 = row.try_get("inode")?;
        let parent_inode: i64 = row.try_get("parent_inode")?;
        Ok(Self {
            sequence_id: sequence_id as u64,
            name: row.try_get("name")?,
            inode: inode as u64,
            parent_inode: parent_inode as u64,
        })
    }
}

/// Accessor for the `files` table
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryIndex;

impl DirectoryIndex {
    /// Resolve `name` inside `parent`. `(name, parent_inode)` is unique, so
    /// there is at most one match.
    pub async fn lookup(
        &self,
        conn: &mut AnyConnection,
        parent: u64,
        name: &str,
    ) -> Result<Option<FileEntry>> {
        let row = sqlx::query(
            "SELECT id, name, inode, parent_inode FROM files WHERE name = ? AND parent_inode = ?",
        )
        .bind(name)
        .bind(parent as i64)
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(FileEntry::from_row).transpose()
    }

    /// Entries of `parent` whose sequence id is strictly greater than
    /// `cursor`, in sequence order.
    pub async fn children_after(
        &self,
        conn: &mut AnyConnection,
        parent: u64,
        cursor: u64,
    ) -> Result<Vec<FileEntry>> {
        let rows = sqlx::query(
            "SELECT id, name, inode, parent_inode FROM files \
             WHERE parent_inode = ? AND id > ? ORDER BY id",
        )
        .bind(parent as i64)
        .bind(cursor as i64)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(FileEntry::from_row).collect()
    }

    /// Id of the directory containing the entry that names `inode`.
    pub async fn parent_of(&self, conn: &mut AnyConnection, inode: u64) -> Result<Option<u64>> {
        let row = sqlx::query("SELECT parent_inode FROM files WHERE inode = ? ORDER BY id LIMIT 1")
            .bind(inode as i64)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => {
                let parent: i64 = row.try_get(0)?;
                Ok(Some(parent as u64))
            }
            None => Ok(None),
        }
    }

    /// Whether `id` shows up in the hierarchy at all, either as a named
    /// entry or as the parent of one.
    pub async fn is_linked(&self, conn: &mut AnyConnection, id: u64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM files WHERE inode = ? OR parent_inode = ? LIMIT 1")
            .bind(id as i64)
            .bind(id as i64)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }

    /// Whether any entry lives under `parent`.
    pub async fn has_children(&self, conn: &mut AnyConnection, parent: u64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM files WHERE parent_inode = ? LIMIT 1")
            .bind(parent as i64)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }

    /// Link `name` to `inode` under `parent`, returning the new sequence id.
    pub async fn insert(
        &self,
        conn: &mut AnyConnection,
        name: &str,
        inode: u64,
        parent: u64,
    ) -> Result<u64> {
        let result = sqlx::query("INSERT INTO files (name, inode, parent_inode) VALUES (?, ?, ?)")
            .bind(name)
            .bind(inode as i64)
            .bind(parent as i64)
            .execute(&mut *conn)
            .await?;

        result
            .last_insert_id()
            .map(|id| id as u64)
            .ok_or_else(|| FsError::Query("insert into files returned no id".to_string()))
    }

    pub async fn remove(&self, conn: &mut AnyConnection, sequence_id: u64) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(sequence_id as i64)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{schema::ROOT_INO, SqlBackend};

    #[tokio::test]
    #[cfg(feature = "sqlite")]
    async fn test_lookup_and_parent_linkage() {
        let db = SqlBackend::sqlite(":memory:").await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let index = DirectoryIndex;

        index.insert(&mut conn, "docs", 100, ROOT_INO).await.unwrap();
        index.insert(&mut conn, "a.txt", 2, 100).await.unwrap();

        let entry = index.lookup(&mut conn, 100, "a.txt").await.unwrap().unwrap();
        assert_eq!(entry.inode, 2);
        assert_eq!(entry.parent_inode, 100);
        assert!(index.lookup(&mut conn, ROOT_INO, "a.txt").await.unwrap().is_none());

        assert_eq!(index.parent_of(&mut conn, 100).await.unwrap(), Some(ROOT_INO));
        assert_eq!(index.parent_of(&mut conn, 2).await.unwrap(), Some(100));
        assert_eq!(index.parent_of(&mut conn, 999).await.unwrap(), None);

        assert!(index.is_linked(&mut conn, 100).await.unwrap());
        assert!(index.has_children(&mut conn, 100).await.unwrap());
        assert!(!index.has_children(&mut conn, 2).await.unwrap());
        assert!(!index.is_linked(&mut conn, 999).await.unwrap());
    }

    #[tokio::test]
    #[cfg(feature = "sqlite")]
    async fn test_name_unique_within_parent() {
        let db = SqlBackend::sqlite(":memory:").await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let index = DirectoryIndex;

        index.insert(&mut conn, "same", 2, ROOT_INO).await.unwrap();
        index.insert(&mut conn, "same", 3, 100).await.unwrap();
        assert!(index.insert(&mut conn, "same", 4, ROOT_INO).await.is_err());
    }

    #[tokio::test]
    #[cfg(feature = "sqlite")]
    async fn test_children_after_cursor() {
        let db = SqlBackend::sqlite(":memory:").await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let index = DirectoryIndex;

        let first = index.insert(&mut conn, "one", 2, ROOT_INO).await.unwrap();
        index.insert(&mut conn, "elsewhere", 3, 100).await.unwrap();
        let third = index.insert(&mut conn, "two", 4, ROOT_INO).await.unwrap();

        let all = index.children_after(&mut conn, ROOT_INO, 0).await.unwrap();
        let names: Vec<_> = all.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["one", "two"]);

        let rest = index.children_after(&mut conn, ROOT_INO, first).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].sequence_id, third);

        assert!(index.children_after(&mut conn, ROOT_INO, third).await.unwrap().is_empty());

        index.remove(&mut conn, first).await.unwrap();
        assert!(index.lookup(&mut conn, ROOT_INO, "one").await.unwrap().is_none());
    }
}
