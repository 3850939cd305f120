use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// A downloaded image and the file that holds its bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedImage {
    pub url: String,
    pub file_path: PathBuf,
    pub size_bytes: i64,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedImage {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Index of the on-disk image cache: which URL lives in which file, and for
/// how long. Several URLs may share a file when their bytes are identical.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

const MIGRATIONS: &[&str] = &[r#"
CREATE TABLE image_cache (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  url TEXT NOT NULL UNIQUE,
  file_path TEXT NOT NULL,
  size_bytes INTEGER NOT NULL,
  fetched_at TEXT NOT NULL,
  expires_at TEXT NOT NULL
);
CREATE INDEX idx_image_cache_age ON image_cache(fetched_at, id);
"#];

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = match opts.path {
            Some(path) => path,
            None => default_path().context("storage: no data directory")?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    /// The indexed image for `url`, whether or not it has expired.
    pub fn cached_image(&self, url: &str) -> Result<Option<CachedImage>> {
        self.conn
            .lock()
            .query_row(
                "SELECT url, file_path, size_bytes, fetched_at, expires_at
                 FROM image_cache WHERE url = ?1",
                params![url],
                image_from_row,
            )
            .optional()
            .context("storage: look up image")
    }

    /// Indexes `image`, replacing whatever was recorded for its URL.
    pub fn record_image(&self, image: &CachedImage) -> Result<()> {
        if image.url.is_empty() {
            bail!("storage: image url required");
        }
        self.conn
            .lock()
            .execute(
                "INSERT INTO image_cache (url, file_path, size_bytes, fetched_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(url) DO UPDATE SET
                   file_path = excluded.file_path,
                   size_bytes = excluded.size_bytes,
                   fetched_at = excluded.fetched_at,
                   expires_at = excluded.expires_at",
                params![
                    image.url,
                    image.file_path.to_string_lossy(),
                    image.size_bytes,
                    image.fetched_at,
                    image.expires_at,
                ],
            )
            .with_context(|| format!("storage: record image {}", image.url))?;
        Ok(())
    }

    pub fn total_size(&self) -> Result<i64> {
        self.conn
            .lock()
            .query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM image_cache",
                [],
                |row| row.get(0),
            )
            .context("storage: sum image sizes")
    }

    /// Drops the oldest rows until the index, with `incoming` counted in
    /// place of any row for its URL, fits in `budget` bytes. The row for
    /// `incoming.url` is never dropped. Returns the files that no remaining
    /// row points at and that `incoming` will not be written to.
    pub fn evict_to_fit(&self, incoming: &CachedImage, budget: i64) -> Result<Vec<PathBuf>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("storage: begin eviction")?;

        let others: i64 = tx.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM image_cache WHERE url <> ?1",
            params![incoming.url],
            |row| row.get(0),
        )?;
        let mut total = others + incoming.size_bytes;
        if total <= budget {
            return Ok(Vec::new());
        }

        let candidates: Vec<(i64, String, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT id, file_path, size_bytes FROM image_cache
                 WHERE url <> ?1
                 ORDER BY fetched_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(params![incoming.url], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut dropped = Vec::new();
        for (id, file_path, size) in candidates {
            if total <= budget {
                break;
            }
            tx.execute("DELETE FROM image_cache WHERE id = ?1", params![id])?;
            total -= size;
            dropped.push(file_path);
        }

        let keep = incoming.file_path.to_string_lossy();
        let mut orphaned: Vec<PathBuf> = Vec::new();
        for file_path in dropped {
            if file_path == keep {
                continue;
            }
            let shared: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM image_cache WHERE file_path = ?1)",
                params![file_path],
                |row| row.get(0),
            )?;
            let file_path = PathBuf::from(file_path);
            if !shared && !orphaned.contains(&file_path) {
                orphaned.push(file_path);
            }
        }

        tx.commit().context("storage: commit eviction")?;
        Ok(orphaned)
    }
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<CachedImage> {
    let file_path: String = row.get(1)?;
    Ok(CachedImage {
        url: row.get(0)?,
        file_path: PathBuf::from(file_path),
        size_bytes: row.get(2)?,
        fetched_at: row.get(3)?,
        expires_at: row.get(4)?,
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    let applied: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .context("storage: read schema version")?;
    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(applied.max(0) as usize) {
        let version = idx as i64 + 1;
        conn.execute_batch(sql)
            .with_context(|| format!("storage: apply migration {version}"))?;
        conn.pragma_update(None, "user_version", version)
            .with_context(|| format!("storage: record migration {version}"))?;
    }
    Ok(())
}

fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("blog-tui").join("images.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::{tempdir, TempDir};

    fn open() -> (TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("images.db")),
        })
        .unwrap();
        (dir, store)
    }

    fn image(url: &str, file: &str, size: i64, age_secs: i64) -> CachedImage {
        let fetched_at = Utc::now() - Duration::seconds(age_secs);
        CachedImage {
            url: url.into(),
            file_path: PathBuf::from(file),
            size_bytes: size,
            fetched_at,
            expires_at: fetched_at + Duration::hours(1),
        }
    }

    #[test]
    fn open_creates_database_and_reopens_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("images.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        store
            .record_image(&image("https://img/a.png", "/c/a.bin", 4, 0))
            .unwrap();
        store.close().unwrap();
        assert!(path.exists());

        let store = Store::open(Options { path: Some(path) }).unwrap();
        assert_eq!(store.total_size().unwrap(), 4);
    }

    #[test]
    fn recording_a_url_again_replaces_its_row() {
        let (_dir, store) = open();
        store
            .record_image(&image("https://img/a.png", "/c/a.bin", 10, 60))
            .unwrap();
        let newer = image("https://img/a.png", "/c/a2.bin", 25, 0);
        store.record_image(&newer).unwrap();

        let found = store.cached_image("https://img/a.png").unwrap().unwrap();
        assert_eq!(found.file_path, PathBuf::from("/c/a2.bin"));
        assert_eq!(found.size_bytes, 25);
        assert_eq!(store.total_size().unwrap(), 25);
        assert!(store.cached_image("https://img/b.png").unwrap().is_none());
    }

    #[test]
    fn freshness_follows_expiry() {
        let mut img = image("https://img/a.png", "/c/a.bin", 1, 0);
        assert!(img.is_fresh_at(Utc::now()));
        img.expires_at = Utc::now() - Duration::seconds(1);
        assert!(!img.is_fresh_at(Utc::now()));
    }

    #[test]
    fn eviction_drops_oldest_rows_until_the_newcomer_fits() {
        let (_dir, store) = open();
        store
            .record_image(&image("https://img/old.png", "/c/old.bin", 10, 300))
            .unwrap();
        store
            .record_image(&image("https://img/mid.png", "/c/mid.bin", 10, 200))
            .unwrap();
        store
            .record_image(&image("https://img/new.png", "/c/new.bin", 10, 100))
            .unwrap();

        let incoming = image("https://img/next.png", "/c/next.bin", 10, 0);
        let orphaned = store.evict_to_fit(&incoming, 30).unwrap();

        assert_eq!(orphaned, vec![PathBuf::from("/c/old.bin")]);
        assert!(store.cached_image("https://img/old.png").unwrap().is_none());
        assert!(store.cached_image("https://img/mid.png").unwrap().is_some());
        assert_eq!(store.total_size().unwrap(), 20);
    }

    #[test]
    fn eviction_never_drops_the_incoming_url() {
        let (_dir, store) = open();
        let stale = image("https://img/a.png", "/c/a.bin", 16, 600);
        store.record_image(&stale).unwrap();

        let refetched = image("https://img/a.png", "/c/a.bin", 16, 0);
        let orphaned = store.evict_to_fit(&refetched, 16).unwrap();

        assert!(orphaned.is_empty());
        assert!(store.cached_image("https://img/a.png").unwrap().is_some());
    }

    #[test]
    fn eviction_keeps_files_still_referenced() {
        let (_dir, store) = open();
        store
            .record_image(&image("https://img/a.png", "/c/same.bin", 8, 300))
            .unwrap();
        store
            .record_image(&image("https://img/b.png", "/c/same.bin", 8, 200))
            .unwrap();
        store
            .record_image(&image("https://img/c.png", "/c/c.bin", 8, 100))
            .unwrap();

        let incoming = image("https://img/d.png", "/c/c.bin", 8, 0);
        let orphaned = store.evict_to_fit(&incoming, 8).unwrap();

        // a and b go; their shared file is orphaned once. c goes too, but the
        // incoming image is written to the same file.
        assert_eq!(store.total_size().unwrap(), 0);
        assert_eq!(orphaned, vec![PathBuf::from("/c/same.bin")]);
    }
}
