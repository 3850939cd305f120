use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::ImageFormat;
use parking_lot::Mutex;
use reqwest::blocking::Client;
use sha1::{Digest, Sha1};

use crate::storage::{self, CachedImage};

/// Fetches a single image. A successful return means the image is ready to
/// be shown without further network access.
pub trait ImageLoader: Send + Sync {
    fn load(&self, url: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: Option<PathBuf>,
    pub max_size_bytes: i64,
    pub default_ttl: Duration,
    pub http_client: Option<Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            max_size_bytes: 200 * 1024 * 1024,
            default_ttl: Duration::from_secs(24 * 60 * 60),
            http_client: None,
        }
    }
}

/// Downloads images into the cache directory and indexes them in the store.
pub struct CacheLoader {
    store: Arc<storage::Store>,
    cfg: Config,
    cache_dir: PathBuf,
    client: Client,
    pruning: Mutex<()>,
}

impl CacheLoader {
    pub fn new(store: Arc<storage::Store>, cfg: Config) -> Result<Self> {
        let cache_dir = cfg
            .cache_dir
            .clone()
            .or_else(default_cache_dir)
            .context("media: cache dir not configured")?;
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("media: create cache dir {}", cache_dir.display()))?;

        let client = if let Some(client) = cfg.http_client.clone() {
            client
        } else {
            Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .context("media: build http client")?
        };

        Ok(Self {
            store,
            cfg,
            cache_dir,
            client,
            pruning: Mutex::new(()),
        })
    }

    fn fetch(&self, url: &str) -> Result<CachedImage> {
        if url.is_empty() {
            bail!("media: url required");
        }

        if let Some(image) = self.store.cached_image(url)? {
            if image.is_fresh_at(Utc::now()) && image.file_path.exists() {
                return Ok(image);
            }
        }

        let response = self.client.get(url).send().context("media: download")?;
        if !response.status().is_success() {
            bail!("media: request failed: {}", response.status());
        }

        let bytes = response.bytes().context("media: body")?.to_vec();
        let media_type = detect_mime(&bytes);
        if !media_type.starts_with("image/") {
            bail!("media: {url} is not an image ({media_type})");
        }

        let fetched_at = Utc::now();
        let image = CachedImage {
            url: url.to_string(),
            file_path: self.cache_dir.join(format!("{}.bin", sha1_hex(&bytes))),
            size_bytes: bytes.len() as i64,
            fetched_at,
            expires_at: expiry(fetched_at, self.cfg.default_ttl),
        };
        self.admit(&image, &bytes)?;
        Ok(image)
    }

    /// Evicts to make room, then writes and indexes `image`, all under the
    /// pruning lock.
    fn admit(&self, image: &CachedImage, bytes: &[u8]) -> Result<()> {
        let _guard = self.pruning.lock();
        let orphaned = self
            .store
            .evict_to_fit(image, self.cfg.max_size_bytes)
            .context("media: prune cache")?;
        if !orphaned.is_empty() {
            tracing::debug!(evicted = orphaned.len(), "media: pruning cache");
        }
        for path in orphaned {
            if let Err(err) = fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), error = %err, "media: remove evicted file");
            }
        }

        fs::write(&image.file_path, bytes)
            .with_context(|| format!("media: write {}", image.file_path.display()))?;
        self.store.record_image(image)
    }
}

impl ImageLoader for CacheLoader {
    fn load(&self, url: &str) -> Result<()> {
        self.fetch(url).map(|_| ())
    }
}

struct Job {
    url: String,
    tx: Sender<(String, Result<()>)>,
}

struct Inner {
    loader: Arc<dyn ImageLoader>,
    loaded: Mutex<HashSet<String>>,
    jobs: Sender<Job>,
    stop: Sender<()>,
}

/// Shared image preload cache. Remembers which URLs have loaded; the set
/// only grows.
pub struct Preloader {
    inner: Arc<Inner>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Preloader {
    pub fn new(loader: Arc<dyn ImageLoader>, workers: usize) -> Self {
        let workers = if workers == 0 { 2 } else { workers };
        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let inner = Arc::new(Inner {
            loader,
            loaded: Mutex::new(HashSet::new()),
            jobs: job_tx,
            stop: stop_tx,
        });

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker_inner = inner.clone();
            handles.push(thread::spawn(move || worker_inner.worker(rx_jobs, rx_stop)));
        }

        Self {
            inner,
            handles: Mutex::new(handles),
        }
    }

    /// Loads every URL not already known to be loaded and blocks until all of
    /// them finish. Fails if any load failed; the URLs that did load are
    /// still remembered.
    pub fn preload<I, S>(&self, urls: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: HashSet<String> = urls
            .into_iter()
            .map(|url| url.as_ref().trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        let missing: Vec<String> = {
            let loaded = self.inner.loaded.lock();
            wanted
                .into_iter()
                .filter(|url| !loaded.contains(url))
                .collect()
        };
        if missing.is_empty() {
            return Ok(());
        }

        let (tx, rx) = unbounded();
        for url in &missing {
            self.inner
                .jobs
                .send(Job {
                    url: url.clone(),
                    tx: tx.clone(),
                })
                .map_err(|_| anyhow!("media: preloader stopped"))?;
        }
        drop(tx);

        let mut succeeded = Vec::with_capacity(missing.len());
        let mut failed = 0usize;
        for (url, result) in rx.iter().take(missing.len()) {
            match result {
                Ok(()) => succeeded.push(url),
                Err(err) => {
                    tracing::debug!(%url, error = %err, "media: image failed to load");
                    failed += 1;
                }
            }
        }
        let finished = succeeded.len() + failed;
        self.inner.loaded.lock().extend(succeeded);

        if finished < missing.len() {
            bail!("media: preloader stopped before all images loaded");
        }
        if failed > 0 {
            bail!("media: failed to preload {failed} of {} images", missing.len());
        }
        Ok(())
    }

    pub fn is_loaded(&self, url: &str) -> bool {
        self.inner.loaded.lock().contains(url)
    }

    fn shutdown(&self) {
        let mut handles = self.handles.lock();
        for _ in handles.iter() {
            let _ = self.inner.stop.send(());
        }
        while let Some(handle) = handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for Preloader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn worker(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => {
                            let result = self.loader.load(&job.url);
                            let _ = job.tx.send((job.url, result));
                        }
                        Err(_) => break,
                    }
                }
            }
        }
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("blog-tui").join("images"))
}

fn expiry(fetched_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| fetched_at.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn detect_mime(bytes: &[u8]) -> String {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg".into(),
        Ok(ImageFormat::Png) => "image/png".into(),
        Ok(ImageFormat::Gif) => "image/gif".into(),
        Ok(ImageFormat::WebP) => "image/webp".into(),
        _ => {
            let mut buffer = [0u8; 512];
            let mut cursor = std::io::Cursor::new(bytes);
            let read = cursor.read(&mut buffer).unwrap_or(0);
            tree_magic_mini::from_u8(&buffer[..read]).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::{tempdir, TempDir};
    use tiny_http::{Response as HttpResponse, Server, StatusCode as HttpStatus};

    #[derive(Default)]
    struct CountingLoader {
        loads: Mutex<HashMap<String, usize>>,
        broken: HashSet<String>,
    }

    impl CountingLoader {
        fn count(&self, url: &str) -> usize {
            self.loads.lock().get(url).copied().unwrap_or(0)
        }
    }

    impl ImageLoader for CountingLoader {
        fn load(&self, url: &str) -> Result<()> {
            *self.loads.lock().entry(url.to_string()).or_default() += 1;
            if self.broken.contains(url) {
                bail!("broken image");
            }
            Ok(())
        }
    }

    #[test]
    fn preloading_twice_loads_once() {
        let loader = Arc::new(CountingLoader::default());
        let preloader = Preloader::new(loader.clone(), 2);

        preloader.preload(["https://img/a.png", "https://img/b.png"]).unwrap();
        preloader.preload(["https://img/a.png"]).unwrap();

        assert_eq!(loader.count("https://img/a.png"), 1);
        assert_eq!(loader.count("https://img/b.png"), 1);
        assert!(preloader.is_loaded("https://img/b.png"));
    }

    #[test]
    fn duplicate_and_empty_urls_are_ignored() {
        let loader = Arc::new(CountingLoader::default());
        let preloader = Preloader::new(loader.clone(), 3);

        preloader
            .preload(vec!["https://img/a.png", "", "https://img/a.png", "  "])
            .unwrap();
        assert_eq!(loader.count("https://img/a.png"), 1);
        assert_eq!(loader.loads.lock().len(), 1);
    }

    #[test]
    fn one_failure_fails_the_batch_but_keeps_successes() {
        let loader = Arc::new(CountingLoader {
            broken: ["https://img/bad.png".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let preloader = Preloader::new(loader.clone(), 2);

        let err = preloader
            .preload(["https://img/ok.png", "https://img/bad.png"])
            .unwrap_err();
        assert!(err.to_string().contains("1 of 2"), "got {err}");
        assert!(preloader.is_loaded("https://img/ok.png"));
        assert!(!preloader.is_loaded("https://img/bad.png"));

        let _ = preloader.preload(["https://img/bad.png"]);
        assert_eq!(loader.count("https://img/bad.png"), 2);
    }

    fn serve(replies: Vec<(u16, Vec<u8>)>) -> (String, thread::JoinHandle<Vec<String>>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for (status, body) in replies {
                let request = server.recv().unwrap();
                seen.push(request.url().to_string());
                let response = HttpResponse::from_data(body).with_status_code(HttpStatus(status));
                let _ = request.respond(response);
            }
            seen
        });
        (format!("http://{addr}"), handle)
    }

    /// A `len`-byte body carrying the PNG signature; `tag` keeps hashes apart.
    fn png(tag: u8, len: usize) -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.resize(len, tag);
        bytes
    }

    fn cache(dir: &TempDir, max_size_bytes: i64) -> (Arc<storage::Store>, CacheLoader) {
        let store = Arc::new(
            storage::Store::open(storage::Options {
                path: Some(dir.path().join("images.db")),
            })
            .unwrap(),
        );
        let loader = CacheLoader::new(
            store.clone(),
            Config {
                cache_dir: Some(dir.path().join("images")),
                max_size_bytes,
                ..Default::default()
            },
        )
        .unwrap();
        (store, loader)
    }

    #[test]
    fn cache_loader_serves_fresh_entries_without_network() {
        let dir = tempdir().unwrap();
        let (store, loader) = cache(&dir, 1024);
        let file = dir.path().join("cached.bin");
        fs::write(&file, b"png").unwrap();
        store
            .record_image(&CachedImage {
                // Port 1 is closed, so any download attempt would fail.
                url: "http://127.0.0.1:1/cached.png".into(),
                file_path: file,
                size_bytes: 3,
                fetched_at: Utc::now(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
            .unwrap();

        loader.load("http://127.0.0.1:1/cached.png").unwrap();
        assert!(loader.load("http://127.0.0.1:1/missing.png").is_err());
    }

    #[test]
    fn download_is_written_under_its_hash_and_indexed() {
        let body = png(1, 16);
        let (base, server) = serve(vec![(200, body.clone())]);
        let dir = tempdir().unwrap();
        let (store, loader) = cache(&dir, 1024);
        let url = format!("{base}/a.png");

        loader.load(&url).unwrap();

        let expected = dir.path().join("images").join(format!("{}.bin", sha1_hex(&body)));
        assert_eq!(fs::read(&expected).unwrap(), body);
        let image = store.cached_image(&url).unwrap().unwrap();
        assert_eq!(image.file_path, expected);
        assert_eq!(image.size_bytes, 16);
        assert!(image.is_fresh_at(Utc::now()));

        // The server only answers once; a second load must come from disk.
        assert_eq!(server.join().unwrap(), vec!["/a.png".to_string()]);
        loader.load(&url).unwrap();
    }

    #[test]
    fn non_image_bodies_and_error_statuses_are_rejected() {
        let (base, server) = serve(vec![
            (200, b"<html><body>not found</body></html>".to_vec()),
            (404, png(2, 16)),
        ]);
        let dir = tempdir().unwrap();
        let (store, loader) = cache(&dir, 1024);

        let err = loader.load(&format!("{base}/page.png")).unwrap_err();
        assert!(err.to_string().contains("not an image"), "got {err}");
        let err = loader.load(&format!("{base}/gone.png")).unwrap_err();
        assert!(err.to_string().contains("404"), "got {err}");

        server.join().unwrap();
        assert_eq!(store.total_size().unwrap(), 0);
        assert_eq!(fs::read_dir(dir.path().join("images")).unwrap().count(), 0);
    }

    #[test]
    fn going_over_budget_evicts_the_oldest_and_keeps_the_newest() {
        let (a, b, c) = (png(1, 16), png(2, 16), png(3, 16));
        let (base, server) = serve(vec![(200, a.clone()), (200, b.clone()), (200, c.clone())]);
        let dir = tempdir().unwrap();
        let (store, loader) = cache(&dir, 32);
        let images = dir.path().join("images");

        for name in ["a", "b", "c"] {
            loader.load(&format!("{base}/{name}.png")).unwrap();
        }
        server.join().unwrap();

        assert!(store.cached_image(&format!("{base}/a.png")).unwrap().is_none());
        assert!(!images.join(format!("{}.bin", sha1_hex(&a))).exists());
        for (name, body) in [("b", &b), ("c", &c)] {
            let image = store.cached_image(&format!("{base}/{name}.png")).unwrap().unwrap();
            assert_eq!(image.file_path, images.join(format!("{}.bin", sha1_hex(body))));
            assert!(image.file_path.exists());
        }
        assert_eq!(store.total_size().unwrap(), 32);
    }

    #[test]
    fn refetching_an_expired_image_keeps_its_file() {
        let body = png(4, 16);
        let (base, server) = serve(vec![(200, body.clone()), (200, body)]);
        let dir = tempdir().unwrap();
        let (store, loader) = cache(&dir, 16);
        let url = format!("{base}/a.png");

        loader.load(&url).unwrap();
        let mut image = store.cached_image(&url).unwrap().unwrap();
        image.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.record_image(&image).unwrap();

        loader.load(&url).unwrap();
        assert_eq!(server.join().unwrap().len(), 2);

        let image = store.cached_image(&url).unwrap().unwrap();
        assert!(image.is_fresh_at(Utc::now()));
        assert!(image.file_path.exists());
    }

    #[test]
    fn detect_mime_recognises_png_signature() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(detect_mime(&png), "image/png");
        assert!(!detect_mime(b"<html></html>").starts_with("image/"));
    }
}
