//! Shared fixtures for integration tests
#![allow(dead_code)]

use marvin::paths::{Downloader, PathParams, PathResolver, TemplatePathResolver};
use marvin::remote::{ApiEnvelope, RemoteClient, RemoteError, RemoteRequest};
use marvin::synthetic::SyntheticGalaxy;
use marvin::{ApiService, DataMode, InMemoryDatabase, MarvinContext, MarvinResult, VersionContext};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn mpl5() -> VersionContext {
    VersionContext::parse("v2_0_1", "2.0.2").unwrap().with_release("MPL-5")
}

pub fn dr15() -> VersionContext {
    VersionContext::parse("v2_4_3", "2.2.1").unwrap().with_release("DR15")
}

/// Archive layout with uncompressed file names.
pub fn layout(base: &Path) -> TemplatePathResolver {
    TemplatePathResolver::new(base)
        .with_template("mangacube", "redux/{drpver}/{plate}/manga-{plate}-{ifu}-LOGCUBE.fits")
        .with_template(
            "mangamap",
            "analysis/{drpver}/{dapver}/{bintype}-{template}/{plate}/manga-{plate}-{ifu}-MAPS-{bintype}-{template}.fits",
        )
        .with_template(
            "mangadap",
            "analysis/{drpver}/{dapver}/{bintype}-{template}/{plate}/manga-{plate}-{ifu}-LOGCUBE-{bintype}-{template}.fits",
        )
        .with_template("mangaffly", "vacs/firefly/{ver}/manga_firefly-{drpver}.fits")
}

/// A directory holding the synthetic galaxy's product files.
pub struct FileFixture {
    pub dir: TempDir,
    pub galaxy: SyntheticGalaxy,
    pub paths: Vec<PathBuf>,
}

impl FileFixture {
    pub fn new() -> Self {
        Self::with_galaxy(SyntheticGalaxy::new())
    }

    pub fn with_galaxy(galaxy: SyntheticGalaxy) -> Self {
        let dir = TempDir::new().unwrap();
        let paths = galaxy.write_products(&layout(dir.path())).unwrap();
        Self { dir, galaxy, paths }
    }

    pub fn layout(&self) -> TemplatePathResolver {
        layout(self.dir.path())
    }

    /// Local-only context serving these files.
    pub fn context(&self) -> MarvinContext {
        MarvinContext::local(self.dir.path(), self.galaxy.versions.clone())
            .with_paths(Arc::new(self.layout()))
    }
}

pub fn database() -> Arc<InMemoryDatabase> {
    let mut db = InMemoryDatabase::new();
    SyntheticGalaxy::new().populate(&mut db).unwrap();
    Arc::new(db)
}

/// Local-only context with a database and an empty file archive.
pub fn db_context(empty_dir: &Path) -> MarvinContext {
    MarvinContext::local(empty_dir, mpl5())
        .with_paths(Arc::new(layout(empty_dir)))
        .with_database(database())
}

/// Remote client that answers from an in-process service and records requests.
pub struct RecordingClient {
    service: ApiService,
    pub requests: Mutex<Vec<RemoteRequest>>,
}

impl RecordingClient {
    pub fn new(service: ApiService) -> Self {
        Self {
            service,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn routes(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.route()).collect()
    }
}

impl RemoteClient for RecordingClient {
    fn send(&self, request: &RemoteRequest) -> Result<ApiEnvelope, RemoteError> {
        self.requests.lock().unwrap().push(request.clone());
        self.service.send(request)
    }
}

/// Remote-mode context whose API is served from `server`.
pub fn remote_context(server: MarvinContext, empty_dir: &Path) -> (MarvinContext, Arc<RecordingClient>) {
    let client = Arc::new(RecordingClient::new(ApiService::new(server)));
    let context = MarvinContext::local(empty_dir, mpl5())
        .with_paths(Arc::new(layout(empty_dir)))
        .with_mode(DataMode::Remote)
        .with_remote(client.clone());
    (context, client)
}

/// Path resolver that counts lookups.
pub struct CountingResolver {
    inner: TemplatePathResolver,
    pub calls: AtomicUsize,
}

impl CountingResolver {
    pub fn new(inner: TemplatePathResolver) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PathResolver for CountingResolver {
    fn resolve(&self, template: &str, params: &PathParams) -> MarvinResult<Option<PathBuf>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(template, params)
    }
}

/// Downloader that writes the synthetic FIREFLY table and counts calls.
pub struct CountingDownloader {
    layout: TemplatePathResolver,
    pub calls: AtomicUsize,
}

impl CountingDownloader {
    pub fn new(layout: TemplatePathResolver) -> Self {
        Self {
            layout,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Downloader for CountingDownloader {
    fn download(&self, template: &str, params: &PathParams) -> MarvinResult<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = self.layout.full_path(template, params)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        SyntheticGalaxy::new().firefly_table()?.write(&path)?;
        Ok(path)
    }
}
