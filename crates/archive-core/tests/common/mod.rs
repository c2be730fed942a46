//! Shared fixtures for archive-core integration tests
//!
//! `FakeRemote` stands in for the mirror: it serves an HTML listing, optional
//! checksum sidecars and artifact bodies from memory, and can inject faults.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use archive_core::metrics::MetricSink;
use archive_core::{
    ArtifactFetcher, CancellationToken, FetchedBody, ListingClient, ListingResolver,
    MetadataStore, RetryPolicy, SourceConnector, SourceDescriptor, TransportError, VersionRecord,
};
use archive_fs::checksum::compute_content_checksum;
use archive_test_utils::{SourceLayout, zim};
use chrono::Utc;

pub const BASE_URL: &str = "https://mirror.test/zim/wikipedia/";
pub const SOURCE: &str = "wikipedia";

pub fn file_name(version: &str) -> String {
    format!("wikipedia_en_all_maxi_{}.zim", version)
}

/// Injected failure for the next fetch.
#[derive(Debug, Clone)]
pub enum Fault {
    Status(u16),
    Network,
    /// Serve only this many bytes while declaring the full length
    Truncate(usize),
}

#[derive(Default)]
pub struct FakeRemote {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    faults: Mutex<VecDeque<Fault>>,
    fetches: AtomicUsize,
    listing_down: AtomicBool,
    wrong_sidecar: AtomicBool,
    cancel_on_fetch: Mutex<Option<CancellationToken>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish a valid artifact for `version`.
    pub fn publish(&self, version: &str, content: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(file_name(version), content);
    }

    pub fn publish_artifact(&self, version: &str) -> Vec<u8> {
        let content = zim::artifact(version, 4096);
        self.publish(version, content.clone());
        content
    }

    pub fn fail_next(&self, fault: Fault) {
        self.faults.lock().unwrap().push_back(fault);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn set_listing_down(&self, down: bool) {
        self.listing_down.store(down, Ordering::SeqCst);
    }

    pub fn serve_wrong_sidecar(&self) {
        self.wrong_sidecar.store(true, Ordering::SeqCst);
    }

    pub fn cancel_on_fetch(&self, token: CancellationToken) {
        *self.cancel_on_fetch.lock().unwrap() = Some(token);
    }

    fn listing_html(&self) -> String {
        let files = self.files.lock().unwrap();
        let mut html = String::from("<html><body><pre>\n<a href=\"../\">../</a>\n");
        for name in files.keys() {
            html.push_str(&format!("<a href=\"{0}\">{0}</a>\n", name));
        }
        html.push_str("</pre></body></html>\n");
        html
    }
}

impl ListingClient for FakeRemote {
    fn get_text(&self, url: &str) -> Result<String, TransportError> {
        if self.listing_down.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout("listing".into()));
        }
        if url == BASE_URL {
            return Ok(self.listing_html());
        }
        let name = url
            .strip_prefix(BASE_URL)
            .and_then(|n| n.strip_suffix(".sha256"))
            .ok_or(TransportError::Status(404))?;
        let files = self.files.lock().unwrap();
        let content = files.get(name).ok_or(TransportError::Status(404))?;
        let digest = if self.wrong_sidecar.load(Ordering::SeqCst) {
            "0".repeat(64)
        } else {
            compute_content_checksum(content)
                .trim_start_matches("sha256:")
                .to_string()
        };
        Ok(format!("{}  {}\n", digest, name))
    }
}

impl ArtifactFetcher for FakeRemote {
    fn fetch(&self, url: &str) -> Result<FetchedBody, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.cancel_on_fetch.lock().unwrap().as_ref() {
            token.cancel();
        }

        let name = url.strip_prefix(BASE_URL).ok_or(TransportError::Status(404))?;
        let content = self
            .files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or(TransportError::Status(404))?;
        let declared = content.len() as u64;

        match self.faults.lock().unwrap().pop_front() {
            Some(Fault::Status(code)) => Err(TransportError::Status(code)),
            Some(Fault::Network) => Err(TransportError::Network("connection reset".into())),
            Some(Fault::Truncate(keep)) => Ok(FetchedBody {
                content_length: Some(declared),
                reader: Box::new(Cursor::new(content[..keep.min(content.len())].to_vec())),
            }),
            None => Ok(FetchedBody {
                content_length: Some(declared),
                reader: Box::new(Cursor::new(content)),
            }),
        }
    }
}

/// Metric sink that remembers every event.
#[derive(Default)]
pub struct RecordingSink {
    counters: Mutex<Vec<(String, String)>>,
    gauges: Mutex<Vec<(String, String, f64)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self, name: &str) -> usize {
        self.counters
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .count()
    }

    pub fn last_gauge(&self, name: &str) -> Option<f64> {
        self.gauges
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _, _)| n == name)
            .map(|(_, _, v)| *v)
    }
}

impl MetricSink for RecordingSink {
    fn increment_counter(&self, name: &'static str, source: &str) {
        self.counters
            .lock()
            .unwrap()
            .push((name.to_string(), source.to_string()));
    }

    fn set_gauge(&self, name: &'static str, source: &str, value: f64) {
        self.gauges
            .lock()
            .unwrap()
            .push((name.to_string(), source.to_string(), value));
    }
}

pub fn descriptor(layout: &SourceLayout) -> SourceDescriptor {
    SourceDescriptor::new(SOURCE, BASE_URL, layout.storage(), layout.backups())
}

/// Everything a cycle test needs, wired to in-memory collaborators.
pub struct Harness {
    pub layout: SourceLayout,
    pub remote: Arc<FakeRemote>,
    pub sink: Arc<RecordingSink>,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            layout: SourceLayout::new(),
            remote: FakeRemote::new(),
            sink: RecordingSink::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn descriptor(&self) -> SourceDescriptor {
        descriptor(&self.layout)
    }

    pub fn connector(&self) -> SourceConnector {
        self.connector_for(self.descriptor())
    }

    pub fn connector_for(&self, descriptor: SourceDescriptor) -> SourceConnector {
        SourceConnector::builder(descriptor)
            .resolver(Arc::new(ListingResolver::new(self.remote.clone())))
            .fetcher(self.remote.clone())
            .retry(RetryPolicy::immediate(3))
            .metrics(self.sink.clone())
            .cancellation(self.cancel.clone())
            .build()
            .unwrap()
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.descriptor().metadata_path()
    }

    pub fn store(&self) -> MetadataStore {
        MetadataStore::load(&self.metadata_path()).unwrap()
    }

    /// Install `content` as the committed artifact for `version`.
    pub fn seed_current(&self, version: &str, content: &[u8]) -> VersionRecord {
        let path = self.layout.put_storage_file(&file_name(version), content);
        let record = VersionRecord {
            version: version.to_string(),
            file_name: file_name(version),
            size_bytes: content.len() as u64,
            checksum: compute_content_checksum(content),
            downloaded_at: Utc::now(),
            path,
        };
        let mut store = self.store();
        store.append(record.clone()).unwrap();
        record
    }
}
