//! In-Memory Disk Store
//!
//! A `DiskStore` that keeps records in a map, counts calls and can be made
//! to fail. Resource versions behave like the API server's: every write
//! bumps them and a replace with a stale version is rejected.

use crate::crd::Disk;
use crate::domain::ports::DiskStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::ResourceExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

const KIND: &str = "Disk";

/// `DiskStore` held in memory
#[derive(Default)]
pub struct MemoryDiskStore {
    records: RwLock<BTreeMap<String, Disk>>,
    last_replaced: RwLock<Option<Disk>>,
    version: AtomicU64,
    creates: AtomicUsize,
    gets: AtomicUsize,
    replaces: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryDiskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record directly, as if another writer had created it
    pub fn insert(&self, mut disk: Disk) {
        disk.metadata.resource_version = Some(self.next_version());
        self.records.write().insert(disk.name_any(), disk);
    }

    /// Make every call fail with an I/O error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn record(&self, name: &str) -> Option<Disk> {
        self.records.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// The record most recently passed to `replace`
    pub fn last_replaced(&self) -> Option<Disk> {
        self.last_replaced.read().clone()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn replaces(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn check_failing(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "store unavailable",
            )));
        }
        Ok(())
    }
}

fn record_name(disk: &Disk) -> Result<String> {
    disk.metadata
        .name
        .clone()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::Internal("Disk record has no name".to_string()))
}

#[async_trait]
impl DiskStore for MemoryDiskStore {
    async fn create(&self, disk: &Disk) -> Result<Disk> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;

        let name = record_name(disk)?;
        let mut records = self.records.write();
        if records.contains_key(&name) {
            return Err(Error::ResourceExists {
                kind: KIND.to_string(),
                name,
            });
        }

        let mut created = disk.clone();
        created.metadata.resource_version = Some(self.next_version());
        records.insert(name, created.clone());
        Ok(created)
    }

    async fn get(&self, name: &str) -> Result<Disk> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;

        self.records
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: KIND.to_string(),
                name: name.to_string(),
            })
    }

    async fn replace(&self, disk: &Disk) -> Result<Disk> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        *self.last_replaced.write() = Some(disk.clone());
        self.check_failing()?;

        let name = record_name(disk)?;
        let mut records = self.records.write();
        let existing = records.get(&name).ok_or_else(|| Error::ResourceNotFound {
            kind: KIND.to_string(),
            name: name.clone(),
        })?;

        if existing.metadata.resource_version != disk.metadata.resource_version {
            return Err(Error::SyncFailed {
                name,
                reason: "resource version conflict".to_string(),
            });
        }

        // status is owned by the status subresource
        let mut replaced = disk.clone();
        replaced.status = existing.status.clone();
        replaced.metadata.resource_version = Some(self.next_version());
        records.insert(name, replaced.clone());
        Ok(replaced)
    }
}
