//! Kubernetes Disk Store
//!
//! Persists inventory records as cluster-scoped `Disk` resources.

use crate::crd::Disk;
use crate::domain::ports::DiskStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, instrument, warn};

/// Field manager recorded on status patches
pub const FIELD_MANAGER: &str = "disk-inventory";

const KIND: &str = "Disk";

/// `DiskStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeDiskStore {
    api: Api<Disk>,
}

impl KubeDiskStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    /// Write the status of a freshly created record
    async fn write_status(&self, disk: &Disk) -> Result<Disk> {
        let patch = serde_json::json!({ "status": disk.status });
        let patched = self
            .api
            .patch_status(
                &disk.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(patched)
    }
}

fn api_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

#[async_trait]
impl DiskStore for KubeDiskStore {
    #[instrument(skip(self, disk), fields(disk = %disk.name_any()))]
    async fn create(&self, disk: &Disk) -> Result<Disk> {
        let name = disk.name_any();
        let created = match self.api.create(&PostParams::default(), disk).await {
            Ok(created) => created,
            Err(e) if api_code(&e) == Some(409) => {
                return Err(Error::ResourceExists {
                    kind: KIND.to_string(),
                    name,
                })
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Created Disk {}", name);

        if disk.status.is_none() {
            return Ok(created);
        }

        // the status subresource is ignored on create
        match self.write_status(disk).await {
            Ok(patched) => Ok(patched),
            Err(e) => {
                warn!("Failed to write status of Disk {}: {}", name, e);
                Ok(created)
            }
        }
    }

    #[instrument(skip(self))]
    async fn get(&self, name: &str) -> Result<Disk> {
        match self.api.get(name).await {
            Ok(disk) => Ok(disk),
            Err(e) if api_code(&e) == Some(404) => Err(Error::ResourceNotFound {
                kind: KIND.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, disk), fields(disk = %disk.name_any()))]
    async fn replace(&self, disk: &Disk) -> Result<Disk> {
        let name = disk.name_any();
        match self.api.replace(&name, &PostParams::default(), disk).await {
            Ok(replaced) => Ok(replaced),
            Err(e) if api_code(&e) == Some(404) => Err(Error::ResourceNotFound {
                kind: KIND.to_string(),
                name,
            }),
            Err(e) => Err(e.into()),
        }
    }
}
