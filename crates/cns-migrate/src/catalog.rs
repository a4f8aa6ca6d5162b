//! Enumeration of the volumes resident on the source datastore.
//!
//! [`VolumePages`] walks the platform's cursor one page at a time and stops at
//! whichever terminal signal arrives first: an empty page, or a cursor whose
//! offset has reached the total record count. [`VolumeCatalog`] drains it into
//! a de-duplicated index keyed by volume id.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{MigrateError, Result};
use crate::storage::{BackendRef, QueryCursor, StorageClient, VolumeQuery};
use crate::types::StorageVolume;

/// Finite producer of volume pages for one backend.
pub struct VolumePages<'a> {
    client: &'a dyn StorageClient,
    query: VolumeQuery,
    done: bool,
}

impl<'a> VolumePages<'a> {
    /// Producer positioned before the first page of `backend`.
    pub fn new(client: &'a dyn StorageClient, backend: BackendRef, page_limit: u64) -> Self {
        Self {
            client,
            query: VolumeQuery {
                backend,
                cursor: None,
                page_limit,
            },
            done: false,
        }
    }

    /// Fetches the next page, or `None` once the walk is finished.
    pub async fn next_page(&mut self) -> Result<Option<Vec<StorageVolume>>> {
        if self.done {
            return Ok(None);
        }

        let page = self
            .client
            .query_volumes(&self.query)
            .await
            .map_err(MigrateError::query)?;
        let cursor = page.cursor;
        debug!(
            backend = %self.query.backend.name,
            returned = page.volumes.len(),
            offset = cursor.offset,
            total = cursor.total_records,
            "fetched volume page"
        );

        if page.volumes.is_empty() || cursor.offset == cursor.total_records {
            self.done = true;
            return Ok(Some(page.volumes));
        }

        if !self.advances(&cursor) {
            self.done = true;
            return Err(MigrateError::Query(format!(
                "cursor did not advance past offset {} (total {})",
                cursor.offset, cursor.total_records
            )));
        }

        self.query.cursor = Some(cursor);
        Ok(Some(page.volumes))
    }

    fn advances(&self, next: &QueryCursor) -> bool {
        match self.query.cursor {
            None => true,
            Some(prev) => next.offset > prev.offset,
        }
    }
}

/// De-duplicated set of volumes resident on one backend.
#[derive(Debug, Clone, Default)]
pub struct VolumeCatalog {
    backend: Option<BackendRef>,
    volumes: HashMap<String, StorageVolume>,
}

impl VolumeCatalog {
    /// Resolves `backend_name` in `datacenter` and enumerates every volume on it.
    ///
    /// Any page failure aborts the load; a partial catalog is never returned.
    pub async fn load(
        client: &dyn StorageClient,
        datacenter: &str,
        backend_name: &str,
        page_limit: u64,
    ) -> Result<Self> {
        let backend = client
            .resolve_backend(datacenter, backend_name)
            .await
            .map_err(|e| MigrateError::BackendResolution {
                name: backend_name.to_string(),
                datacenter: datacenter.to_string(),
                reason: e.to_string(),
            })?;
        Self::load_from(client, backend, page_limit).await
    }

    /// Enumerates every volume on an already resolved backend.
    pub async fn load_from(
        client: &dyn StorageClient,
        backend: BackendRef,
        page_limit: u64,
    ) -> Result<Self> {
        let mut pages = VolumePages::new(client, backend.clone(), page_limit);
        let mut catalog = VolumeCatalog {
            backend: Some(backend),
            volumes: HashMap::new(),
        };
        while let Some(page) = pages.next_page().await? {
            for volume in page {
                catalog.insert(volume);
            }
        }
        info!(
            backend = %catalog.backend.as_ref().map(|b| b.name.as_str()).unwrap_or_default(),
            volumes = catalog.len(),
            "loaded volume catalog"
        );
        Ok(catalog)
    }

    fn insert(&mut self, volume: StorageVolume) {
        self.volumes.entry(volume.id.clone()).or_insert(volume);
    }

    /// Whether `volume_id` is resident on the catalogued backend.
    pub fn contains(&self, volume_id: &str) -> bool {
        self.volumes.contains_key(volume_id)
    }

    /// Backend the catalog was loaded from.
    pub fn backend(&self) -> Option<&BackendRef> {
        self.backend.as_ref()
    }

    /// Number of distinct volumes.
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Whether the backend holds no volumes.
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}
