//! Orphan cleanup.
//!
//! Deployments usually store attachments under a namespace (`attachments/…`)
//! and keep the authoritative list of live files elsewhere, typically a
//! database table. [`OrphanCleanup`] walks every blob in the namespace, asks a
//! [`ReferenceSource`] which ones are still referenced, and deletes the rest.
//! The listing is finished before anything is deleted, so the store's cursor
//! never runs over a collection it is mutating.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, info, instrument};

use crate::key::{normalize_key, SEPARATOR};
use crate::{BlobAdapter, BlobKey, BlobResult};

/// Default number of names checked against the reference source at once
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Knows which namespace-relative filenames are still in use
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    /// The subset of `names` that is referenced
    async fn referenced(&self, names: &[String]) -> BlobResult<HashSet<String>>;
}

#[async_trait]
impl ReferenceSource for HashSet<String> {
    async fn referenced(&self, names: &[String]) -> BlobResult<HashSet<String>> {
        Ok(names
            .iter()
            .filter(|name| self.contains(*name))
            .cloned()
            .collect())
    }
}

/// Outcome of one cleanup run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Stored filenames seen under the namespace
    pub scanned: usize,
    /// Unreferenced names, relative to the namespace
    pub orphaned: Vec<String>,
    /// Records actually deleted (zero on a dry run)
    pub deleted: usize,
}

/// Deletes blobs in a namespace that nothing references any more
pub struct OrphanCleanup<'a> {
    adapter: &'a BlobAdapter,
    namespace: String,
    batch_size: usize,
    dry_run: bool,
}

impl<'a> OrphanCleanup<'a> {
    pub fn new<N: AsRef<str>>(adapter: &'a BlobAdapter, namespace: N) -> Self {
        Self {
            adapter,
            namespace: normalize_key(namespace.as_ref())
                .trim_end_matches(SEPARATOR)
                .to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
        }
    }

    /// Set how many names go to the reference source per call
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Report orphans without deleting them
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Namespace-relative names of every stored blob, in store order
    pub async fn stored_names(&self) -> BlobResult<Vec<String>> {
        let prefix = format!("{}{}", self.namespace, SEPARATOR);
        let mut listing = self.adapter.list(&prefix).await?;

        let mut names = Vec::new();
        while let Some(filename) = listing.next().await {
            let key = BlobKey::new(filename?);
            if let Some(name) = key.strip_namespace(&self.namespace) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Find and (unless dry-running) delete every unreferenced blob
    #[instrument(skip(self, source), fields(namespace = %self.namespace, dry_run = self.dry_run))]
    pub async fn run(&self, source: &dyn ReferenceSource) -> BlobResult<CleanupReport> {
        let names = self.stored_names().await?;
        let mut report = CleanupReport {
            scanned: names.len(),
            ..CleanupReport::default()
        };

        let mut orphaned = BTreeSet::new();
        for batch in names.chunks(self.batch_size) {
            let referenced = source.referenced(batch).await?;
            orphaned.extend(
                batch
                    .iter()
                    .filter(|name| !referenced.contains(*name))
                    .cloned(),
            );
            debug!(batch = batch.len(), referenced = referenced.len(), "checked batch");
        }
        report.orphaned = orphaned.into_iter().collect();

        if !self.dry_run {
            for name in &report.orphaned {
                let key = BlobKey::namespaced(&self.namespace, name);
                while self.adapter.delete(key.as_str()).await? {
                    report.deleted += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            orphaned = report.orphaned.len(),
            deleted = report.deleted,
            "orphan cleanup finished"
        );
        Ok(report)
    }
}
