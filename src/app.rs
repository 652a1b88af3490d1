//! Run Orchestration
//!
//! Sequences one export or import run: bucket check, manifest, the selected
//! component handlers in their declared order, and the optional local sync.

use crate::config::{Mode, RunConfig};
use crate::gcp::auth::GcpCredentials;
use crate::gcp::client::GcpClient;
use crate::resource::manifest::{ensure_datasets, ProjectManifest};
use crate::resource::passes::import_together;
use crate::resource::{
    handlers_in_order, import_phases, ComponentHandler, RunContext, EXPORT_ORDER, IMPORT_ORDER,
};
use crate::storage::{download_all, put_json, upload_all, GcsStore};
use crate::summary::RunSummary;
use anyhow::{Context, Result};
use indicatif::ProgressBar;

pub struct App {
    pub config: RunConfig,
    client: GcpClient,
    store: GcsStore,
}

impl App {
    /// Build the clients from the service account key of `config`
    pub fn new(config: RunConfig) -> Result<Self> {
        let credentials = GcpCredentials::from_file(&config.credentials_path)?;
        Self::with_credentials(config, credentials)
    }

    pub fn with_credentials(config: RunConfig, credentials: GcpCredentials) -> Result<Self> {
        let client = GcpClient::new(credentials, &config.project_id, config.endpoints.clone())?;
        let store = GcsStore::new(client.clone(), &config.bucket);
        Ok(Self {
            config,
            client,
            store,
        })
    }

    /// Run the configured mode
    ///
    /// Only setup failures (bucket, manifest) are returned as `Err`; failures
    /// of single resources are logged and counted in the summary.
    pub async fn run(&self, progress: &ProgressBar) -> Result<RunSummary> {
        tracing::info!(
            "Starting {} of project {} (bucket {}, region {}, components: {})",
            self.config.mode,
            self.config.project_id,
            self.config.bucket,
            self.config.region,
            self.config
                .components
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        self.store.ensure_bucket(&self.config.region).await?;

        let summary = match self.config.mode {
            Mode::Export => self.export(progress).await?,
            Mode::Import => self.import(progress).await?,
        };

        progress.finish_with_message("done");
        tracing::info!(
            "{} of project {} finished: {}",
            self.config.mode,
            self.config.project_id,
            summary
        );
        Ok(summary)
    }

    fn context<'a>(&'a self, progress: &'a ProgressBar) -> RunContext<'a> {
        RunContext {
            client: &self.client,
            store: &self.store,
            region: &self.config.region,
            poll_interval: self.config.poll_interval,
            progress,
        }
    }

    async fn export(&self, progress: &ProgressBar) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        let manifest = ProjectManifest::collect(&self.client)
            .await
            .with_context(|| format!("Failed to list datasets of {}", self.config.project_id))?;
        let manifest_object = ProjectManifest::object_name(&self.config.project_id);
        put_json(&self.store, &manifest_object, &manifest)
            .await
            .with_context(|| format!("Failed to write {}", manifest_object))?;
        tracing::info!(
            "Wrote {} with {} datasets",
            manifest_object,
            manifest.datasets.len()
        );

        let handlers = handlers_in_order(&self.config.components, EXPORT_ORDER);
        progress.set_length(work_units(&handlers, &manifest));

        let ctx = self.context(progress);
        for handler in &handlers {
            tracing::info!("Exporting {}", handler.component());
            if let Err(e) = handler.export(&ctx, &manifest, &mut summary).await {
                tracing::error!("Error exporting {}: {:#}", handler.component(), e);
                summary.error();
            }
        }

        if let Some(dir) = self.config.staging_dir() {
            progress.set_message(format!("downloading to {}", dir.display()));
            let synced = download_all(&self.store, &dir)
                .await
                .with_context(|| format!("Failed to download bucket to {}", dir.display()))?;
            tracing::info!("Downloaded bucket {} to {}: {}", self.config.bucket, dir.display(), synced);
            summary.merge(synced);
        }

        Ok(summary)
    }

    async fn import(&self, progress: &ProgressBar) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        if let Some(dir) = self.config.staging_dir() {
            let synced = upload_all(&self.store, &dir)
                .await
                .with_context(|| format!("Failed to upload {}", dir.display()))?;
            tracing::info!("Uploaded {} to bucket {}: {}", dir.display(), self.config.bucket, synced);
            summary.merge(synced);
        }

        let manifest = ProjectManifest::load(&self.store).await?;
        if manifest.project_id == self.config.project_id {
            tracing::warn!(
                "Importing into the project the bucket was exported from ({})",
                manifest.project_id
            );
        }

        let handlers = handlers_in_order(&self.config.components, IMPORT_ORDER);
        progress.set_length(manifest.datasets.len() as u64 + work_units(&handlers, &manifest));

        let ctx = self.context(progress);
        progress.set_message("datasets");
        ensure_datasets(&ctx, &manifest, &mut summary).await;
        progress.inc(manifest.datasets.len() as u64);

        for phase in import_phases(&handlers) {
            let names: Vec<String> = phase.iter().map(|h| h.component().to_string()).collect();
            tracing::info!("Importing {}", names.join(", "));

            if let [handler] = phase {
                if let Err(e) = handler.import(&ctx, &manifest, &mut summary).await {
                    tracing::error!("Error importing {}: {:#}", handler.component(), e);
                    summary.error();
                }
            } else {
                import_together(phase, &ctx, &manifest, &mut summary).await;
            }
        }

        Ok(summary)
    }
}

fn work_units(handlers: &[Box<dyn ComponentHandler>], manifest: &ProjectManifest) -> u64 {
    handlers.iter().map(|h| h.work_units(manifest)).sum()
}
