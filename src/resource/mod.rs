//! Resource handlers
//!
//! Every exportable resource kind implements [`ComponentHandler`]. The
//! orchestrator never branches on the kind itself: it walks one of the
//! declared orders below and calls the handler found in the [`registry`].
//!
//! # Module Structure
//!
//! - [`registry`] - Kind to handler lookup
//! - [`manifest`] - Project manifest (dataset list) and the datasets import phase
//! - [`passes`] - Create passes shared by views and routines
//! - [`paths`] - Deterministic object names
//! - [`record`] - Helpers shared by the record types
//! - [`sql`] - Project qualifier rewriting in SQL text
//! - one module per kind

pub mod external_tables;
pub mod manifest;
pub mod passes;
pub mod paths;
pub mod record;
pub mod registry;
pub mod routines;
pub mod scheduled_queries;
pub mod sql;
pub mod tables;
pub mod views;

use crate::gcp::client::GcpClient;
use crate::gcp::http::{classify, format_gcp_error, ApiFailure};
use crate::storage::ObjectStore;
use crate::summary::RunSummary;
use anyhow::Result;
use async_trait::async_trait;
use clap::ValueEnum;
use indicatif::ProgressBar;
use manifest::{DatasetEntry, ProjectManifest};
use passes::PendingCreate;
use std::fmt;
use std::time::Duration;

pub use registry::{handler_for, handlers_in_order};

/// Resource kind selectable with `--components`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum Component {
    #[value(name = "routines")]
    Routines,
    #[value(name = "views")]
    Views,
    #[value(name = "external_tables")]
    ExternalTables,
    #[value(name = "tables")]
    Tables,
    #[value(name = "scheduled_queries")]
    ScheduledQueries,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Routines,
        Component::Views,
        Component::ExternalTables,
        Component::Tables,
        Component::ScheduledQueries,
    ];

    /// Name used on the command line and as the object prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routines => "routines",
            Self::Views => "views",
            Self::ExternalTables => "external_tables",
            Self::Tables => "tables",
            Self::ScheduledQueries => "scheduled_queries",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order in which components are exported
pub const EXPORT_ORDER: &[Component] = &[
    Component::Routines,
    Component::Views,
    Component::ExternalTables,
    Component::Tables,
    Component::ScheduledQueries,
];

/// Dependency order for import, run after the datasets phase.
/// Anything a view, routine or scheduled query may reference comes first.
/// Views and routines are adjacent and share one phase of create passes.
pub const IMPORT_ORDER: &[Component] = &[
    Component::Tables,
    Component::ExternalTables,
    Component::Views,
    Component::Routines,
    Component::ScheduledQueries,
];

/// The selected components, sorted by `order`
pub fn in_order(selected: &[Component], order: &[Component]) -> Vec<Component> {
    order
        .iter()
        .copied()
        .filter(|c| selected.contains(c))
        .collect()
}

/// Everything a handler needs for one run
pub struct RunContext<'a> {
    /// Client bound to the project being exported from or imported into
    pub client: &'a GcpClient,
    pub store: &'a dyn ObjectStore,
    /// Location for created datasets, jobs and transfer configs
    pub region: &'a str,
    pub poll_interval: Duration,
    pub progress: &'a ProgressBar,
}

impl RunContext<'_> {
    pub fn project_id(&self) -> &str {
        &self.client.project_id
    }
}

/// Export/import of one resource kind
///
/// Dataset-scoped kinds implement the `*_dataset` methods; the default
/// `export`/`import` run them for every manifest dataset and turn a failed
/// dataset into a logged error. Project-scoped kinds override `export` and
/// `import` instead. Kinds whose objects may reference each other in the same
/// run return their create calls from `pending_creates` and are imported in
/// [`passes`].
#[async_trait]
pub trait ComponentHandler: Send + Sync {
    fn component(&self) -> Component;

    /// Progress units this handler reports for a run
    fn work_units(&self, manifest: &ProjectManifest) -> u64 {
        manifest.datasets.len() as u64
    }

    async fn export_dataset(
        &self,
        _ctx: &RunContext<'_>,
        _dataset: &DatasetEntry,
        _summary: &mut RunSummary,
    ) -> Result<()> {
        Ok(())
    }

    async fn import_dataset(
        &self,
        _ctx: &RunContext<'_>,
        _dataset: &DatasetEntry,
        _summary: &mut RunSummary,
    ) -> Result<()> {
        Ok(())
    }

    /// Whether imports go through `pending_creates` and the create passes
    fn creates_in_passes(&self) -> bool {
        false
    }

    /// Create calls for one dataset, sent later by [`passes::create_in_passes`]
    async fn pending_creates(
        &self,
        _ctx: &RunContext<'_>,
        _dataset: &DatasetEntry,
        _summary: &mut RunSummary,
    ) -> Result<Vec<PendingCreate>> {
        Ok(Vec::new())
    }

    async fn export(
        &self,
        ctx: &RunContext<'_>,
        manifest: &ProjectManifest,
        summary: &mut RunSummary,
    ) -> Result<()> {
        for dataset in &manifest.datasets {
            ctx.progress
                .set_message(format!("{} {}", self.component(), dataset.dataset_id));
            if let Err(e) = self.export_dataset(ctx, dataset, summary).await {
                tracing::error!(
                    "Error exporting {} from {}: {}",
                    self.component(),
                    dataset.dataset_id,
                    format_gcp_error(&e)
                );
                summary.error();
            }
            ctx.progress.inc(1);
        }
        Ok(())
    }

    async fn import(
        &self,
        ctx: &RunContext<'_>,
        manifest: &ProjectManifest,
        summary: &mut RunSummary,
    ) -> Result<()> {
        if self.creates_in_passes() {
            let pending = passes::collect_pending(self, ctx, manifest, summary).await;
            passes::create_in_passes(ctx, pending, summary).await;
            return Ok(());
        }

        for dataset in &manifest.datasets {
            ctx.progress
                .set_message(format!("{} {}", self.component(), dataset.dataset_id));
            if let Err(e) = self.import_dataset(ctx, dataset, summary).await {
                tracing::error!(
                    "Error importing {} into {}: {}",
                    self.component(),
                    dataset.dataset_id,
                    format_gcp_error(&e)
                );
                summary.error();
            }
            ctx.progress.inc(1);
        }
        Ok(())
    }
}

/// Split ordered handlers into import phases
///
/// Adjacent handlers that create in passes form one phase; every other
/// handler is a phase of its own.
pub fn import_phases(
    handlers: &[Box<dyn ComponentHandler>],
) -> impl Iterator<Item = &[Box<dyn ComponentHandler>]> {
    handlers.chunk_by(|a, b| a.creates_in_passes() && b.creates_in_passes())
}

/// Log and count the failure of a single create call
///
/// An object that already exists is a warning; missing references and
/// permission problems are errors. The caller moves on either way.
pub fn record_import_failure(summary: &mut RunSummary, what: &str, error: &anyhow::Error) {
    match classify(error) {
        ApiFailure::AlreadyExists => {
            tracing::warn!("{} already exists, skipping", what);
            summary.warning();
        }
        ApiFailure::PermissionDenied => {
            tracing::error!("Permission denied importing {}: {}", what, format_gcp_error(error));
            summary.error();
        }
        ApiFailure::NotFound => {
            tracing::error!(
                "Missing reference importing {}: {}",
                what,
                format_gcp_error(error)
            );
            summary.error();
        }
        _ => {
            tracing::error!("Error importing {}: {}", what, format_gcp_error(error));
            summary.error();
        }
    }
}

/// Load every record of one kind and scope from the store
///
/// Objects that cannot be read or parsed are logged and counted as errors.
pub async fn load_records<T: serde::de::DeserializeOwned>(
    store: &dyn ObjectStore,
    component: Component,
    scope: &str,
    summary: &mut RunSummary,
) -> Result<Vec<(String, T)>> {
    let mut names: Vec<(String, String)> = store
        .list(&paths::scope_prefix(component, scope))
        .await?
        .into_iter()
        .filter_map(|object| {
            let (found_scope, name) = paths::parse_record_object(component, &object)?;
            (found_scope == scope).then_some((object, name))
        })
        .collect();
    names.sort();

    let mut records = Vec::with_capacity(names.len());
    for (object, name) in names {
        match crate::storage::get_json::<T>(store, &object).await {
            Ok(record) => records.push((name, record)),
            Err(e) => {
                tracing::error!("Error reading {}: {:#}", object, e);
                summary.error();
            }
        }
    }
    Ok(records)
}
