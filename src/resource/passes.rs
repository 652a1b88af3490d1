//! Create passes for views and routines
//!
//! A view may select from another view or call a routine, and a routine may
//! call another routine, all created in the same run. Their create calls are
//! collected for every dataset first and then sent in passes: a call that
//! fails on a missing reference goes into the next pass, for as long as each
//! pass creates at least one object.

use super::manifest::ProjectManifest;
use super::{record_import_failure, ComponentHandler, RunContext};
use crate::gcp::bigquery;
use crate::gcp::client::GcpClient;
use crate::gcp::http::{classify, format_gcp_error, ApiFailure};
use crate::summary::RunSummary;
use anyhow::Result;
use serde_json::Value;

/// API call that creates a pending object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateCall {
    /// `tables.insert` of a view
    View,
    /// `routines.insert`
    Routine,
}

impl CreateCall {
    fn noun(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Routine => "routine",
        }
    }
}

/// One create call waiting for its pass
#[derive(Debug, Clone)]
pub struct PendingCreate {
    pub call: CreateCall,
    pub dataset_id: String,
    pub name: String,
    pub body: Value,
}

impl PendingCreate {
    pub fn describe(&self) -> String {
        format!("{} {}.{}", self.call.noun(), self.dataset_id, self.name)
    }

    async fn send(&self, client: &GcpClient) -> Result<Value> {
        match self.call {
            CreateCall::View => bigquery::insert_table(client, &self.dataset_id, &self.body).await,
            CreateCall::Routine => {
                bigquery::insert_routine(client, &self.dataset_id, &self.body).await
            }
        }
    }
}

/// Gather the create calls of one handler across every manifest dataset
///
/// A dataset whose records cannot be read counts as one error.
pub async fn collect_pending<H>(
    handler: &H,
    ctx: &RunContext<'_>,
    manifest: &ProjectManifest,
    summary: &mut RunSummary,
) -> Vec<PendingCreate>
where
    H: ComponentHandler + ?Sized,
{
    let mut pending = Vec::new();
    for dataset in &manifest.datasets {
        ctx.progress
            .set_message(format!("{} {}", handler.component(), dataset.dataset_id));
        match handler.pending_creates(ctx, dataset, summary).await {
            Ok(creates) => pending.extend(creates),
            Err(e) => {
                tracing::error!(
                    "Error reading {} data for {}: {}",
                    handler.component(),
                    dataset.dataset_id,
                    format_gcp_error(&e)
                );
                summary.error();
            }
        }
        ctx.progress.inc(1);
    }
    pending
}

/// Import several kinds as one phase, so each can wait on the others
pub async fn import_together(
    handlers: &[Box<dyn ComponentHandler>],
    ctx: &RunContext<'_>,
    manifest: &ProjectManifest,
    summary: &mut RunSummary,
) {
    let mut pending = Vec::new();
    for handler in handlers {
        pending.extend(collect_pending(handler.as_ref(), ctx, manifest, summary).await);
    }
    create_in_passes(ctx, pending, summary).await;
}

/// Send the calls, retrying missing-reference failures while passes progress
///
/// Calls still failing after the last productive pass reference something
/// outside this run and are reported as errors.
pub async fn create_in_passes(
    ctx: &RunContext<'_>,
    mut pending: Vec<PendingCreate>,
    summary: &mut RunSummary,
) {
    let mut pass = 1;
    loop {
        let mut retry: Vec<(PendingCreate, anyhow::Error)> = Vec::new();
        let mut created = 0;

        for create in pending {
            match create.send(ctx.client).await {
                Ok(_) => {
                    tracing::info!("Imported {}", create.describe());
                    created += 1;
                    summary.success();
                }
                Err(e) if classify(&e) == ApiFailure::NotFound => {
                    tracing::debug!(
                        "{} references a missing object (pass {})",
                        create.describe(),
                        pass
                    );
                    retry.push((create, e));
                }
                Err(e) => record_import_failure(summary, &create.describe(), &e),
            }
        }

        if retry.is_empty() {
            break;
        }

        if created == 0 {
            for (create, e) in &retry {
                record_import_failure(summary, &create.describe(), e);
            }
            break;
        }

        pending = retry.into_iter().map(|(create, _)| create).collect();
        pass += 1;
    }
}
