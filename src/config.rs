//! Run Configuration
//!
//! Validated settings for one export or import run, built from the command
//! line and the endpoint override variables.

use crate::gcp::client::Endpoints;
use crate::resource::Component;
use anyhow::Result;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REGION: &str = "europe-north1";

/// Interval between two `jobs.get` calls while waiting for a job
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    Export,
    Import,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Export => f.write_str("export"),
            Mode::Import => f.write_str("import"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: Mode,
    /// Project exported from, or imported into
    pub project_id: String,
    pub bucket: String,
    pub credentials_path: PathBuf,
    pub components: Vec<Component>,
    /// Location of created buckets, datasets, load jobs and transfer configs
    pub region: String,
    pub download_after_export: bool,
    pub upload_before_import: bool,
    pub local_dir: Option<PathBuf>,
    pub show_progress: bool,
    pub poll_interval: Duration,
    pub endpoints: Endpoints,
}

impl RunConfig {
    pub fn new(mode: Mode, project_id: &str, bucket: &str, credentials_path: PathBuf) -> Self {
        Self {
            mode,
            project_id: project_id.to_string(),
            bucket: bucket.to_string(),
            credentials_path,
            components: Component::ALL.to_vec(),
            region: DEFAULT_REGION.to_string(),
            download_after_export: false,
            upload_before_import: false,
            local_dir: None,
            show_progress: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            endpoints: Endpoints::default(),
        }
    }

    /// Check everything that can be checked before touching the network
    pub fn validate(&self) -> Result<()> {
        if !validate_project_id(&self.project_id) {
            anyhow::bail!("Invalid project id: {}", self.project_id);
        }
        if !validate_bucket_name(&self.bucket) {
            anyhow::bail!("Invalid bucket name: {}", self.bucket);
        }
        if self.components.is_empty() {
            anyhow::bail!("No components selected");
        }
        if self.region.trim().is_empty() {
            anyhow::bail!("Region must not be empty");
        }
        if self.mode == Mode::Import && self.upload_before_import && self.local_dir.is_none() {
            anyhow::bail!("--upload_before_import requires --local_dir");
        }
        Ok(())
    }

    /// Staging directory for the local sync of this run, if any
    pub fn staging_dir(&self) -> Option<PathBuf> {
        match self.mode {
            Mode::Export if self.download_after_export => Some(
                self.local_dir
                    .clone()
                    .unwrap_or_else(|| crate::storage::default_export_dir(&self.project_id)),
            ),
            Mode::Import if self.upload_before_import => self.local_dir.clone(),
            _ => None,
        }
    }
}

/// Validate GCP project ID format
/// Project IDs must be 6-30 characters, lowercase letters, digits, and hyphens
/// Must start with a letter and cannot end with a hyphen
/// Domain-scoped ids (`example.com:my-project`) carry a domain prefix
fn validate_project_id(project: &str) -> bool {
    let project = match project.split_once(':') {
        Some((domain, id)) => {
            if !validate_project_domain(domain) {
                return false;
            }
            id
        }
        None => project,
    };

    if project.len() < 6 || project.len() > 30 {
        return false;
    }

    match project.chars().next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }

    if project.ends_with('-') {
        return false;
    }

    project
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Domain part of a domain-scoped project id
fn validate_project_domain(domain: &str) -> bool {
    !domain.is_empty()
        && !domain.starts_with(['.', '-'])
        && !domain.ends_with(['.', '-'])
        && domain
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-'))
}

/// Project id usable inside a file name: `:` of domain-scoped ids and
/// anything else outside `[A-Za-z0-9._-]` becomes `_`
pub fn file_safe(project_id: &str) -> String {
    project_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Bucket names: 3-222 characters of lowercase letters, digits, `-`, `_`
/// and `.`, starting and ending with a letter or digit
fn validate_bucket_name(bucket: &str) -> bool {
    if bucket.len() < 3 || bucket.len() > 222 {
        return false;
    }

    let edge_ok = |c: Option<char>| matches!(c, Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit());
    if !edge_ok(bucket.chars().next()) || !edge_ok(bucket.chars().last()) {
        return false;
    }

    bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
}
