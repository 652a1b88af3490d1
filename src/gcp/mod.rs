//! GCP API interaction module
//!
//! REST plumbing for the three services the tool talks to, on top of one
//! authenticated client.
//!
//! # Module Structure
//!
//! - [`auth`] - Service account credentials with token caching
//! - [`client`] - Main GCP client, endpoints, URL builders and pagination
//! - [`http`] - HTTP utilities and the typed [`http::ApiError`]
//! - [`bigquery`] - Datasets, tables, routines and jobs
//! - [`storage`] - Buckets and objects
//! - [`transfer`] - Scheduled query transfer configs
//!
//! # Example
//!
//! ```ignore
//! use bqshift::gcp::{auth::GcpCredentials, bigquery, client::{Endpoints, GcpClient}};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let credentials = GcpCredentials::from_file("key.json".as_ref())?;
//!     let client = GcpClient::new(credentials, "my-project", Endpoints::default())?;
//!     let datasets = bigquery::list_datasets(&client).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod bigquery;
pub mod client;
pub mod http;
pub mod storage;
pub mod transfer;
