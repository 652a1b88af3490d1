use anyhow::{Context, Result};
use bqshift::app::App;
use bqshift::config::{file_safe, Mode, RunConfig, DEFAULT_REGION};
use bqshift::gcp::client::Endpoints;
use bqshift::progress::{new_progress, SuspendingWriter};
use bqshift::resource::Component;
use clap::Parser;
use indicatif::ProgressBar;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_DIR: &str = "logs";

/// Export BigQuery resources to Cloud Storage, or import them into a project
#[derive(Parser, Debug)]
#[command(name = "bqshift", version, about, long_about = None)]
struct Args {
    /// Export from the project, or import into it
    #[arg(value_enum)]
    mode: Mode,

    /// Project to export from or import into
    project_id: String,

    /// Bucket holding the exported objects (created if missing)
    bucket_name: String,

    /// Service account key file
    credentials_path: PathBuf,

    /// Components to process, space or comma separated (default: all)
    #[arg(long, value_enum, num_args = 1.., value_delimiter = ',')]
    components: Vec<Component>,

    /// Location for created buckets, datasets, jobs and scheduled queries
    #[arg(long, default_value = DEFAULT_REGION)]
    region: String,

    /// Copy the bucket into the local directory after exporting
    #[arg(long = "download_after_export")]
    download_after_export: bool,

    /// Upload the local directory to the bucket before importing
    #[arg(long = "upload_before_import")]
    upload_before_import: bool,

    /// Local staging directory
    #[arg(long = "local_dir")]
    local_dir: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

impl Args {
    fn into_config(self) -> RunConfig {
        let mut config = RunConfig::new(
            self.mode,
            &self.project_id,
            &self.bucket_name,
            self.credentials_path,
        );
        if !self.components.is_empty() {
            config.components = self.components;
        }
        config.region = self.region;
        config.download_after_export = self.download_after_export;
        config.upload_before_import = self.upload_before_import;
        config.local_dir = self.local_dir;
        config.show_progress = !self.no_progress;
        config.endpoints = Endpoints::from_env();
        config
    }
}

fn get_log_path(mode: Mode, project_id: &str) -> PathBuf {
    PathBuf::from(LOG_DIR).join(format!(
        "{}-{}-{}.log",
        mode,
        file_safe(project_id),
        chrono::Local::now().format("%Y%m%d%H%M%S")
    ))
}

fn setup_logging(
    mode: Mode,
    project_id: &str,
    progress: &ProgressBar,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_path = get_log_path(mode, project_id);

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(SuspendingWriter::new(progress.clone()))
                .with_target(false),
        )
        .init();

    tracing::info!("Log file: {:?}", log_path);

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.into_config();
    // The project id is part of the log file name
    config.validate()?;

    let label = match config.mode {
        Mode::Export => "Exporting",
        Mode::Import => "Importing",
    };
    let progress = new_progress(config.show_progress, label);
    let _log_guard = setup_logging(config.mode, &config.project_id, &progress)?;

    let result = async { App::new(config)?.run(&progress).await }.await;

    match result {
        Ok(summary) => {
            println!("Run completed: {}", summary);
            Ok(())
        }
        Err(err) => {
            progress.abandon();
            tracing::error!("Run aborted: {:#}", err);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_args() {
        let args = Args::try_parse_from(["bqshift", "export", "my-project", "bkt", "key.json"]).unwrap();
        let config = args.into_config();
        assert_eq!(config.mode, Mode::Export);
        assert_eq!(config.region, "europe-north1");
        assert_eq!(config.components, Component::ALL.to_vec());
        assert!(config.show_progress);
    }

    #[test]
    fn test_parse_components_space_and_comma() {
        let spaced = Args::try_parse_from([
            "bqshift", "import", "my-project", "bkt", "key.json", "--components", "views", "tables",
        ])
        .unwrap();
        assert_eq!(spaced.components, vec![Component::Views, Component::Tables]);

        let comma = Args::try_parse_from([
            "bqshift",
            "import",
            "my-project",
            "bkt",
            "key.json",
            "--components",
            "external_tables,scheduled_queries",
        ])
        .unwrap();
        assert_eq!(
            comma.components,
            vec![Component::ExternalTables, Component::ScheduledQueries]
        );
    }

    #[test]
    fn test_parse_staging_flags() {
        let args = Args::try_parse_from([
            "bqshift",
            "import",
            "my-project",
            "bkt",
            "key.json",
            "--upload_before_import",
            "--local_dir",
            "staging",
            "--region",
            "EU",
            "--no-progress",
        ])
        .unwrap();
        let config = args.into_config();
        assert!(config.upload_before_import);
        assert_eq!(config.local_dir, Some(PathBuf::from("staging")));
        assert_eq!(config.region, "EU");
        assert!(!config.show_progress);
    }

    #[test]
    fn test_unknown_component_is_rejected() {
        let parsed = Args::try_parse_from([
            "bqshift", "export", "my-project", "bkt", "key.json", "--components", "models",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_log_path() {
        let path = get_log_path(Mode::Import, "my-project");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(path.starts_with("logs"));
        assert!(name.starts_with("import-my-project-"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_log_path_stays_in_log_dir() {
        let path = get_log_path(Mode::Export, "../../tmp/x");
        assert_eq!(path.parent(), Some(std::path::Path::new(LOG_DIR)));

        let scoped = get_log_path(Mode::Export, "example.com:my-project");
        let name = scoped.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("export-example.com_my-project-"));
    }

    #[test]
    fn test_invalid_project_fails_before_logging() {
        let args =
            Args::try_parse_from(["bqshift", "export", "../../tmp/x", "bkt", "key.json"]).unwrap();
        assert!(args.into_config().validate().is_err());
    }
}
