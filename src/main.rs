use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use scanhub::config::AppConfig;
use scanhub::parsers::AdapterRegistry;
use scanhub::services::diff::DiffService;
use scanhub::services::import::{ImportOptions, ImportService};
use scanhub::store::{FsBlobStore, MemoryStore, PgScanStore, ScanStore};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

struct CliArgs {
    files: Vec<PathBuf>,
    workspace_id: Uuid,
    project_id: Option<Uuid>,
    scanner_hint: Option<String>,
    force: bool,
    list_formats: bool,
}

fn parse_args() -> Result<CliArgs> {
    let mut files = Vec::new();
    let mut workspace_id = None;
    let mut project_id = None;
    let mut scanner_hint = None;
    let mut force = false;
    let mut list_formats = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--workspace" => {
                let value = args.next().context("--workspace needs a UUID")?;
                workspace_id = Some(value.parse().context("invalid workspace UUID")?);
            }
            "--project" => {
                let value = args.next().context("--project needs a UUID")?;
                project_id = Some(value.parse().context("invalid project UUID")?);
            }
            "--scanner" => {
                scanner_hint = Some(args.next().context("--scanner needs an adapter name")?);
            }
            "--force" => force = true,
            "--list-formats" => list_formats = true,
            other if other.starts_with('-') => bail!("unknown flag '{other}'"),
            file => files.push(PathBuf::from(file)),
        }
    }

    if files.is_empty() && !list_formats {
        bail!(
            "usage: scanhub [--workspace UUID] [--project UUID] [--scanner NAME] [--force] FILE...\n       scanhub --list-formats"
        );
    }
    Ok(CliArgs {
        files,
        workspace_id: workspace_id.unwrap_or_else(Uuid::new_v4),
        project_id,
        scanner_hint,
        force,
        list_formats,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "scanhub=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let registry = AdapterRegistry::with_defaults();
    if args.list_formats {
        println!("{}", serde_json::to_string_pretty(&registry.adapter_infos())?);
        if args.files.is_empty() {
            return Ok(());
        }
    }
    let config = AppConfig::from_env();

    let store: Arc<dyn ScanStore> = match &config.database_url {
        Some(url) => {
            let pg = PgScanStore::connect(url, config.database_max_connections)
                .await
                .context("connecting to database")?;
            pg.migrate().await.context("running migrations")?;
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };
    let blobs = Arc::new(FsBlobStore::new(&config.storage_root));

    let service = ImportService::new(registry, store.clone(), blobs, &config);
    let diff_service = DiffService::new(store);

    tracing::info!(workspace = %args.workspace_id, files = args.files.len(), "starting import");
    for file in &args.files {
        let content = tokio::fs::read(file)
            .await
            .with_context(|| format!("reading {}", file.display()))?;
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("bad file name {}", file.display()))?;

        let options = ImportOptions {
            project_id: args.project_id,
            scanner_hint: args.scanner_hint.clone(),
            mime_type: None,
            force: args.force,
        };
        let outcome = service
            .process_scan(&content, &filename, args.workspace_id, options)
            .await
            .with_context(|| format!("importing {filename}"))?;

        println!("{}", serde_json::to_string_pretty(&outcome)?);

        let diff = diff_service.diff(outcome.import.id).await?;
        println!("{}", serde_json::to_string_pretty(&diff)?);
    }

    Ok(())
}
