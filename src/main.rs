use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

use teadal_bundler::bundle::Bundle;
use teadal_bundler::errors::BundlerError;
use teadal_bundler::policy::{intent, render, Service};
use teadal_bundler::repository::{self, Location, MinioRepository};
use teadal_bundler::settings::Settings;
use teadal_bundler::web;

const DEFAULT_LOCATION: &str = "minio://latest";

#[derive(Parser, Debug)]
#[command(
    name = "teadal-bundler",
    version,
    about = "Compile OpenAPI access-policy annotations into an OPA bundle"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage services in a bundle
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
    /// Print the service list of a bundle
    Describe {
        /// Bundle location (minio://<key>, file://<path> or a bare path)
        location: Option<String>,
    },
    /// Run the HTTP surface against the configured object store
    Serve,
}

#[derive(Subcommand, Debug)]
enum ServiceAction {
    /// Add or update a service from an annotated API description
    Add {
        name: String,
        spec_path: PathBuf,
        location: Option<String>,
        /// Create a fresh bundle instead of loading the existing one
        #[arg(long)]
        new: bool,
    },
    /// Remove a service and its modules
    Remove {
        name: String,
        location: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let settings = Settings::load()?;
    render::preload_templates();

    match cli.command {
        Command::Service { action } => match action {
            ServiceAction::Add {
                name,
                spec_path,
                location,
                new,
            } => add_service(&settings, &name, &spec_path, location.as_deref(), new).await?,
            ServiceAction::Remove { name, location } => {
                remove_service(&settings, &name, location.as_deref()).await?
            }
        },
        Command::Describe { location } => describe(&settings, location.as_deref()).await?,
        Command::Serve => {
            let repo = MinioRepository::new(&settings);
            repo.ensure_bucket().await?;
            web::serve(settings, Arc::new(repo)).await?;
        }
    }

    Ok(())
}

async fn add_service(
    settings: &Settings,
    name: &str,
    spec_path: &PathBuf,
    location: Option<&str>,
    new: bool,
) -> Result<(), BundlerError> {
    let bytes = std::fs::read(spec_path)?;
    let (policies, idp_url) = intent::parse_document(&bytes)?;
    let service = Service::new(name, idp_url, policies);

    let location = Location::parse(location.unwrap_or(DEFAULT_LOCATION), settings);
    let (repo, key) = repository::open(&location, settings).await?;

    let bundle = if new {
        Bundle::new()
    } else {
        repo.get(&key).await?
    };
    let next = bundle.with_service(&service)?;
    repo.save(&key, &next).await?;

    tracing::info!(service = %name, services = ?next.services(), "bundle updated");
    Ok(())
}

async fn remove_service(
    settings: &Settings,
    name: &str,
    location: Option<&str>,
) -> Result<(), BundlerError> {
    let location = Location::parse(location.unwrap_or(DEFAULT_LOCATION), settings);
    let (repo, key) = repository::open(&location, settings).await?;

    let bundle = repo.get(&key).await?;
    let next = bundle.without_service(name)?;
    repo.save(&key, &next).await?;

    tracing::info!(service = %name, services = ?next.services(), "bundle updated");
    Ok(())
}

async fn describe(settings: &Settings, location: Option<&str>) -> Result<(), BundlerError> {
    let location = Location::parse(location.unwrap_or(DEFAULT_LOCATION), settings);
    let (repo, key) = repository::open(&location, settings).await?;

    let bundle = repo.get(&key).await?;
    let out = serde_json::json!({ "services": bundle.services() });
    println!("{out}");
    Ok(())
}
