use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use showcase_admin::app::App;
use showcase_admin::mime::detect_media_type;
use showcase_admin::models::{Config, SourceFile, StorageConfig, StorageReference};
use showcase_admin::storage::{BlobStore, S3BlobStore};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "showcase-admin")]
#[command(about = "Normalize and publish images for the showcase site")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resize an image to the site's tile size and upload it.
    Upload {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Storage prefix, e.g. `projects` or `clients`.
        #[arg(long, default_value = "projects", value_parser = parse_prefix)]
        prefix: String,
        /// Admin session token.
        #[arg(long)]
        token: Option<String>,
    },
    /// Print the retrieval URL of a stored image.
    Url {
        #[arg(value_name = "REFERENCE")]
        reference: String,
    },
    /// Delete a stored image.
    Delete {
        #[arg(value_name = "REFERENCE")]
        reference: String,
        #[arg(long)]
        token: Option<String>,
    },
}

fn parse_prefix(input: &str) -> std::result::Result<String, String> {
    let trimmed = input.trim_matches('/');
    let valid = trimmed.split('/').all(|segment| {
        !segment.is_empty()
            && segment != ".."
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    });
    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(format!(
            "Invalid prefix '{}'. Use path segments of letters, digits, '-' or '_'",
            input
        ))
    }
}

fn read_source(path: &Path) -> Result<SourceFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("image")
        .to_string();
    let media_type = detect_media_type(&bytes);
    Ok(SourceFile::new(name, media_type, bytes))
}

async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Upload {
            file,
            prefix,
            token,
        } => {
            let config = Config::from_env()?;
            let source = read_source(&file)?;
            let app = App::new(&config, token).await?;
            let reference = app.upload_to(source, &prefix).await?;
            let url = app.image_url(&reference).await?;
            info!("Stored {} as {}", file.display(), reference);
            println!("{}\n{}", reference, url);
        }
        Command::Url { reference } => {
            let store = S3BlobStore::new(&StorageConfig::from_env()?).await?;
            println!("{}", store.get_url(&StorageReference::new(reference)).await?);
        }
        Command::Delete { reference, token } => {
            let config = Config::from_env()?;
            let app = App::new(&config, token).await?;
            let reference = StorageReference::new(reference);
            app.delete_image(&reference).await?;
            info!("Deleted {}", reference);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "showcase_admin=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();

    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            match e.downcast_ref::<showcase_admin::Error>() {
                Some(app_error) => {
                    error!("{} ({:?})", app_error, app_error.kind());
                    eprintln!("{}", app_error.user_message());
                }
                None => error!("{:#}", e),
            }
            std::process::exit(1);
        }
    }
}
