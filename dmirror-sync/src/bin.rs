use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use dmirror::{loc, RemoteRoot};
use dmirror_sync::{
    oauth2,
    storage::{gdrive::GoogleDrive, id::IdBuf, CreateFolder, FindById, FindByName},
    PersistCache, SyncEngine, SyncOptions,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
mod posix;

/// Id alias of the root folder of "My Drive"
const DRIVE_ROOT: &str = "root";

#[derive(Parser)]
#[command(name = "dmirror")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Pass "refresh" to discard cached credentials and authorize again
    mode: Option<String>,
}

impl Cli {
    fn force_refresh(&self) -> bool {
        self.mode.as_deref() == Some("refresh")
    }
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("Could not start the async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(unix)]
fn init_logging() {
    posix::init_logging();
}

#[cfg(not(unix))]
fn init_logging() {
    env_logger::init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_file = loc::config_file()?;
    if !config_file.exists() {
        anyhow::bail!("No such config file: {config_file}");
    }
    log::info!("Found config file: {config_file}");

    let config = dmirror::Config::load_from_file(&config_file).await?;
    log::trace!("Loaded config: {config:?}");

    let local_dir = config
        .local_dir
        .canonicalize_utf8()
        .with_context(|| format!("No such local directory: {}", config.local_dir))?;

    let secret_file = loc::oauth_secret_file()?;
    let secret = dmirror::oauth::load_google_secret(&secret_file).await?;
    log::info!(
        "Initializing Google Drive storage with client-id {}",
        secret.client_id.as_str()
    );

    let client = reqwest::Client::builder().build()?;
    let auth = oauth2::Client::new(
        secret,
        loc::token_cache_file()?,
        Some(client.clone()),
        cli.force_refresh(),
    )
    .await?;
    let drive = GoogleDrive::new(auth, client)
        .await
        .context("Could not access Google Drive")?;
    drive.persist_cache().await?;

    let parent = remote_parent(&drive, config.remote.as_ref()).await?;

    let cancel = CancellationToken::new();
    let signals = handle_shutdown_signals(cancel.clone());

    let options = SyncOptions {
        overwrite: config.overwrite,
        concurrency: config.concurrency,
    };
    let engine = SyncEngine::new(drive, options).with_cancel(cancel);
    let report = engine.sync(&local_dir, &parent).await;
    signals.abort();
    let report = report?;

    for failure in report.failures.iter() {
        log::error!("{}: {}", failure.path, failure.error);
    }
    if !report.is_clean() {
        log::warn!("{local_dir} is not completely mirrored, run again to retry");
    }

    engine.store().persist_cache().await?;
    Ok(())
}

/// Resolves the configured remote folder into which the local tree is mirrored.
async fn remote_parent<R>(store: &R, remote: Option<&RemoteRoot>) -> anyhow::Result<IdBuf>
where
    R: FindByName + FindById + CreateFolder,
{
    match remote {
        None => Ok(IdBuf::from(DRIVE_ROOT)),
        Some(RemoteRoot::Id(id)) => {
            let id = IdBuf::from(id.as_str());
            let name = store
                .find_by_id(&id)
                .await?
                .with_context(|| format!("No remote folder with id {id}"))?;
            log::info!("mirroring into \"{name}\" ({id})");
            Ok(id)
        }
        Some(RemoteRoot::Name(name)) => match store.find_by_name(name, None).await? {
            Some(folder) if !folder.trashed => {
                log::info!("mirroring into \"{name}\" ({})", folder.id);
                Ok(folder.id)
            }
            _ => {
                log::info!("no folder named \"{name}\", creating it");
                Ok(store.create_folder(name, None).await?.id)
            }
        },
    }
}

#[cfg(unix)]
fn handle_shutdown_signals(cancel: CancellationToken) -> JoinHandle<()> {
    posix::handle_shutdown_signals(cancel)
}

#[cfg(not(unix))]
fn handle_shutdown_signals(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("received Ctrl-C");
            cancel.cancel();
        }
    })
}
