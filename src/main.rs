use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use vod_archiver::archiver::{BatchOptions, UploadOptions};
use vod_archiver::queue::{PhasePolicy, QueueWorker, WorkQueue};
use vod_archiver::remote::IaCliClient;
use vod_archiver::source::{Listing, UrlOrId, YtDlpSource, save_listing};
use vod_archiver::utils::{get_available_space, read_id_list};
use vod_archiver::{Archiver, BatchReport, Config, Error, IdGrammar, Result, run_with_shutdown};

const GIB: u64 = 1024 * 1024 * 1024;

/// Archive video-platform items into a remote archival store
#[derive(Parser)]
#[command(name = "vod-archiver", version, about)]
struct Cli {
    /// Configuration file, created with defaults when absent
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the storage directory and a default configuration file
    Init,
    /// Write the given settings into the configuration file
    Config(ConfigArgs),
    /// Build identifier lists from platform listings
    Get(GetArgs),
    /// Download items
    Down(DownArgs),
    /// Upload downloaded items
    Up(UpArgs),
    /// Inspect local state and re-drive unfinished items
    Clean(CleanArgs),
    /// Run the work queue service and its HTTP API
    Serve,
}

#[derive(Args)]
struct ConfigArgs {
    /// Items downloaded at once
    #[arg(short, long)]
    video_concurrency: Option<usize>,
    /// Concurrent fragment fetches per media download
    #[arg(short, long)]
    part_concurrency: Option<usize>,
    /// Retries of a single stream fetch
    #[arg(short = 'r', long)]
    stream_retry: Option<u32>,
    /// Storage home directory
    #[arg(short, long)]
    storage_home_dir: Option<PathBuf>,
    /// Credentials file for the archive client
    #[arg(short, long)]
    ia_key_file: Option<PathBuf>,
    /// Netscape cookie file for the video platform
    #[arg(short, long)]
    cookies_file: Option<PathBuf>,
}

#[derive(Args)]
struct GetArgs {
    /// Ranking board (site-wide unless --rid is given)
    #[arg(short, long)]
    ranking: bool,
    /// Ranking board id; 0 is the site-wide board
    #[arg(long, alias = "ranking-id", default_value_t = 0)]
    rid: u32,
    /// Every upload of one uploader (page URL or numeric id)
    #[arg(short, long)]
    up_videos: Option<String>,
    /// Curated must-watch list
    #[arg(long)]
    popular_precious: bool,
    /// Weekly popular series
    #[arg(short, long)]
    popular_series: bool,
    /// Issue of the weekly popular series
    #[arg(long, default_value_t = 1)]
    popular_series_number: u32,
    /// Collection or video series (page URL)
    #[arg(long)]
    series: Option<String>,
    /// Favorites folder (page URL or numeric id)
    #[arg(long)]
    favlist: Option<String>,
}

impl GetArgs {
    /// Listings requested on the command line, in a fixed order
    fn listings(&self) -> Result<Vec<Listing>> {
        let mut listings = Vec::new();
        if self.ranking {
            listings.push(Listing::Ranking { rid: self.rid });
        }
        if let Some(raw) = &self.up_videos {
            listings.push(Listing::Uploads(UrlOrId::parse(raw, "up-videos")?));
        }
        if self.popular_precious {
            listings.push(Listing::PopularPrecious);
        }
        if self.popular_series {
            listings.push(Listing::PopularSeries {
                number: self.popular_series_number,
            });
        }
        if let Some(raw) = &self.series {
            listings.push(Listing::series(raw)?);
        }
        if let Some(raw) = &self.favlist {
            listings.push(Listing::Favorites(UrlOrId::parse(raw, "favlist")?));
        }
        Ok(listings)
    }
}

#[derive(Args)]
struct DownArgs {
    /// Identifiers separated by whitespace or commas, or a file containing them
    #[arg(short, long)]
    input: String,
    /// Do not ask the archive whether an item already exists
    #[arg(short, long)]
    skip_ia_check: bool,
    /// Stop admitting items below this much free space (0 disables the check)
    #[arg(short, long)]
    min_free_space_gb: Option<u64>,
    /// Skip this many identifiers at the head of the list
    #[arg(long, default_value_t = 0)]
    skip_to: usize,
}

#[derive(Args)]
struct UpArgs {
    /// Identifiers separated by whitespace or commas, or a file containing them
    #[arg(short, long, required_unless_present = "by_storage_home_dir")]
    input: Option<String>,
    /// Upload every item found under the storage home directory
    #[arg(short, long, conflicts_with = "input")]
    by_storage_home_dir: bool,
    /// Re-process parts already marked uploaded
    #[arg(short, long)]
    update_existing: bool,
    /// Target collection (must be one of the configured collections)
    #[arg(short, long)]
    collection: Option<String>,
    /// Remove the local copy once every part is uploaded
    #[arg(short, long)]
    delete_after_upload: bool,
    /// Upload downloaded parts of items that are not fully downloaded
    #[arg(long)]
    allow_partial: bool,
}

#[derive(Args)]
struct CleanArgs {
    /// Upload complete items with parts left to publish
    #[arg(short = 'u', long)]
    try_upload: bool,
    /// Resume unfinished downloads
    #[arg(short = 'd', long)]
    try_download: bool,
    /// Delete stale upload locks
    #[arg(short = 'l', long)]
    clean_locks: bool,
    /// Print every recorded download error
    #[arg(short = 'e', long)]
    list_errors: bool,
    /// Run every maintenance step
    #[arg(short, long)]
    all: bool,
    /// Target collection for uploads
    #[arg(short, long)]
    collection: Option<String>,
    /// Stop admitting downloads below this much free space (0 disables the check)
    #[arg(short, long)]
    min_free_space_gb: Option<u64>,
}

/// Restores the terminal cursor on every exit path
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let mut stderr = std::io::stderr();
        if stderr.is_terminal() {
            let _ = stderr.write_all(b"\x1b[?25h");
            let _ = stderr.flush();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _terminal = TerminalGuard;
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::load_or_create(&cli.config)?;

    match cli.command {
        Command::Init => {
            std::fs::create_dir_all(&config.storage.storage_home_dir)?;
            info!(
                config = %cli.config.display(),
                storage = %config.storage.storage_home_dir.display(),
                "Initialized"
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Config(args) => {
            apply_overrides(&mut config, args);
            config.validate()?;
            config.save(&cli.config)?;
            info!(config = %cli.config.display(), "Configuration written");
            Ok(ExitCode::SUCCESS)
        }
        Command::Get(args) => get(&config, &args).await,
        Command::Down(args) => {
            let config = Arc::new(config);
            let grammar = IdGrammar::new(&config.storage.id_pattern)?;
            let ids = read_id_list(&args.input, &grammar)?;
            let archiver = build_archiver(config.clone(), true)?;
            let options = BatchOptions {
                skip_remote_check: args.skip_ia_check,
                skip_to: args.skip_to,
                min_free_space: free_space_floor(&config, args.min_free_space_gb),
            };

            let shutdown = CancellationToken::new();
            tokio::spawn(run_with_shutdown(archiver.clone(), shutdown.clone()));
            let result = archiver.download_batch(&ids, &options).await;
            shutdown.cancel();
            Ok(exit_code(summarize(&result?)))
        }
        Command::Up(args) => {
            let config = Arc::new(config);
            let options = UploadOptions {
                update_existing: args.update_existing,
                delete_after_upload: args.delete_after_upload,
                collection: choose_collection(&config, args.collection)?,
                allow_partial: args.allow_partial,
            };
            let archiver = build_archiver(config.clone(), false)?;
            let ids = match args.input {
                Some(input) if !args.by_storage_home_dir => {
                    read_id_list(&input, &IdGrammar::new(&config.storage.id_pattern)?)?
                }
                _ => archiver.store().local_items()?,
            };
            let report = archiver.upload_batch(&ids, &options).await?;
            Ok(exit_code(summarize(&report)))
        }
        Command::Clean(args) => clean(Arc::new(config), args).await,
        Command::Serve => serve(Arc::new(config)).await,
    }
}

fn apply_overrides(config: &mut Config, args: ConfigArgs) {
    if let Some(v) = args.video_concurrency {
        config.download.video_concurrency = v;
    }
    if let Some(v) = args.part_concurrency {
        config.download.part_concurrency = v;
    }
    if let Some(v) = args.stream_retry {
        config.download.stream_retry = v;
    }
    if let Some(v) = args.storage_home_dir {
        config.storage.storage_home_dir = v;
    }
    if let Some(v) = args.ia_key_file {
        config.tools.ia_config_file = Some(v);
    }
    if let Some(v) = args.cookies_file {
        config.download.cookies_file = Some(v);
    }
}

/// Verify the external tools the download path shells out to
fn preflight(config: &Config) -> Result<()> {
    if config.tools.ffmpeg_path.is_none() && which::which("ffmpeg").is_err() {
        return Err(Error::NotSupported(
            "ffmpeg not found in PATH; it is required to merge media streams".to_string(),
        ));
    }
    Ok(())
}

/// Wire the archiver to the external tools; `downloads` requires the downloader toolchain
fn build_archiver(config: Arc<Config>, downloads: bool) -> Result<Archiver> {
    let source = if downloads {
        preflight(&config)?;
        YtDlpSource::from_config(&config)?
    } else {
        YtDlpSource::new(
            config.tools.ytdlp_path.clone().unwrap_or_else(|| PathBuf::from("yt-dlp")),
            config.download.detail_api_url.clone(),
            config.download.comments_api_url.clone(),
        )
    };
    let remote = match &config.tools.ia_path {
        Some(path) => IaCliClient::new(path.clone()),
        None => IaCliClient::from_path()
            .ok_or_else(|| Error::NotSupported("ia not found in PATH".to_string()))?,
    }
    .with_config_file(config.tools.ia_config_file.clone())
    .with_retries(config.upload.submit_retries);

    Archiver::new(config, Arc::new(source), Arc::new(remote))
}

fn free_space_floor(config: &Config, gb: Option<u64>) -> Option<u64> {
    match gb {
        None => BatchOptions::from_config(config).min_free_space,
        Some(0) => None,
        Some(gb) => Some(gb.saturating_mul(GIB)),
    }
}

fn choose_collection(config: &Config, requested: Option<String>) -> Result<String> {
    let Some(collection) = requested else {
        return Ok(config.upload.default_collection.clone());
    };
    if !config.upload.collections.contains(&collection) {
        return Err(Error::Config {
            message: format!(
                "collection '{}' is not one of {:?}",
                collection, config.upload.collections
            ),
            key: Some("collection".to_string()),
        });
    }
    Ok(collection)
}

/// Log a batch report; returns whether any item failed
fn summarize(report: &BatchReport) -> bool {
    info!(
        completed = report.completed.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Batch finished"
    );
    for (id, reason) in &report.skipped {
        info!(item = %id, %reason, "Skipped");
    }
    for (id, message) in &report.failed {
        warn!(item = %id, error = %message, "Failed");
    }
    report.has_failures()
}

fn exit_code(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn get(config: &Config, args: &GetArgs) -> Result<ExitCode> {
    let listings = args.listings()?;
    if listings.is_empty() {
        warn!("Nothing to do: choose at least one listing, see --help");
        return Ok(ExitCode::FAILURE);
    }

    let grammar = IdGrammar::new(&config.storage.id_pattern)?;
    let lister = YtDlpSource::from_config(config)?;
    let mut failed = false;
    for listing in &listings {
        match save_listing(&lister, listing, &grammar, &config.listing.output_dir).await {
            Ok(saved) => {
                info!(count = saved.ids.len(), path = %saved.path.display(), "Identifier list written");
                println!("{}", saved.path.display());
            }
            Err(e) => {
                error!(listing = ?listing, error = %e, "Listing failed");
                failed = true;
            }
        }
    }
    Ok(exit_code(failed))
}

async fn clean(config: Arc<Config>, args: CleanArgs) -> Result<ExitCode> {
    let try_upload = args.try_upload || args.all;
    let try_download = args.try_download || args.all;
    let clean_locks = args.clean_locks || args.all;
    if !(try_upload || try_download || clean_locks || args.list_errors) {
        warn!("Nothing to do: pass at least one maintenance step, or --all");
        return Ok(ExitCode::FAILURE);
    }

    match get_available_space(&config.storage.storage_home_dir) {
        Ok(free) => info!(free_gb = %format!("{:.2}", free as f64 / GIB as f64), "Free space"),
        Err(e) => warn!(error = %e, "Could not query free space"),
    }

    let archiver = build_archiver(config.clone(), try_download)?;
    let mut failed = false;

    if clean_locks {
        let cleanup = archiver.clean_locks()?;
        info!(
            files = cleanup.files,
            bytes = cleanup.bytes,
            held = cleanup.held,
            "Lock files removed"
        );
    }

    if args.list_errors {
        let errors = archiver.list_errors()?;
        if errors.is_empty() {
            info!("No download errors recorded");
        }
        for entry in &errors {
            match entry.part {
                Some(part) => warn!(item = %entry.id, part, message = %entry.message, "Download error"),
                None => warn!(item = %entry.id, message = %entry.message, "Download error"),
            }
        }
    }

    if try_download {
        let options = BatchOptions {
            min_free_space: free_space_floor(&config, args.min_free_space_gb),
            ..Default::default()
        };
        let shutdown = CancellationToken::new();
        tokio::spawn(run_with_shutdown(archiver.clone(), shutdown.clone()));
        let report = archiver.try_download(&options).await;
        shutdown.cancel();
        failed |= summarize(&report?);
    }

    if try_upload {
        let options = UploadOptions {
            collection: choose_collection(&config, args.collection)?,
            ..UploadOptions::from_config(&config)
        };
        failed |= summarize(&archiver.try_upload(&options).await?);
    }

    Ok(exit_code(failed))
}

async fn serve(config: Arc<Config>) -> Result<ExitCode> {
    let archiver = build_archiver(config.clone(), true)?;
    let queue = Arc::new(
        WorkQueue::new(config.queue.recent_capacity).with_events(archiver.event_sender()),
    );
    queue.load(&config.queue.queue_file).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(run_with_shutdown(archiver.clone(), shutdown.clone()));

    let worker = QueueWorker::new(
        queue.clone(),
        Arc::new(archiver),
        PhasePolicy::from_config(&config.queue),
    );
    let worker_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    let served =
        vod_archiver::api::start_api_server(queue.clone(), config.clone(), shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = worker_handle.await {
        error!(error = %e, "Queue worker panicked");
    }

    queue.save(&config.queue.queue_file).await?;
    served?;
    Ok(ExitCode::SUCCESS)
}
