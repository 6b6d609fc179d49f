use std::sync::Arc;
use std::time::Duration;

use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use structopt::StructOpt;

use indexcore_clustering::ClusteringWorker;
use indexcore_common::{AppConfig, HashingEmbedder};
use indexcore_engine::{ContextRegistry, IndexRegistry, MemoryArbiter};
use indexcore_providers::{FetchScheduler, InstanceRegistry};
use indexcore_storage::InMemoryMetadataStore;
use indexcore_writer::IndexWriter;

fn main() {
    let config = match setup() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error during server setup: {err:?}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config) {
        log::error!("fatal error: {err:?}");
        std::process::exit(1);
    }
}

/// Parses `AppConfig`, validates it, and wires up logging before anything
/// else runs — mirroring the teacher's `setup()`/`setup_logger()` split.
fn setup() -> anyhow::Result<AppConfig> {
    let config = AppConfig::from_args();
    config.validate()?;
    setup_logger(config.log_level, &config.log_file, config.pretty_logs.unwrap_or(true))?;
    Ok(config)
}

fn setup_logger(level: LevelFilter, log_file: &Option<String>, pretty: bool) -> anyhow::Result<()> {
    let mut colours = ColoredLevelConfig::new();
    if pretty {
        colours = colours.info(Color::Green).warn(Color::Yellow).error(Color::BrightRed).debug(Color::Magenta).trace(Color::Cyan);
    }

    let mut dispatch = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} | {} | {:<5} - {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                colours.color(record.level()),
                message,
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(file) = log_file {
        dispatch = dispatch.chain(fern::log_file(file)?);
    }

    dispatch.apply()?;
    Ok(())
}

/// Constructs every long-lived component and spawns the three worker
/// threads (fetch scheduler, index writer, clustering worker), then blocks
/// until interrupted. There is no HTTP surface here; this binary exists to
/// demonstrate a running process, not to serve requests.
fn run(config: AppConfig) -> anyhow::Result<()> {
    let threads = config.runtime_threads.unwrap_or_else(num_cpus::get);
    log::info!("starting indexcore with {threads} worker threads");

    std::fs::create_dir_all(&config.index_path)?;
    std::fs::create_dir_all(&config.cache_path)?;

    let metadata_store = InMemoryMetadataStore::new();
    let arbiter = Arc::new(MemoryArbiter::new(
        config.max_memory,
        config.max_indexing_memory,
        config.max_clustering_memory,
        config.max_index_size,
        config.index_clustering_threshold,
    ));
    let context = Arc::new(ContextRegistry::new());
    let indexes = Arc::new(IndexRegistry::new(
        config.index_path.clone(),
        config.embedding_dims,
        arbiter.clone(),
        metadata_store.clone(),
        context.clone(),
    ));
    let instances = Arc::new(InstanceRegistry::new(metadata_store.clone()));
    instances.attach(indexes.clone() as Arc<dyn indexcore_common::InstanceObserver>);

    let embedder: Arc<dyn indexcore_common::Embedder> = Arc::new(HashingEmbedder::new(config.embedding_dims));

    let writer = IndexWriter::new(
        instances.clone(),
        indexes.clone(),
        context.clone(),
        arbiter.clone(),
        embedder.clone(),
        config.max_index_size,
    );
    instances.attach(writer.clone() as Arc<dyn indexcore_common::InstanceObserver>);

    let clustering = ClusteringWorker::new(indexes.clone(), context.clone());
    indexes.attach(clustering.clone() as Arc<dyn indexcore_engine::IndexRegistryObserver>);

    let scheduler = FetchScheduler::new(
        instances.clone(),
        Duration::from_secs(config.fetching_time_secs),
        config.fetching_threads,
    );
    instances.attach(scheduler.clone() as Arc<dyn indexcore_common::InstanceObserver>);

    let writer_handle = writer.spawn();
    let clustering_handle = clustering.spawn();
    let scheduler_handle = scheduler.spawn();

    log::info!("indexcore is running; press ctrl-c to stop");
    wait_for_shutdown_signal();

    log::info!("shutting down");
    scheduler.stop();
    writer.stop();
    clustering.stop();

    scheduler_handle.join().ok();
    writer_handle.join().ok();
    clustering_handle.join().ok();

    Ok(())
}

fn wait_for_shutdown_signal() {
    let (tx, rx) = std::sync::mpsc::channel();
    let result = ctrlc::set_handler(move || {
        let _ = tx.send(());
    });
    if let Err(err) = result {
        log::warn!("failed to install ctrl-c handler, falling back to an unbounded wait: {err}");
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    }
    let _ = rx.recv();
}
