use std::{path::PathBuf, sync::Arc};

use archivist::{
    config::ArchivistConfig,
    jobs::{
        ArchiveMaintenance, ArchiveMaintenancePlugin, TaskScheduler, TimetableStore,
        start_scheduler_worker,
    },
    observability,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// CLI arguments for archivist
#[derive(Parser, Debug)]
#[command(version, about = "Archive table maintenance", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to the config file (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the scheduler worker until interrupted
    Run {
        /// Run every job once, in priority order, and exit
        #[arg(long)]
        once: bool,
    },
    /// Purge outdated archives in every partition once
    Purge,
    /// Optimize every archive table once
    Optimize,
    /// Purge, then optimize, as one pass
    Maintain,
    /// List installed archive tables and their retention boundaries
    Tables,
    /// Export the JSON schema for the configuration file
    Schema {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Command::Schema { output } = &args.command {
        run_schema_export(output.as_deref());
        return;
    }

    let config = load_config(args.config.as_deref());

    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::error!(error = %e, "Failed to initialize metrics");
        std::process::exit(1);
    }

    if let Command::Tables = args.command {
        if !list_tables(&config).await {
            std::process::exit(1);
        }
        return;
    }

    let (maintenance, timetable) = open_maintenance(&config).await;
    let maintenance = Arc::new(maintenance);

    let ok = match args.command {
        Command::Run { once } => run_scheduler(&config, maintenance, timetable, once).await,
        Command::Purge => match maintenance.purge_outdated_archives().await {
            Ok(report) => {
                for failure in &report.failures {
                    tracing::error!(
                        partition = %failure.partition,
                        error = %failure.error,
                        "Partition purge failed"
                    );
                }
                tracing::info!(
                    periods = report.purged.len(),
                    skipped = report.skipped.len(),
                    failures = report.failures.len(),
                    deleted = report.stats().total(),
                    "Purge complete"
                );
                report.is_success()
            }
            Err(e) => {
                tracing::error!(error = %e, "Purge failed");
                false
            }
        },
        Command::Optimize => match maintenance.optimize_archive_table().await {
            Ok(report) => {
                tracing::info!(tables = report.tables, "Optimize complete");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Optimize failed");
                false
            }
        },
        Command::Maintain => match maintenance.run_maintenance_pass().await {
            Ok(report) => report.purge.is_success(),
            Err(e) => {
                tracing::error!(error = %e, "Maintenance pass failed");
                false
            }
        },
        Command::Tables | Command::Schema { .. } => true,
    };

    if !ok {
        std::process::exit(1);
    }
}

fn load_config(path: Option<&std::path::Path>) -> ArchivistConfig {
    let Some(path) = path else {
        return ArchivistConfig::default();
    };

    match ArchivistConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "database-sqlite")]
async fn open_store(config: &ArchivistConfig) -> Arc<archivist::archive::SqliteArchiveStore> {
    let archivist::config::DatabaseConfig::Sqlite(sqlite) = &config.database else {
        eprintln!("Error: Database is not configured. Nothing to maintain.");
        std::process::exit(1);
    };

    match archivist::archive::SqliteArchiveStore::connect(sqlite, &config.maintenance).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to archive database");
            eprintln!("Error: Failed to connect to archive database: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "database-sqlite")]
async fn open_maintenance(
    config: &ArchivistConfig,
) -> (ArchiveMaintenance, Arc<dyn TimetableStore>) {
    let store = open_store(config).await;

    let timetable: Arc<dyn TimetableStore> = match archivist::jobs::SqliteTimetable::new(
        store.pool().clone(),
        &config.maintenance.table_prefix,
    )
    .await
    {
        Ok(timetable) => Arc::new(timetable),
        Err(e) => {
            tracing::warn!(error = %e, "Job timetable not persisted, falling back to memory");
            Arc::new(archivist::jobs::MemoryTimetable::new())
        }
    };

    (
        ArchiveMaintenance::new(store.clone(), store, &config.maintenance),
        timetable,
    )
}

#[cfg(not(feature = "database-sqlite"))]
async fn open_maintenance(
    _config: &ArchivistConfig,
) -> (ArchiveMaintenance, Arc<dyn TimetableStore>) {
    eprintln!(
        "Error: No archive database backend compiled. Rebuild with: --features database-sqlite"
    );
    std::process::exit(1);
}

async fn run_scheduler(
    config: &ArchivistConfig,
    maintenance: Arc<ArchiveMaintenance>,
    timetable: Arc<dyn TimetableStore>,
    once: bool,
) -> bool {
    let mut scheduler = TaskScheduler::with_timetable(timetable);
    scheduler.register_plugin(&ArchiveMaintenancePlugin::new(maintenance));

    if once {
        let runs = scheduler.run_all_now(chrono::Utc::now()).await;
        return runs.iter().all(|run| run.is_success());
    }

    if !config.maintenance.enabled {
        tracing::info!("Archive maintenance disabled by configuration");
        return true;
    }

    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(start_scheduler_worker(
        Arc::new(scheduler),
        config.maintenance.tick(),
        shutdown.clone(),
    ));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
    tracing::info!("Shutdown signal received, waiting for the running job to finish...");
    shutdown.cancel();

    if let Err(e) = worker.await {
        tracing::error!(error = %e, "Scheduler worker panicked");
        return false;
    }
    true
}

#[cfg(feature = "database-sqlite")]
async fn list_tables(config: &ArchivistConfig) -> bool {
    use archivist::archive::{ArchivePartition, ArchiveTableRegistry};

    let store = open_store(config).await;
    let tables = match store.list_installed_tables().await {
        Ok(tables) => tables,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list archive tables");
            return false;
        }
    };

    for table in tables {
        match ArchivePartition::parse(table.as_str()) {
            Ok(partition) => println!("{}\t{}", partition, partition.retention_boundary()),
            Err(_) => println!("{}\t(malformed)", table),
        }
    }
    true
}

#[cfg(not(feature = "database-sqlite"))]
async fn list_tables(_config: &ArchivistConfig) -> bool {
    eprintln!("Error: No archive database backend compiled");
    false
}

fn run_schema_export(output: Option<&std::path::Path>) {
    #[cfg(feature = "json-schema")]
    {
        let content = match serde_json::to_string_pretty(&ArchivistConfig::json_schema()) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("Error: Failed to serialize config schema: {}", e);
                std::process::exit(1);
            }
        };

        match output {
            Some(path) => {
                if let Err(e) = std::fs::write(path, &content) {
                    eprintln!("Error: Failed to write to {}: {}", path.display(), e);
                    std::process::exit(1);
                }
                eprintln!("Config JSON schema written to {}", path.display());
            }
            None => println!("{}", content),
        }
    }
    #[cfg(not(feature = "json-schema"))]
    {
        let _ = output;
        eprintln!("Error: JSON schema export requires the 'json-schema' feature");
        std::process::exit(1);
    }
}
