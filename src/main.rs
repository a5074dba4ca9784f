use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use staydesk::config::Config;
use staydesk::engine::{DayStatus, Engine};
use staydesk::housekeeping;
use staydesk::maintenance::MaintenanceMonitor;
use staydesk::notify::NotifyHub;
use staydesk::pricing;

const USAGE: &str = "usage: staydesk [rooms | calendar <slug> <YYYY-MM> | quote <slug> <check-in> <check-out> <guests> | compact]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path(), Arc::new(NotifyHub::default()))?);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        [] => serve(engine, &config).await,
        ["rooms"] => {
            for room in engine.list_rooms(true).await {
                let state = if room.is_active { "" } else { " (inactive)" };
                println!(
                    "{:<24} {:<32} units={} max_guests={} from {}{state}",
                    room.slug,
                    room.name,
                    room.units(),
                    room.max_occupancy,
                    room.price_per_night.as_str()
                );
            }
            Ok(())
        }
        ["calendar", slug, month] => {
            let (year, month) = parse_month(month)?;
            let room = engine.room_by_slug(slug).await?;
            let today = Local::now().date_naive();
            for cell in engine.month_view(room.id, year, month, today).await? {
                let status = match cell.status {
                    DayStatus::Past => "past".to_string(),
                    DayStatus::Blocked => "blocked".to_string(),
                    DayStatus::FullyBooked => "fully booked".to_string(),
                    DayStatus::PartiallyBooked { booked, quantity } => format!("{booked}/{quantity} booked"),
                    DayStatus::Available => "available".to_string(),
                };
                println!("{}  {status}", cell.date);
            }
            Ok(())
        }
        ["quote", slug, check_in, check_out, guests] => {
            let room = engine.room_by_slug(slug).await?;
            let check_in: NaiveDate = check_in.parse()?;
            let check_out: NaiveDate = check_out.parse()?;
            let guests: u32 = guests.parse()?;
            let today = Local::now().date_naive();
            engine.check_stay(room.id, check_in, check_out, today).await?;
            let quote = pricing::quote(&room, check_in, check_out, guests)?;
            println!("{}", serde_json::to_string_pretty(&quote)?);
            Ok(())
        }
        ["compact"] => {
            engine.compact_wal().await?;
            info!("WAL compacted");
            Ok(())
        }
        _ => Err(USAGE.into()),
    }
}

fn parse_month(raw: &str) -> Result<(i32, u32), Box<dyn std::error::Error>> {
    let (year, month) = raw.split_once('-').ok_or("expected YYYY-MM")?;
    Ok((year.parse()?, month.parse()?))
}

/// Run the background tasks until ctrl-c or SIGTERM.
async fn serve(engine: Arc<Engine>, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    staydesk::observability::init(config.metrics_port)?;
    info!("staydesk running");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let cancel = CancellationToken::new();
    let monitor = Arc::new(MaintenanceMonitor::new(engine.clone(), config.maintenance_poll));
    let tasks = vec![
        tokio::spawn(housekeeping::run_sweeper(engine.clone(), config.sweep_interval, cancel.clone())),
        tokio::spawn(housekeeping::run_compactor(
            engine.clone(),
            config.compact_threshold,
            config.sweep_interval,
            cancel.clone(),
        )),
        {
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        },
    ];

    shutdown_signal().await?;
    info!("shutdown signal received, stopping background tasks");
    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!("background task ended abnormally: {e}");
        }
    }
    info!("staydesk stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => result?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}
