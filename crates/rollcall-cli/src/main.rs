use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::{enroll, ledger, Config};
use rollcall_hw::{is_dark_frame, Camera};
use rollcall_models::OnnxEmbedder;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the reference images and list the resulting identities
    Gallery {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the attendance ledger for a day
    Log {
        /// Day to show (YYYY-MM-DD); defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Print JSON instead of CSV-style rows
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
    /// Capture one frame from the configured camera and report on it
    Test,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    match cli.command {
        Commands::Gallery { json } => gallery(&config, json),
        Commands::Log { date, json } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            show_log(&config, date, json)
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}\t{} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
        Commands::Test => camera_test(&config),
    }
}

fn gallery(config: &Config, json: bool) -> Result<()> {
    let mut embedder = OnnxEmbedder::load(&config.scrfd_model_path(), &config.arcface_model_path())
        .context("loading face models")?;
    let report = enroll::enroll(&config.enrollment_dir, &mut embedder)
        .context("enrolling known faces")?;
    if !report.skipped.is_empty() {
        tracing::warn!(
            skipped = report.skipped.len(),
            dir = %config.enrollment_dir.display(),
            "some reference images were not enrolled"
        );
    }

    if json {
        let value = serde_json::json!({
            "identities": report.gallery.iter().map(|i| &i.name).collect::<Vec<_>>(),
            "skipped": report
                .skipped
                .iter()
                .map(|(path, reason)| serde_json::json!({
                    "file": path.display().to_string(),
                    "reason": format!("{reason:?}"),
                }))
                .collect::<Vec<_>>(),
            "replaced": report.replaced,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{} identities from {}", report.gallery.len(), config.enrollment_dir.display());
    for identity in report.gallery.iter() {
        println!("  {} ({}-dim)", identity.name, identity.embedding.dims());
    }
    for (path, reason) in &report.skipped {
        println!("  skipped {}: {reason:?}", path.display());
    }
    for name in &report.replaced {
        println!("  duplicate name {name}: later file kept");
    }
    Ok(())
}

fn show_log(config: &Config, date: NaiveDate, json: bool) -> Result<()> {
    let path = ledger::ledger_path(&config.ledger_dir, date);
    if !path.exists() {
        bail!("no attendance log for {date} at {}", path.display());
    }
    tracing::debug!(path = %path.display(), "reading attendance log");
    let records = ledger::read_records(&path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for r in &records {
            println!("{}  {}  {}", r.timestamp_string(), r.name, r.status);
        }
        println!("{} record(s)", records.len());
    }
    Ok(())
}

fn camera_test(config: &Config) -> Result<()> {
    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("opening camera {}", config.camera_device))?;
    let mut stream = camera.stream()?;
    stream.warm_up(config.warmup_frames);
    let frame = stream.capture()?;

    println!(
        "{}: {}x{} {:?}, frame #{}",
        camera.device_path, frame.width, frame.height, camera.fourcc, frame.sequence
    );
    println!("  brightness: {:.1}", frame.avg_brightness());
    if is_dark_frame(&frame.data, 0.95) {
        tracing::warn!(device = %camera.device_path, "captured frame is almost entirely dark");
        println!("  warning: frame is almost entirely dark");
    }
    Ok(())
}
