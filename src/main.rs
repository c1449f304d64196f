use clockface::{
    camera::{self, CameraResource, CaptureFrame, V4lCamera},
    service::{ActivityFeed, ActivityLogEntry, ActivityStatus, HttpTransport, Identity, SessionTransport},
    session::{EnrollmentSession, Outcome, RecognitionSession, SessionPhase},
    Config, DevMode,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "clockface")]
#[command(about = "Face-recognition clock-in kiosk client")]
struct Cli {
    /// Enable development mode (verbose logs, captures saved locally)
    #[arg(long, global = true)]
    dev: bool,

    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new employee
    Enroll {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        employee_id: String,
        #[arg(short, long)]
        department: Option<String>,
    },
    /// Run the clock-in/clock-out kiosk loop
    Clock,
    /// Show recent clock activity
    Activity,
    /// Check that the backend is reachable
    Status,
    /// List available cameras
    Cameras,
    /// Capture a single frame to a JPEG file
    TestCamera {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll { name, employee_id, department } => {
            let identity = Identity::new(name, employee_id, department.unwrap_or_default());
            run_enrollment(&config, identity).await?;
        }
        Commands::Clock => {
            run_kiosk(&config).await?;
        }
        Commands::Activity => {
            let transport: Arc<dyn SessionTransport> = Arc::new(HttpTransport::new(&config.backend)?);
            let feed = ActivityFeed::new(transport);
            feed.refresh().await.context("Failed to fetch recent activity")?;
            print_activity(&feed.entries());
        }
        Commands::Status => {
            let transport = HttpTransport::new(&config.backend)?;
            match transport.health().await {
                Ok(health) => println!("✅ {} ({}): {}", transport.base_url(), health.status, health.message),
                Err(e) => bail!("Backend at {} is not reachable: {}", transport.base_url(), e),
            }
        }
        Commands::Cameras => {
            let cameras = camera::list_cameras()?;
            if cameras.is_empty() {
                println!("❌ No cameras found!");
                println!("  Ensure you have permission to access /dev/video*");
                return Ok(());
            }
            for cam in cameras {
                println!("📷 /dev/video{}: {} [{}]", cam.index, cam.name, cam.formats.join(", "));
            }
        }
        Commands::TestCamera { output } => {
            let resource = CameraResource::new(Arc::new(V4lCamera::new(config.camera.clone())));
            resource.acquire().await?;
            let captured = resource.capture().await;
            resource.release();

            let image = captured?.context("Camera stream reported no frame dimensions")?;
            let frame = CaptureFrame::encode(&image, config.camera.jpeg_quality)?;
            let path = output.unwrap_or_else(|| dev_mode.get_capture_path("test_camera"));
            std::fs::write(&path, &frame.bytes)?;
            println!("Saved {}x{} frame to {}", frame.width, frame.height, path.display());
        }
    }

    Ok(())
}

async fn run_enrollment(config: &Config, identity: Identity) -> Result<()> {
    let transport: Arc<dyn SessionTransport> = Arc::new(HttpTransport::new(&config.backend)?);
    let camera = CameraResource::new(Arc::new(V4lCamera::new(config.camera.clone())));
    let session = EnrollmentSession::new(camera, transport, config);
    let mut updates = session.subscribe();

    println!("Enrolling {} ({})", identity.name, identity.external_id);
    session.start(identity).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.stop();
                println!("\nCapture stopped.");
                return Ok(());
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                let progress = &snapshot.progress;
                match snapshot.state.phase {
                    SessionPhase::Terminal(Outcome::Complete) => {
                        println!("\n✅ Registration complete: {}", snapshot.state.message);
                        break;
                    }
                    SessionPhase::Terminal(Outcome::Error) => {
                        bail!("Registration failed: {}", snapshot.state.message);
                    }
                    SessionPhase::Running => {
                        let face = if progress.face_detected { "face detected" } else { "no face - please center your face" };
                        println!(
                            "Images captured: {}/{} ({}) {}",
                            progress.images_captured, progress.target_images, face, snapshot.state.message
                        );
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

async fn run_kiosk(config: &Config) -> Result<()> {
    let transport: Arc<dyn SessionTransport> = Arc::new(HttpTransport::new(&config.backend)?);
    let camera = CameraResource::new(Arc::new(V4lCamera::new(config.camera.clone())));
    let feed = ActivityFeed::new(transport.clone());
    let session = RecognitionSession::new(camera, transport, feed.clone(), config);

    if let Err(e) = feed.refresh().await {
        tracing::debug!("Initial activity load failed: {}", e);
    }
    print_activity(&feed.entries());

    let mut updates = session.subscribe();
    let mut activity = feed.subscribe();
    session.start().await?;
    println!("🟢 System active. Press Ctrl-C to stop.");

    let mut last_message = String::new();
    let mut last_seen = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.stop();
                println!("\n🔴 System stopped.");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.state.message != last_message {
                    println!("{}", snapshot.state.message);
                    last_message = snapshot.state.message.clone();
                }
                if let Some(event) = snapshot.last_event {
                    if last_seen != Some(event.observed_at) {
                        last_seen = Some(event.observed_at);
                        println!(
                            "  {} {} (ID: {}) at {} - confidence {:.0}%{}",
                            event.action,
                            event.identity_name,
                            event.external_id,
                            event.observed_at.format("%I:%M:%S %p"),
                            event.confidence * 100.0,
                            if event.is_late { " ⚠️ Late" } else { "" }
                        );
                    }
                }
            }
            changed = activity.changed() => {
                if changed.is_ok() {
                    let entries = activity.borrow_and_update().clone();
                    print_activity(&entries);
                }
            }
        }
    }

    Ok(())
}

fn print_activity(entries: &[ActivityLogEntry]) {
    println!("Recent Activity");
    if entries.is_empty() {
        println!("  No recent activity");
        return;
    }
    for entry in entries {
        let marker = match entry.status {
            ActivityStatus::Late => "⚠️",
            ActivityStatus::Success => "✅",
        };
        println!("  {} {:<24} {:<10} {}", marker, entry.name, entry.action.to_string(), entry.time);
    }
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
