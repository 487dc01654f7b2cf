use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use reelforge::config::Settings;
use reelforge::core::ImageProvider;
use reelforge::services::{AccountReport, ElevenLabsClient, ServiceRegistry};
use reelforge::subtitles::load_ass_style;
use reelforge::workers::render_preview;
use reelforge::{Error, QueueEvent, Result, TaskOutcome, TaskQueue};

/// Reelforge - short-video generation pipeline
#[derive(Parser, Debug)]
#[command(name = "reelforge")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    REELFORGE_DEBUG=1     Enable debug logging (alternative to --debug)\n    REELFORGE_LOG=...     tracing filter directive, overrides both")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.reelforge/reelforge.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Settings file (defaults to ~/.reelforge/reelforge.toml)
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Queue one task per directory and run the queue until it stops
    Run {
        /// Working directory holding <lang>/rewritten_text.txt or translation.txt
        #[arg(long = "dir", required = true, num_args = 1..)]
        dirs: Vec<PathBuf>,

        /// Language lanes, in display order
        #[arg(long = "lang", required = true, num_args = 1..)]
        languages: Vec<String>,

        /// Image service to start with (recraft, pollinations, googler)
        #[arg(long)]
        image_service: Option<ImageProvider>,
    },

    /// Write a settings file with default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List configured languages
    Languages,

    /// Check every provider account and print its balance
    Balances,

    /// List ElevenLabs voice templates
    Templates,

    /// Copy a style from an .ass file into the subtitle settings
    ImportStyle {
        /// ASS file with a [V4+ Styles] section
        file: PathBuf,

        /// Style to import; required when the file defines several
        #[arg(long)]
        name: Option<String>,
    },

    /// Render preview_video.mp4 from audio.mp3 and images/ in a directory
    Preview {
        #[arg(long, default_value = "preview")]
        dir: PathBuf,

        /// Transcription language
        #[arg(long, default_value = "en")]
        lang: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    reelforge::log::init_with_debug(cli.debug);

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Settings::config_path()?,
    };

    match cli.command {
        Command::Run {
            dirs,
            languages,
            image_service,
        } => {
            let settings = Settings::load_from(&config_path)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_queue(settings, dirs, languages, image_service))
        }
        Command::InitConfig { force } => init_config(&config_path, force),
        Command::Languages => {
            let settings = Settings::load_from(&config_path)?;
            list_languages(&settings);
            Ok(())
        }
        Command::Balances => {
            let settings = Settings::load_from(&config_path)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(print_balances(settings))
        }
        Command::Templates => {
            let settings = Settings::load_from(&config_path)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(print_templates(settings))
        }
        Command::ImportStyle { file, name } => import_style(&config_path, &file, name.as_deref()),
        Command::Preview { dir, lang } => {
            let settings = Settings::load_from(&config_path)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(preview(settings, dir, lang))
        }
    }
}

/// One line per account: connection result, then balance when known.
fn format_report(report: &AccountReport) -> String {
    let connection = match &report.connection {
        Ok(detail) => format!("ok ({})", detail),
        Err(e) => format!("error: {}", e),
    };
    let balance = match &report.balance {
        Ok(Some(balance)) => balance.clone(),
        Ok(None) => "N/A".to_string(),
        Err(_) => "Error".to_string(),
    };
    format!("  {:<14} {:<20} {}", report.service, balance, connection)
}

async fn print_balances(settings: Settings) -> Result<()> {
    let services = ServiceRegistry::from_settings(&settings)?;
    for report in services.account_reports().await {
        println!("{}", format_report(&report));
    }
    Ok(())
}

async fn print_templates(settings: Settings) -> Result<()> {
    let client = ElevenLabsClient::new(reqwest::Client::new(), settings.api.elevenlabs.clone());
    let templates = client.templates().await?;
    if templates.is_empty() {
        println!("No voice templates.");
    }
    for template in templates {
        println!("  {:<38} {}", template.uuid, template.name);
    }
    Ok(())
}

fn import_style(config_path: &std::path::Path, file: &std::path::Path, name: Option<&str>) -> Result<()> {
    let mut settings = Settings::load_from(config_path)?;
    let style = load_ass_style(file, name)?;
    style.apply_to(&mut settings.subtitle);
    settings.save_to(config_path)?;
    println!(
        "Imported {} from {} into {}",
        style.get("Name").unwrap_or("style"),
        file.display(),
        config_path.display()
    );
    Ok(())
}

async fn preview(settings: Settings, dir: PathBuf, lang: String) -> Result<()> {
    let services = ServiceRegistry::from_settings(&settings)?;
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.cancel();
        }
    });
    let video = render_preview(&dir, &lang, &services, &settings.subtitle, &cancel).await?;
    println!("Preview written to {}", video.display());
    Ok(())
}

fn init_config(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists, pass --force to overwrite",
            path.display()
        )));
    }
    Settings::default().save_to(path)?;
    println!("Settings written to {}", path.display());
    Ok(())
}

fn list_languages(settings: &Settings) {
    if settings.languages.is_empty() {
        println!("No languages configured.");
        return;
    }
    for (id, lang) in &settings.languages {
        println!(
            "  {:<8} {:<16} {:<12} {}",
            id, lang.name, lang.voice_service, lang.voice_code
        );
    }
}

async fn run_queue(
    settings: Settings,
    dirs: Vec<PathBuf>,
    languages: Vec<String>,
    image_service: Option<ImageProvider>,
) -> Result<()> {
    let settings = Arc::new(settings);
    let services = Arc::new(ServiceRegistry::from_settings(&settings)?);
    let (queue, events) = TaskQueue::new(Arc::clone(&settings), services);

    for dir in dirs {
        let id = queue.add_task(dir.clone(), languages.clone(), image_service);
        println!("Queued {} for {}", id, dir.display());
    }

    if queue.start()?.is_none() {
        println!("Nothing to run.");
        return Ok(());
    }
    info!("queue running headless");
    if let Some(path) = reelforge::log::log_path() {
        println!("Logging to {}", path.display());
    }

    let stopper = queue.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping queue");
            eprintln!("\nStopping...");
            stopper.shutdown();
        }
    });

    let failed = print_events(events).await;
    queue.wait_idle().await;

    for task in queue.tasks() {
        println!("  {:<5} {:<12} {}", task.id, task.status, task.work_dir.display());
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Print events until the queue reaches a final state. Returns true when a
/// task failed.
async fn print_events(mut events: UnboundedReceiver<QueueEvent>) -> bool {
    while let Some(event) = events.recv().await {
        match event {
            QueueEvent::TaskStarted { task_id } => println!("[{}] started", task_id),
            QueueEvent::Status {
                task_id,
                lane,
                message,
                progress,
            } => println!("[{}:{}] {:>3}% {}", task_id, lane, progress, message),
            QueueEvent::TaskFinished { task_id, outcome } => match &outcome {
                TaskOutcome::Failed(error) => {
                    println!("[{}] {} {}", task_id, outcome.lane_status(), error)
                }
                _ => println!("[{}] {}", task_id, outcome.lane_status()),
            },
            QueueEvent::ServiceSwitched {
                task_id,
                from,
                to,
                manual,
            } => println!(
                "[{}] image service {} -> {}{}",
                task_id,
                from,
                to,
                if manual { " (manual)" } else { "" }
            ),
            QueueEvent::QueueFinished => {
                println!("All tasks completed.");
                return false;
            }
            QueueEvent::QueueHalted { task_id, .. } => {
                println!("Queue halted: task {} did not complete.", task_id);
                return true;
            }
            QueueEvent::QueueStopped => {
                println!("Queue stopped.");
                return false;
            }
        }
    }
    false
}
