use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod engine;
mod status;
mod submitter;

use controller::{spawn_controller, Command, ControllerHandle, KioskSettings};
use engine::{EngineOptions, V4lCamera};
use status::KioskStatus;
use submitter::KioskBackend;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        api = %config.api_url,
        camera = %config.camera_device,
        models = %config.model_dir.display(),
        threshold = config.match_threshold,
        "hadird starting"
    );
    if let Some(suggested) = config.threshold_advice() {
        tracing::warn!(
            threshold = config.match_threshold,
            suggested,
            "default match threshold is tuned for 128-d descriptors; set HADIR_MATCH_THRESHOLD for ArcFace embeddings"
        );
    }

    let session = hadir_client::Session::persistent(&config.session_path);
    if !session.is_signed_in() {
        tracing::warn!(path = %config.session_path.display(), "no admin session; run `hadir login` first");
    }
    session.on_forced_logout(|| {
        tracing::error!("backend rejected the kiosk session; run `hadir login` again");
    });
    let client = hadir_client::ApiClient::new(config.api_url.clone(), session)?;

    let camera = V4lCamera {
        device: config.camera_device.clone(),
        width: config.camera_width,
        height: config.camera_height,
    };
    let models = hadir_models::OnnxModels::new(&config.model_dir).with_intra_threads(config.intra_threads);
    let options = EngineOptions {
        warmup_frames: config.warmup_frames,
        face_selection: config.face_selection,
        tie_break: config.tie_break,
        snapshot_quality: config.snapshot_quality,
    };
    let engine = engine::spawn_engine(camera, models, options).context("failed to spawn engine thread")?;

    let backend = KioskBackend {
        client,
        page_size: config.teacher_page_size,
    };
    let (handle, task) = spawn_controller(engine, backend, KioskSettings::from(&config));

    tokio::spawn(report_status(handle.subscribe(), config.status_json));
    if config.start_in_face_mode {
        handle.send(Command::EnterFaceMode).await;
    }

    tracing::info!("hadird ready");

    tokio::select! {
        res = operator_input(handle.clone()) => res?,
        res = tokio::signal::ctrl_c() => res?,
    }

    tracing::info!("hadird shutting down");
    handle.send(Command::Shutdown).await;
    task.await?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum InputEnd {
    /// `:quit`, or the controller already stopped.
    Quit,
    /// End of input.
    Closed,
}

/// Returns only on `:quit`; a closed stdin (e.g. `/dev/null` under a
/// service manager) leaves the daemon running until a signal.
async fn operator_input(handle: ControllerHandle) -> Result<()> {
    if read_input(BufReader::new(tokio::io::stdin()), &handle).await? == InputEnd::Closed {
        tracing::info!("stdin closed; card and operator input disabled until restart");
        std::future::pending::<()>().await;
    }
    Ok(())
}

/// Card readers act as keyboards: each line is a card UID. Lines starting
/// with `:` are operator commands.
async fn read_input<R: AsyncBufRead + Unpin>(reader: R, handle: &ControllerHandle) -> Result<InputEnd> {
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_input(&line) else {
            continue;
        };
        let quit = command == Command::Shutdown;
        if !handle.send(command).await || quit {
            return Ok(InputEnd::Quit);
        }
    }
    Ok(InputEnd::Closed)
}

fn parse_input(line: &str) -> Option<Command> {
    let line = line.trim();
    let Some(op) = line.strip_prefix(':') else {
        return Some(Command::SubmitRfid(line.to_string()));
    };
    let mut parts = op.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("face"), _) => Some(Command::EnterFaceMode),
        (Some("stop"), _) => Some(Command::LeaveFaceMode),
        (Some("refresh"), _) => Some(Command::RefreshIdentities),
        (Some("manual"), Some(id)) => match id.parse() {
            Ok(teacher_id) => Some(Command::SubmitManual { teacher_id }),
            Err(_) => {
                tracing::warn!(input = id, "manual entry needs a numeric teacher id");
                None
            }
        },
        (Some("quit"), _) => Some(Command::Shutdown),
        _ => {
            tracing::warn!(input = line, "unknown command; try :face, :stop, :manual <id>, :refresh or :quit");
            None
        }
    }
}

async fn report_status(mut rx: tokio::sync::watch::Receiver<KioskStatus>, json: bool) {
    while rx.changed().await.is_ok() {
        let status = rx.borrow_and_update().clone();
        if json {
            match serde_json::to_string(&status) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to encode status"),
            }
            continue;
        }
        let mut line = format!("[{:?}]", status.state);
        if let Some(msg) = &status.message {
            line.push_str(&format!(" {:?}: {}", msg.kind, msg.text));
        }
        if let Some(hint) = &status.hint {
            line.push_str(&format!(" ({hint})"));
        }
        println!("{line}");
    }
}
