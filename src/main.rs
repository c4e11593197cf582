//! Replays a recorded generator transcript against a document and prints the
//! resulting snapshot.
//!
//! Usage: `drift <document.html> [transcript]`
//!
//! Without a transcript the document is only loaded and printed. Log output
//! goes to stderr; `DRIFT_LOG` takes an env_logger filter (default `info`,
//! e.g. `drift.engine=trace`) and `DRIFT_CHUNK_DELAY_MS` sets the pause
//! between replayed chunks.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{env, fs};

use bus::Bus;
use editor::{EditorConfig, EditorSession};
use runtime_stream::{Generator, Scripted, start_generation_runtime};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const OUTLINE_CAP: usize = 400;
const REPLAY_TIMEOUT: Duration = Duration::from_secs(120);

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("DRIFT_LOG", "info"))
        .format_timestamp(None)
        .init();
}

fn chunk_delay() -> Duration {
    env::var("DRIFT_CHUNK_DELAY_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(40))
}

fn main() -> ExitCode {
    init_logging();

    let mut args = env::args().skip(1);
    let Some(document_path) = args.next() else {
        eprintln!("usage: drift <document.html> [transcript]");
        return ExitCode::from(2);
    };
    let transcript_path = args.next();

    match run(&document_path, transcript_path.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("drift: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(
    document_path: &str,
    transcript_path: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let markup = fs::read_to_string(document_path)?;
    let transcript = transcript_path.map(fs::read_to_string).transpose()?;

    let (bus, cmd_rx) = Bus::new();
    let generator: Arc<dyn Generator> = Arc::new(Scripted::from_transcript(
        transcript.as_deref().unwrap_or_default(),
        chunk_delay(),
    ));
    let runtime = start_generation_runtime(cmd_rx, bus.evt_tx.clone(), generator);

    let mut session = EditorSession::new(EditorConfig::default(), bus.cmd_tx.clone());
    session.load(&markup)?;

    if transcript.is_some() {
        session.request_whole("Replay", Vec::new());
        let deadline = Instant::now() + REPLAY_TIMEOUT;
        while session.is_generating() && Instant::now() < deadline {
            let wait = session
                .next_deadline()
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_millis(50));
            if let Ok(evt) = bus.evt_rx.recv_timeout(wait) {
                session.on_core_event(evt, Instant::now());
            }
            session.tick(Instant::now());
        }
        if session.is_generating() {
            log::warn!(target: "drift.session", "replay timed out after {REPLAY_TIMEOUT:?}");
        }
        if let Some(failure) = session.last_failure() {
            log::warn!(target: "drift.session", "generation failed: {}", failure.error);
        }
    }

    if let Some(snapshot) = session.engine().live() {
        if let Some(root) = snapshot.doc.document_element() {
            for line in html::debug::outline(&snapshot.doc, root, OUTLINE_CAP) {
                println!("{line}");
            }
        }
        println!();
    }
    if let Some(source) = session.source() {
        println!("{source}");
    }

    session.shutdown();
    runtime.join().map_err(|_| "generation runtime panicked")?;
    Ok(())
}
