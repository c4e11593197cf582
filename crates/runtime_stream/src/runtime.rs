use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

use bus::{CoreCommand, CoreEvent, ImageAttachment};
use core_types::GenerationId;

use crate::generator::Generator;

/// Spawns the generation runtime. Each `Generate` runs on its own worker
/// thread; only the most recently started, uncancelled generation forwards
/// events. A superseded or cancelled worker is detached: it keeps draining
/// its stream (the generator call is not aborted) but its output is
/// discarded and nothing waits for it.
///
/// `Shutdown` joins the current worker only, so the returned handle blocks
/// until that worker's stream has ended.
pub fn start_generation_runtime(
    cmd_rx: Receiver<CoreCommand>,
    evt_tx: Sender<CoreEvent>,
    generator: Arc<dyn Generator>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let active = Arc::new(AtomicU64::new(GenerationId::NONE.0));
        let mut current: Option<(GenerationId, JoinHandle<()>)> = None;

        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                CoreCommand::Generate {
                    generation,
                    prompt,
                    images,
                } => {
                    active.store(generation.0, Ordering::SeqCst);
                    log::debug!(target: "drift.runtime", "generation {} started", generation.0);
                    if let Some((prev, _)) = current.take() {
                        log::trace!(target: "drift.runtime", "detached worker {}", prev.0);
                    }
                    let worker = spawn_worker(
                        generation,
                        prompt,
                        images,
                        Arc::clone(&generator),
                        Arc::clone(&active),
                        evt_tx.clone(),
                    );
                    current = Some((generation, worker));
                }
                CoreCommand::CancelGeneration { generation } => {
                    if active
                        .compare_exchange(
                            generation.0,
                            GenerationId::NONE.0,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                    {
                        log::debug!(
                            target: "drift.runtime",
                            "generation {} cancelled",
                            generation.0
                        );
                    }
                    if current.as_ref().is_some_and(|(g, _)| *g == generation) {
                        current = None;
                    }
                }
                CoreCommand::Shutdown => break,
            }
        }

        active.store(GenerationId::NONE.0, Ordering::SeqCst);
        if let Some((generation, worker)) = current
            && worker.join().is_err()
        {
            log::warn!(target: "drift.runtime", "generation {} worker panicked", generation.0);
        }
    })
}

fn spawn_worker(
    generation: GenerationId,
    prompt: String,
    images: Vec<ImageAttachment>,
    generator: Arc<dyn Generator>,
    active: Arc<AtomicU64>,
    evt_tx: Sender<CoreEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let is_current = || active.load(Ordering::SeqCst) == generation.0;
        let forward = |evt: CoreEvent| {
            if is_current() {
                let _ = evt_tx.send(evt);
            }
        };

        forward(CoreEvent::GenerationStarted { generation });
        let stream = match generator.send_message_stream(&prompt, &images) {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!(
                    target: "drift.runtime",
                    "generation {} failed to start: {err}",
                    generation.0
                );
                forward(CoreEvent::GenerationFailed {
                    generation,
                    error: err.to_string(),
                });
                return;
            }
        };

        let mut chunks = 0usize;
        for item in stream {
            match item {
                Ok(text) => {
                    chunks += 1;
                    forward(CoreEvent::GenerationChunk { generation, text });
                }
                Err(err) => {
                    log::warn!(
                        target: "drift.runtime",
                        "generation {} broke after {chunks} chunks: {err}",
                        generation.0
                    );
                    forward(CoreEvent::GenerationFailed {
                        generation,
                        error: err.to_string(),
                    });
                    return;
                }
            }
        }
        if !is_current() {
            log::trace!(
                target: "drift.runtime",
                "generation {} superseded; {chunks} chunks discarded",
                generation.0
            );
        }
        forward(CoreEvent::GenerationDone { generation });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{ChunkStream, GeneratorError, Scripted};
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    type Running = (Sender<CoreCommand>, Receiver<CoreEvent>, JoinHandle<()>);

    fn run(generator: impl Generator + 'static) -> Running {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (evt_tx, evt_rx) = mpsc::channel();
        let handle = start_generation_runtime(cmd_rx, evt_tx, Arc::new(generator));
        (cmd_tx, evt_rx, handle)
    }

    fn generate(tx: &Sender<CoreCommand>, id: u64) {
        generate_with(tx, id, "make it blue");
    }

    fn generate_with(tx: &Sender<CoreCommand>, id: u64, prompt: &str) {
        tx.send(CoreCommand::Generate {
            generation: GenerationId(id),
            prompt: prompt.into(),
            images: Vec::new(),
        })
        .unwrap();
    }

    // Streams for prompts saying "hang" block until the gate's sender is
    // dropped; every other prompt gets a single chunk.
    struct Gated {
        gate: Mutex<Option<Receiver<()>>>,
    }

    impl Generator for Gated {
        fn send_message_stream(
            &self,
            prompt: &str,
            _images: &[ImageAttachment],
        ) -> Result<ChunkStream, GeneratorError> {
            if prompt.contains("hang")
                && let Some(gate) = self.gate.lock().unwrap().take()
            {
                return Ok(Box::new(std::iter::from_fn(move || {
                    let _ = gate.recv();
                    None
                })));
            }
            Ok(Box::new(std::iter::once(Ok("<p>ok</p>".to_string()))))
        }
    }

    fn collect_until_terminal(rx: &Receiver<CoreEvent>, id: u64) -> Vec<CoreEvent> {
        let mut out = Vec::new();
        loop {
            let evt = rx.recv_timeout(WAIT).expect("runtime stalled");
            let terminal = evt.generation() == GenerationId(id)
                && matches!(
                    evt,
                    CoreEvent::GenerationDone { .. } | CoreEvent::GenerationFailed { .. }
                );
            out.push(evt);
            if terminal {
                return out;
            }
        }
    }

    #[test]
    fn streams_started_chunks_and_done() {
        let (tx, rx, handle) = run(Scripted::cumulative(&["<p>", "<p>Hi</p>"], Duration::ZERO));
        generate(&tx, 1);
        let events = collect_until_terminal(&rx, 1);
        let g = GenerationId(1);
        assert_eq!(
            events,
            vec![
                CoreEvent::GenerationStarted { generation: g },
                CoreEvent::GenerationChunk {
                    generation: g,
                    text: "<p>".into()
                },
                CoreEvent::GenerationChunk {
                    generation: g,
                    text: "<p>Hi</p>".into()
                },
                CoreEvent::GenerationDone { generation: g },
            ]
        );
        tx.send(CoreCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn transport_failure_is_reported() {
        let (tx, rx, handle) = run(
            Scripted::cumulative(&["<p>"], Duration::ZERO)
                .then_fail(GeneratorError::Transport("connection reset".into())),
        );
        generate(&tx, 3);
        let events = collect_until_terminal(&rx, 3);
        assert!(matches!(
            events.last(),
            Some(CoreEvent::GenerationFailed { error, .. }) if error.contains("connection reset")
        ));
        tx.send(CoreCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn superseded_generation_stops_forwarding() {
        let slow = Scripted::cumulative(
            &["a", "ab", "abc", "abcd", "abcde"],
            Duration::from_millis(30),
        );
        let (tx, rx, handle) = run(slow);
        generate(&tx, 1);
        tx.send(CoreCommand::CancelGeneration {
            generation: GenerationId(1),
        })
        .unwrap();
        generate(&tx, 2);

        let mut events = collect_until_terminal(&rx, 2);
        while let Ok(evt) = rx.recv_timeout(Duration::from_millis(300)) {
            events.push(evt);
        }
        let stale = |e: &&CoreEvent| e.generation() == GenerationId(1);
        let stale_done = events
            .iter()
            .filter(stale)
            .any(|e| matches!(e, CoreEvent::GenerationDone { .. }));
        assert!(!stale_done, "superseded generation reported completion: {events:?}");
        let stale_chunks = events
            .iter()
            .filter(stale)
            .filter(|e| matches!(e, CoreEvent::GenerationChunk { .. }))
            .count();
        assert!(stale_chunks < 5);

        tx.send(CoreCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn shutdown_does_not_wait_for_superseded_workers() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (tx, rx, handle) = run(Gated {
            gate: Mutex::new(Some(gate_rx)),
        });
        generate_with(&tx, 1, "hang");
        generate(&tx, 2);
        let events = collect_until_terminal(&rx, 2);
        assert!(events.iter().all(|e| e.generation() != GenerationId(1)
            || matches!(e, CoreEvent::GenerationStarted { .. })));

        tx.send(CoreCommand::Shutdown).unwrap();
        let (joined_tx, joined_rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = joined_tx.send(handle.join().is_ok());
        });
        assert_eq!(joined_rx.recv_timeout(WAIT), Ok(true));
        drop(gate_tx);
    }
}
