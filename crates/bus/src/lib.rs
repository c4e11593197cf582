pub mod surface;

use core_types::GenerationId;
use core_types::blob::Blob;
use std::sync::mpsc::{self, Receiver, Sender};

/// An image handed to the generator alongside the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub label: &'static str,
    pub blob: Blob,
}

#[derive(Debug)]
pub enum CoreCommand {
    // Session -> generation runtime
    Generate {
        generation: GenerationId,
        prompt: String,
        images: Vec<ImageAttachment>,
    },
    CancelGeneration {
        generation: GenerationId,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    // Generation runtime -> session
    GenerationStarted {
        generation: GenerationId,
    },
    /// Cumulative text so far, not a delta.
    GenerationChunk {
        generation: GenerationId,
        text: String,
    },
    GenerationDone {
        generation: GenerationId,
    },
    GenerationFailed {
        generation: GenerationId,
        error: String,
    },
}

impl CoreEvent {
    pub fn generation(&self) -> GenerationId {
        match self {
            CoreEvent::GenerationStarted { generation }
            | CoreEvent::GenerationChunk { generation, .. }
            | CoreEvent::GenerationDone { generation }
            | CoreEvent::GenerationFailed { generation, .. } => *generation,
        }
    }
}

pub struct Bus {
    pub cmd_tx: Sender<CoreCommand>,
    pub evt_rx: Receiver<CoreEvent>,
    pub evt_tx: Sender<CoreEvent>, // shareable for runtimes
}

impl Bus {
    /// Creates the bus plus the command receiver a runtime consumes.
    pub fn new() -> (Self, Receiver<CoreCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (evt_tx, evt_rx) = mpsc::channel();
        (
            Self {
                cmd_tx,
                evt_rx,
                evt_tx,
            },
            cmd_rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_report_their_generation() {
        let g = GenerationId(7);
        let events = [
            CoreEvent::GenerationStarted { generation: g },
            CoreEvent::GenerationChunk {
                generation: g,
                text: "x".into(),
            },
            CoreEvent::GenerationDone { generation: g },
            CoreEvent::GenerationFailed {
                generation: g,
                error: "e".into(),
            },
        ];
        assert!(events.iter().all(|e| e.generation() == g));
    }

    #[test]
    fn bus_round_trips_commands_and_events() {
        let (bus, cmd_rx) = Bus::new();
        bus.cmd_tx
            .send(CoreCommand::CancelGeneration {
                generation: GenerationId(1),
            })
            .unwrap();
        assert!(matches!(
            cmd_rx.recv().unwrap(),
            CoreCommand::CancelGeneration { generation } if generation == GenerationId(1)
        ));
        bus.evt_tx
            .send(CoreEvent::GenerationDone {
                generation: GenerationId(1),
            })
            .unwrap();
        assert_eq!(
            bus.evt_rx.recv().unwrap(),
            CoreEvent::GenerationDone {
                generation: GenerationId(1)
            }
        );
    }
}
