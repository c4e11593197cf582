//! Typed channel between the editor and an isolated render surface.
//!
//! The surface reports pointer interaction as [`SurfaceEvent`]s and applies
//! [`SurfaceCommand`]s. A channel pair lives exactly as long as one loaded
//! payload: replacing the surface drops the old pair, so a stale endpoint's
//! sends fail instead of reaching the new session state.

use core_types::blob::BlobUrl;
use std::sync::mpsc::{self, Receiver, SendError, Sender, TryRecvError};

/// Opaque identity of a node inside the rendered surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// What the surface knows about an element it reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceNode {
    pub handle: SurfaceHandle,
    /// Raw `data-ast-id` attribute as rendered, if present.
    pub ast_id: Option<String>,
    /// False once the element has been removed from the surface document.
    pub connected: bool,
}

impl SurfaceNode {
    pub fn new(handle: u64, ast_id: Option<&str>) -> Self {
        Self {
            handle: SurfaceHandle(handle),
            ast_id: ast_id.map(str::to_owned),
            connected: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceEvent {
    Hover { node: SurfaceNode },
    PointerLeave { node: SurfaceNode },
    Select { node: SurfaceNode },
    ContextMenu { node: SurfaceNode, x: f32, y: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementStyle {
    None,
    Hover,
    Selected,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceCommand {
    Load { url: BlobUrl },
    SetStyle { node: SurfaceHandle, style: ElementStyle },
    SetScrollable(bool),
    SetOpacity(f32),
}

/// Editor side of the channel.
#[derive(Debug)]
pub struct SurfaceLink {
    pub epoch: u64,
    events: Receiver<SurfaceEvent>,
    commands: Sender<SurfaceCommand>,
}

/// Surface side of the channel.
#[derive(Debug)]
pub struct SurfaceEndpoint {
    pub epoch: u64,
    events: Sender<SurfaceEvent>,
    commands: Receiver<SurfaceCommand>,
}

pub fn surface_channel(epoch: u64) -> (SurfaceLink, SurfaceEndpoint) {
    let (evt_tx, evt_rx) = mpsc::channel();
    let (cmd_tx, cmd_rx) = mpsc::channel();
    (
        SurfaceLink {
            epoch,
            events: evt_rx,
            commands: cmd_tx,
        },
        SurfaceEndpoint {
            epoch,
            events: evt_tx,
            commands: cmd_rx,
        },
    )
}

impl SurfaceLink {
    /// Drains pending events without blocking. Also reports whether the
    /// surface side is gone.
    pub fn drain(&self) -> (Vec<SurfaceEvent>, bool) {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(evt) => out.push(evt),
                Err(TryRecvError::Empty) => return (out, false),
                Err(TryRecvError::Disconnected) => return (out, true),
            }
        }
    }

    pub fn send(&self, cmd: SurfaceCommand) -> Result<(), SendError<SurfaceCommand>> {
        self.commands.send(cmd)
    }
}

impl SurfaceEndpoint {
    pub fn emit(&self, evt: SurfaceEvent) -> Result<(), SendError<SurfaceEvent>> {
        self.events.send(evt)
    }

    pub fn pending_commands(&self) -> Vec<SurfaceCommand> {
        self.commands.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_flow_editor_ward_and_commands_surface_ward() {
        let (link, endpoint) = surface_channel(1);
        endpoint
            .emit(SurfaceEvent::Hover {
                node: SurfaceNode::new(3, Some("4")),
            })
            .unwrap();
        let (events, closed) = link.drain();
        assert!(!closed);
        assert_eq!(events.len(), 1);

        link.send(SurfaceCommand::SetScrollable(true)).unwrap();
        assert_eq!(endpoint.pending_commands(), vec![SurfaceCommand::SetScrollable(true)]);
    }

    #[test]
    fn dropping_the_link_cuts_off_the_old_surface() {
        let (link, endpoint) = surface_channel(1);
        drop(link);
        assert!(
            endpoint
                .emit(SurfaceEvent::Select {
                    node: SurfaceNode::new(1, None),
                })
                .is_err()
        );
    }

    #[test]
    fn drain_reports_disconnect() {
        let (link, endpoint) = surface_channel(2);
        drop(endpoint);
        let (events, closed) = link.drain();
        assert!(events.is_empty());
        assert!(closed);
    }
}
