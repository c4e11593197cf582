//! Editor side of the isolated render surface.
//!
//! Each render stores the payload under a fresh transient URL, revokes the
//! previous one and replaces the event channel, so events from a replaced
//! surface can never reach the new one. Hover and selection styling are
//! tracked here; the surface only applies [`ElementStyle`] commands.

use bus::surface::{
    ElementStyle, SurfaceCommand, SurfaceEndpoint, SurfaceEvent, SurfaceHandle, SurfaceLink,
    SurfaceNode, surface_channel,
};
use core_types::blob::{Blob, BlobError, BlobRegistry, BlobUrl, StoredBlob};
use tools::text::find_ignore_ascii_case;

use crate::engine::PreservedMapping;

/// Restrictions the render surface runs under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SandboxPolicy {
    pub allow_scripts: bool,
    pub allow_same_origin: bool,
    pub content_security_policy: &'static str,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            allow_scripts: false,
            allow_same_origin: false,
            content_security_policy: "default-src 'none'; script-src 'none'; \
                style-src 'unsafe-inline' https:; img-src data: blob: https:; \
                font-src data: https:",
        }
    }
}

impl SandboxPolicy {
    /// Value for an iframe-style `sandbox` attribute.
    pub fn sandbox_attribute(&self) -> String {
        let mut tokens = Vec::new();
        if self.allow_scripts {
            tokens.push("allow-scripts");
        }
        if self.allow_same_origin {
            tokens.push("allow-same-origin");
        }
        tokens.join(" ")
    }

    pub fn meta_tag(&self) -> String {
        format!(
            "<meta http-equiv=\"Content-Security-Policy\" content=\"{}\">",
            self.content_security_policy
        )
    }
}

/// Puts the policy's CSP meta first in `<head>`, or in front of everything
/// when there is no head.
pub fn inject_csp(markup: &str, policy: &SandboxPolicy) -> String {
    let meta = policy.meta_tag();
    let mut out = String::with_capacity(markup.len() + meta.len());
    match head_content_start(markup) {
        Some(at) => {
            out.push_str(&markup[..at]);
            out.push_str(&meta);
            out.push_str(&markup[at..]);
        }
        None => {
            out.push_str(&meta);
            out.push_str(markup);
        }
    }
    out
}

fn head_content_start(markup: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = find_ignore_ascii_case(&markup[from..], "<head") {
        let tag = from + rel;
        let after = tag + "<head".len();
        match markup.as_bytes().get(after) {
            Some(b'>') => return Some(after + 1),
            Some(b) if b.is_ascii_whitespace() || *b == b'/' => {
                return markup[after..].find('>').map(|end| after + end + 1);
            }
            _ => from = after,
        }
    }
    None
}

/// What the session has to act on after pumping surface events.
#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceAction {
    Selected(SurfaceNode),
    Deselected(SurfaceNode),
    /// `pinned` is the mapping the surface was rendered from; the node's id
    /// is only meaningful against it.
    ContextMenu {
        node: SurfaceNode,
        x: f32,
        y: f32,
        pinned: PreservedMapping,
    },
    /// The surface side of the channel went away.
    Closed,
}

#[derive(Debug)]
pub struct RenderSurfaceBridge {
    policy: SandboxPolicy,
    payload: Option<StoredBlob>,
    pinned: Option<PreservedMapping>,
    link: Option<SurfaceLink>,
    epoch: u64,
    interactive: bool,
    opacity: f32,
    hovered: Option<SurfaceNode>,
    selected: Option<SurfaceNode>,
}

impl RenderSurfaceBridge {
    pub fn new(policy: SandboxPolicy) -> Self {
        Self {
            policy,
            payload: None,
            pinned: None,
            link: None,
            epoch: 0,
            interactive: false,
            opacity: 1.0,
            hovered: None,
            selected: None,
        }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    pub fn current_url(&self) -> Option<&BlobUrl> {
        self.payload.as_ref().map(|p| &p.url)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Mapping of the snapshot the current payload was rendered from.
    pub fn pinned(&self) -> Option<&PreservedMapping> {
        self.pinned.as_ref()
    }

    pub fn selected(&self) -> Option<&SurfaceNode> {
        self.selected.as_ref()
    }

    pub fn hovered(&self) -> Option<&SurfaceNode> {
        self.hovered.as_ref()
    }

    /// Replaces the surface with `markup`, annotated against `pinned`.
    /// Returns the endpoint the new surface must use; the previous endpoint
    /// is cut off and the previous payload URL revoked.
    pub fn render(
        &mut self,
        markup: &str,
        pinned: PreservedMapping,
        blobs: &mut BlobRegistry,
    ) -> Result<SurfaceEndpoint, BlobError> {
        let payload = blobs.create(Blob::html(&inject_csp(markup, &self.policy)))?;
        if let Some(prior) = self.payload.replace(payload.clone()) {
            blobs.revoke(&prior.url);
        }
        self.pinned = Some(pinned);

        self.epoch += 1;
        let (link, endpoint) = surface_channel(self.epoch);
        // Element handles belong to the replaced document.
        self.hovered = None;
        self.selected = None;
        self.link = Some(link);

        self.send(SurfaceCommand::Load { url: payload.url });
        self.send(SurfaceCommand::SetScrollable(self.interactive));
        self.send(SurfaceCommand::SetOpacity(self.opacity));
        log::debug!(
            target: "drift.surface",
            "surface epoch {} loaded ({} bytes)",
            self.epoch,
            payload.blob.len()
        );
        Ok(endpoint)
    }

    /// Revokes the payload URL and drops the channel.
    pub fn teardown(&mut self, blobs: &mut BlobRegistry) {
        if let Some(prior) = self.payload.take() {
            blobs.revoke(&prior.url);
        }
        self.pinned = None;
        self.link = None;
        self.hovered = None;
        self.selected = None;
    }

    /// Interactive mode makes the surface scrollable and enables hover and
    /// selection. Leaving it clears hover styling; the selection is kept.
    pub fn set_interactive(&mut self, interactive: bool) {
        if self.interactive == interactive {
            return;
        }
        self.interactive = interactive;
        self.send(SurfaceCommand::SetScrollable(interactive));
        if !interactive && let Some(node) = self.hovered.take() {
            self.restyle(node.handle);
        }
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
        self.send(SurfaceCommand::SetOpacity(self.opacity));
    }

    pub fn clear_selection(&mut self) -> Option<SurfaceNode> {
        let node = self.selected.take()?;
        self.restyle(node.handle);
        Some(node)
    }

    /// Drains surface events, updates styling and reports what the session
    /// must handle.
    pub fn pump(&mut self) -> Vec<SurfaceAction> {
        let Some(link) = &self.link else {
            return Vec::new();
        };
        let (events, closed) = link.drain();
        let mut actions = Vec::new();
        for event in events {
            if !self.interactive {
                log::trace!(target: "drift.surface", "ignored {event:?} outside interactive mode");
                continue;
            }
            match event {
                SurfaceEvent::Hover { node } => {
                    if let Some(prev) = self.hovered.replace(node.clone())
                        && prev.handle != node.handle
                    {
                        self.restyle(prev.handle);
                    }
                    self.restyle(node.handle);
                }
                SurfaceEvent::PointerLeave { node } => {
                    if self.hovered.as_ref().is_some_and(|h| h.handle == node.handle) {
                        self.hovered = None;
                        self.restyle(node.handle);
                    }
                }
                SurfaceEvent::Select { node } => {
                    if self.selected.as_ref().is_some_and(|s| s.handle == node.handle) {
                        self.selected = None;
                        self.restyle(node.handle);
                        actions.push(SurfaceAction::Deselected(node));
                    } else {
                        if let Some(prev) = self.selected.replace(node.clone()) {
                            self.restyle(prev.handle);
                        }
                        self.restyle(node.handle);
                        actions.push(SurfaceAction::Selected(node));
                    }
                }
                SurfaceEvent::ContextMenu { node, x, y } => {
                    // A live link implies a rendered payload.
                    if let Some(pinned) = self.pinned.clone() {
                        actions.push(SurfaceAction::ContextMenu { node, x, y, pinned });
                    }
                }
            }
        }
        if closed {
            log::debug!(target: "drift.surface", "surface epoch {} disconnected", self.epoch);
            self.link = None;
            actions.push(SurfaceAction::Closed);
        }
        actions
    }

    fn style_of(&self, handle: SurfaceHandle) -> ElementStyle {
        if self.selected.as_ref().is_some_and(|s| s.handle == handle) {
            ElementStyle::Selected
        } else if self.hovered.as_ref().is_some_and(|h| h.handle == handle) {
            ElementStyle::Hover
        } else {
            ElementStyle::None
        }
    }

    fn restyle(&self, handle: SurfaceHandle) {
        self.send(SurfaceCommand::SetStyle {
            node: handle,
            style: self.style_of(handle),
        });
    }

    fn send(&self, cmd: SurfaceCommand) {
        if let Some(link) = &self.link
            && link.send(cmd).is_err()
        {
            log::debug!(
                target: "drift.surface",
                "surface epoch {} gone; command dropped",
                self.epoch
            );
        }
    }
}

impl Default for RenderSurfaceBridge {
    fn default() -> Self {
        Self::new(SandboxPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PatchEngine;
    use html::{ParseLimits, Sanitizer};

    fn engine(markup: &str) -> PatchEngine {
        let mut engine = PatchEngine::new(Sanitizer::new(ParseLimits::default()));
        engine.replace_whole(markup).unwrap();
        engine
    }

    fn pinned() -> PreservedMapping {
        engine("<p>x</p>").pin().unwrap()
    }

    fn styles(endpoint: &SurfaceEndpoint) -> Vec<(u64, ElementStyle)> {
        endpoint
            .pending_commands()
            .into_iter()
            .filter_map(|c| match c {
                SurfaceCommand::SetStyle { node, style } => Some((node.0, style)),
                _ => None,
            })
            .collect()
    }

    fn interactive_bridge(blobs: &mut BlobRegistry) -> (RenderSurfaceBridge, SurfaceEndpoint) {
        let mut bridge = RenderSurfaceBridge::default();
        bridge.set_interactive(true);
        let endpoint = bridge
            .render("<html><head></head><body></body></html>", pinned(), blobs)
            .unwrap();
        endpoint.pending_commands();
        (bridge, endpoint)
    }

    #[test]
    fn csp_meta_goes_first_in_head() {
        let policy = SandboxPolicy::default();
        let out = inject_csp(
            "<html><header></header><HEAD data-ast-id=\"1\"><title>t</title></HEAD></html>",
            &policy,
        );
        let meta = policy.meta_tag();
        assert!(out.contains(&format!("<HEAD data-ast-id=\"1\">{meta}<title>")), "{out}");
        assert_eq!(inject_csp("<p>x</p>", &policy), format!("{meta}<p>x</p>"));
        assert!(meta.contains("script-src 'none'"));
        assert_eq!(policy.sandbox_attribute(), "");
    }

    #[test]
    fn render_revokes_previous_payload_and_replaces_channel() {
        let mut blobs = BlobRegistry::new();
        let mut bridge = RenderSurfaceBridge::default();
        let first = bridge.render("<p>1</p>", pinned(), &mut blobs).unwrap();
        let first_url = bridge.current_url().cloned().unwrap();
        assert!(matches!(
            first.pending_commands().first(),
            Some(SurfaceCommand::Load { url }) if *url == first_url
        ));

        let second = bridge.render("<p>2</p>", pinned(), &mut blobs).unwrap();
        let second_url = bridge.current_url().cloned().unwrap();
        assert_ne!(first_url, second_url);
        assert!(blobs.resolve(&first_url).is_none());
        assert!(blobs.resolve(&second_url).is_some());
        assert_eq!(blobs.live_count(), 1);
        assert_eq!(second.epoch, 2);

        // The old surface is cut off.
        assert!(
            first
                .emit(SurfaceEvent::Select {
                    node: SurfaceNode::new(1, Some("3")),
                })
                .is_err()
        );

        bridge.teardown(&mut blobs);
        assert_eq!(blobs.live_count(), 0);
        assert!(bridge.current_url().is_none());
        assert!(bridge.pinned().is_none());
    }

    #[test]
    fn context_menu_carries_the_rendered_mapping() {
        let mut blobs = BlobRegistry::new();
        let mut bridge = RenderSurfaceBridge::default();
        bridge.set_interactive(true);
        let first = engine("<ul><li>a</li></ul>");
        let endpoint = bridge
            .render("<ul><li>a</li></ul>", first.pin().unwrap(), &mut blobs)
            .unwrap();
        let node = SurfaceNode::new(7, Some("4"));
        endpoint
            .emit(SurfaceEvent::ContextMenu {
                node: node.clone(),
                x: 3.0,
                y: 4.0,
            })
            .unwrap();
        let actions = bridge.pump();
        let [SurfaceAction::ContextMenu { node: got, pinned, .. }] = actions.as_slice() else {
            panic!("expected one context menu, got {actions:?}");
        };
        assert_eq!(*got, node);
        assert_eq!(pinned.version(), first.version().unwrap());
        assert_eq!(pinned.mapping().get(4).unwrap().tag, "li");
    }

    #[test]
    fn selection_styling_wins_over_hover() {
        let mut blobs = BlobRegistry::new();
        let (mut bridge, endpoint) = interactive_bridge(&mut blobs);
        let a = SurfaceNode::new(1, Some("3"));
        let b = SurfaceNode::new(2, Some("4"));

        endpoint.emit(SurfaceEvent::Hover { node: a.clone() }).unwrap();
        endpoint.emit(SurfaceEvent::Select { node: a.clone() }).unwrap();
        endpoint.emit(SurfaceEvent::Hover { node: b.clone() }).unwrap();
        let actions = bridge.pump();
        assert_eq!(actions, vec![SurfaceAction::Selected(a.clone())]);
        assert_eq!(
            styles(&endpoint),
            vec![
                (1, ElementStyle::Hover),
                (1, ElementStyle::Selected),
                (1, ElementStyle::Selected),
                (2, ElementStyle::Hover),
            ]
        );

        // Hovering the selected element keeps it selected-styled; leaving it
        // does not drop the selection outline.
        endpoint.emit(SurfaceEvent::Hover { node: a.clone() }).unwrap();
        endpoint.emit(SurfaceEvent::PointerLeave { node: a.clone() }).unwrap();
        bridge.pump();
        assert_eq!(
            styles(&endpoint),
            vec![
                (2, ElementStyle::None),
                (1, ElementStyle::Selected),
                (1, ElementStyle::Selected),
            ]
        );
    }

    #[test]
    fn clicking_the_selection_again_deselects_and_resets() {
        let mut blobs = BlobRegistry::new();
        let (mut bridge, endpoint) = interactive_bridge(&mut blobs);
        let a = SurfaceNode::new(1, Some("3"));
        let b = SurfaceNode::new(2, Some("4"));

        endpoint.emit(SurfaceEvent::Select { node: a.clone() }).unwrap();
        endpoint.emit(SurfaceEvent::Select { node: b.clone() }).unwrap();
        endpoint.emit(SurfaceEvent::Select { node: b.clone() }).unwrap();
        let actions = bridge.pump();
        assert_eq!(
            actions,
            vec![
                SurfaceAction::Selected(a),
                SurfaceAction::Selected(b.clone()),
                SurfaceAction::Deselected(b),
            ]
        );
        assert_eq!(
            styles(&endpoint),
            vec![
                (1, ElementStyle::Selected),
                (1, ElementStyle::None),
                (2, ElementStyle::Selected),
                (2, ElementStyle::None),
            ]
        );
        assert!(bridge.selected().is_none());
    }

    #[test]
    fn events_are_ignored_outside_interactive_mode() {
        let mut blobs = BlobRegistry::new();
        let (mut bridge, endpoint) = interactive_bridge(&mut blobs);
        let a = SurfaceNode::new(1, Some("3"));
        endpoint.emit(SurfaceEvent::Hover { node: a.clone() }).unwrap();
        bridge.pump();
        bridge.set_interactive(false);
        assert_eq!(
            endpoint.pending_commands(),
            vec![
                SurfaceCommand::SetStyle {
                    node: SurfaceHandle(1),
                    style: ElementStyle::Hover
                },
                SurfaceCommand::SetScrollable(false),
                SurfaceCommand::SetStyle {
                    node: SurfaceHandle(1),
                    style: ElementStyle::None
                },
            ]
        );
        endpoint.emit(SurfaceEvent::Select { node: a }).unwrap();
        endpoint
            .emit(SurfaceEvent::ContextMenu {
                node: SurfaceNode::new(2, None),
                x: 1.0,
                y: 2.0,
            })
            .unwrap();
        assert!(bridge.pump().is_empty());
        assert!(bridge.selected().is_none());
    }

    #[test]
    fn closed_surface_is_reported_once() {
        let mut blobs = BlobRegistry::new();
        let (mut bridge, endpoint) = interactive_bridge(&mut blobs);
        drop(endpoint);
        assert_eq!(bridge.pump(), vec![SurfaceAction::Closed]);
        assert!(bridge.pump().is_empty());
    }
}
