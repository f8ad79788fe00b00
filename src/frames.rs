//! Child-frame bookkeeping for coordinate re-basing and downward broadcast.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::ipc::{Envelope, FrameMessage, FramePort};

/// Opaque handle of a frame's content window.
pub type WindowId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

/// A `<frame>`/`<iframe>` element in some document.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameElement {
    pub content_window: WindowId,
    pub rect: Rect,
}

/// The part of a document the registry needs: its frame elements.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub url: String,
    pub frames: Vec<FrameElement>,
}

impl Document {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            frames: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn with_frame(mut self, content_window: WindowId, rect: Rect) -> Self {
        self.frames.push(FrameElement {
            content_window,
            rect,
        });
        self
    }

    pub fn remove_frame(&mut self, content_window: WindowId) {
        self.frames.retain(|f| f.content_window != content_window);
    }
}

#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub window: WindowId,
    pub element: FrameElement,
}

#[derive(Debug, Default)]
pub struct FrameRegistry {
    records: Vec<FrameRecord>,
}

impl FrameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match `window` against the document's frame elements and remember it.
    /// Windows whose element is already gone are ignored.
    pub fn on_frame_loaded(&mut self, window: WindowId, doc: &Document) {
        let Some(element) = doc
            .frames
            .iter()
            .find(|f| f.content_window == window)
            .cloned()
        else {
            debug!("frames: no element for window {window} in {}, ignoring", doc.url);
            return;
        };
        self.records.retain(|r| r.window != window);
        self.records.push(FrameRecord { window, element });
    }

    pub fn on_frame_unloaded(&mut self, window: WindowId) {
        self.records.retain(|r| r.window != window);
    }

    /// Top-left of the frame element in this document's coordinates.
    pub fn offset_for(&self, window: WindowId) -> Option<(f64, f64)> {
        self.records
            .iter()
            .find(|r| r.window == window)
            .map(|r| (r.element.rect.x, r.element.rect.y))
    }

    pub fn broadcast<P: FramePort + ?Sized>(
        &self,
        port: &mut P,
        from: WindowId,
        message: &FrameMessage,
    ) {
        for r in &self.records {
            port.post(
                r.window,
                Envelope {
                    from,
                    message: message.clone(),
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StatePatch;

    fn doc() -> Document {
        Document::new("https://example.org/")
            .with_frame(
                2,
                Rect {
                    x: 100.0,
                    y: 40.0,
                    width: 300.0,
                    height: 200.0,
                },
            )
            .with_frame(
                3,
                Rect {
                    x: 0.0,
                    y: 500.0,
                    width: 50.0,
                    height: 50.0,
                },
            )
    }

    #[derive(Default)]
    struct Collect(Vec<(WindowId, Envelope)>);

    impl FramePort for Collect {
        fn post(&mut self, to: WindowId, envelope: Envelope) {
            self.0.push((to, envelope));
        }
    }

    #[test]
    fn loaded_frames_report_offsets() {
        let mut reg = FrameRegistry::new();
        reg.on_frame_loaded(2, &doc());
        assert_eq!(reg.offset_for(2), Some((100.0, 40.0)));
        assert_eq!(reg.offset_for(3), None);
    }

    #[test]
    fn unknown_window_is_ignored() {
        let mut reg = FrameRegistry::new();
        reg.on_frame_loaded(9, &doc());
        assert!(reg.is_empty());
    }

    #[test]
    fn unload_forgets_the_frame() {
        let mut reg = FrameRegistry::new();
        reg.on_frame_loaded(2, &doc());
        reg.on_frame_loaded(2, &doc());
        assert_eq!(reg.len(), 1);
        reg.on_frame_unloaded(2);
        assert_eq!(reg.offset_for(2), None);
    }

    #[test]
    fn broadcast_reaches_every_child() {
        let mut reg = FrameRegistry::new();
        reg.on_frame_loaded(2, &doc());
        reg.on_frame_loaded(3, &doc());
        let mut port = Collect::default();
        let msg = FrameMessage::StateUpdate(StatePatch::default());
        reg.broadcast(&mut port, 1, &msg);
        let targets: Vec<_> = port.0.iter().map(|(to, _)| *to).collect();
        assert_eq!(targets, vec![2, 3]);
        assert!(port.0.iter().all(|(_, e)| e.from == 1));
    }
}
