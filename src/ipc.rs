//! Messages crossing frame and privilege boundaries.
//!
//! Two channels exist. Frames of one tab exchange [`FrameMessage`]s through a
//! [`FramePort`]: input bubbles up, state patches flow down, nothing is
//! acknowledged. Content agents reach the background context through a
//! [`BackgroundClient`]; some requests are fire-and-forget, the rest carry a
//! reply channel.

pub mod background;
pub mod dispatch;
pub mod pipeline;

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use thiserror::Error;

use crate::actions::{CommandId, TabId};
use crate::frames::WindowId;
use crate::state::{GestureContext, StatePatch, TargetElementInfo};
use crate::tracker::MouseSample;

/// Inter-frame traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameMessage {
    MouseDown {
        sample: MouseSample,
        context: GestureContext,
        target: TargetElementInfo,
    },
    MouseUp(MouseSample),
    MouseMove(MouseSample),
    Wheel(MouseSample),
    ContextMenu(MouseSample),
    StateUpdate(StatePatch),
    LoadFrame,
    UnloadFrame,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub from: WindowId,
    pub message: FrameMessage,
}

/// postMessage-style delivery to another window of the same tab.
pub trait FramePort {
    fn post(&mut self, to: WindowId, envelope: Envelope);
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GestureRequest {
    pub gesture: String,
    pub context: GestureContext,
    pub target: TargetElementInfo,
}

/// Content -> background.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentRequest {
    GestureProgress { status: String },
    MouseGesture(GestureRequest),
    WheelGesture(GestureRequest),
    ChordGesture(GestureRequest),
    ExecuteInBackground { function: String, args: Vec<String> },
    RunCommand {
        command: CommandId,
        context: GestureContext,
        target: TargetElementInfo,
    },
    /// Answered once everything sent before it has been handled.
    Ping,
}

/// A user script the content side must run.
#[derive(Debug, Clone, PartialEq)]
pub struct UserScript {
    pub id: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GestureReply {
    pub status: Option<String>,
    /// The wheel/chord session continues.
    pub repeat: bool,
    pub script: Option<UserScript>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundReply {
    Ack,
    Gesture(GestureReply),
    Value(Result<String, String>),
}

#[derive(Debug)]
pub struct BackgroundMsg {
    pub tab: TabId,
    pub frame: WindowId,
    pub request: ContentRequest,
    pub reply: Option<Sender<BackgroundReply>>,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("background context is gone")]
    Disconnected,
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Content-side handle to the background context.
#[derive(Debug, Clone)]
pub struct BackgroundClient {
    tab: TabId,
    tx: Sender<BackgroundMsg>,
}

impl BackgroundClient {
    pub fn new(tab: TabId, tx: Sender<BackgroundMsg>) -> Self {
        Self { tab, tx }
    }

    pub fn notify(&self, frame: WindowId, request: ContentRequest) -> Result<(), ChannelError> {
        self.tx
            .send(BackgroundMsg {
                tab: self.tab,
                frame,
                request,
                reply: None,
            })
            .map_err(|_| ChannelError::Disconnected)
    }

    /// Send and hand back the pending reply.
    pub fn request(
        &self,
        frame: WindowId,
        request: ContentRequest,
    ) -> Result<Receiver<BackgroundReply>, ChannelError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(BackgroundMsg {
                tab: self.tab,
                frame,
                request,
                reply: Some(reply_tx),
            })
            .map_err(|_| ChannelError::Disconnected)?;
        Ok(reply_rx)
    }

    /// Send and wait for the reply.
    pub fn call(
        &self,
        frame: WindowId,
        request: ContentRequest,
    ) -> Result<BackgroundReply, ChannelError> {
        wait_reply(&self.request(frame, request)?)
    }
}

pub fn wait_reply(rx: &Receiver<BackgroundReply>) -> Result<BackgroundReply, ChannelError> {
    rx.recv_timeout(REPLY_TIMEOUT).map_err(|e| match e {
        RecvTimeoutError::Timeout => ChannelError::Timeout(REPLY_TIMEOUT),
        RecvTimeoutError::Disconnected => ChannelError::Disconnected,
    })
}
