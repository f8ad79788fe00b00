//! Per-frame listener layer.
//!
//! Every frame runs a [`FrameAgent`]. The top frame's agent owns the
//! [`GestureStateMachine`]; nested agents rebase their input into the
//! parent's coordinates and pass it up, and keep a read-only replica of the
//! shared state for local decisions such as context-menu suppression.

use std::sync::mpsc::Receiver;

use log::{debug, info, warn};

use crate::actions::{CommandId, ContentCommand, ContentReply};
use crate::config::{Settings, SettingsPatch};
use crate::frames::{Document, FrameRegistry, WindowId};
use crate::ipc::{
    BackgroundClient, BackgroundReply, ContentRequest, Envelope, FrameMessage, FramePort,
    GestureReply, GestureRequest, UserScript, wait_reply,
};
use crate::scripts::{self, ScriptError, ScriptHost};
use crate::state::{
    GestureContext, GestureState, GestureStateMachine, SharedState, TargetElementInfo,
};
use crate::tracker::MouseSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomEventKind {
    MouseDown,
    MouseUp,
    MouseMove,
    Wheel,
    ContextMenu,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomEvent {
    pub kind: DomEventKind,
    pub sample: MouseSample,
    pub target: TargetElementInfo,
    /// False for script-synthesized events.
    pub trusted: bool,
}

impl DomEvent {
    pub fn new(kind: DomEventKind, sample: MouseSample) -> Self {
        Self {
            kind,
            sample,
            target: TargetElementInfo::default(),
            trusted: true,
        }
    }
}

impl FrameMessage {
    fn offset_by(self, ox: f64, oy: f64) -> Self {
        match self {
            FrameMessage::MouseDown {
                sample,
                context,
                target,
            } => FrameMessage::MouseDown {
                sample: sample.offset_by(ox, oy),
                context,
                target,
            },
            FrameMessage::MouseUp(s) => FrameMessage::MouseUp(s.offset_by(ox, oy)),
            FrameMessage::MouseMove(s) => FrameMessage::MouseMove(s.offset_by(ox, oy)),
            FrameMessage::Wheel(s) => FrameMessage::Wheel(s.offset_by(ox, oy)),
            FrameMessage::ContextMenu(s) => FrameMessage::ContextMenu(s.offset_by(ox, oy)),
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Mouse,
    Discrete,
}

struct Pending {
    kind: PendingKind,
    request: GestureRequest,
    rx: Receiver<BackgroundReply>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Scroll {
    y: f64,
    max: f64,
    page: f64,
}

impl Default for Scroll {
    fn default() -> Self {
        Self {
            y: 0.0,
            max: 10_000.0,
            page: 800.0,
        }
    }
}

pub struct FrameAgent {
    window: WindowId,
    parent: Option<WindowId>,
    url: String,
    settings: Settings,
    registry: FrameRegistry,
    replica: SharedState,
    machine: Option<GestureStateMachine>,
    client: BackgroundClient,
    pending: Vec<Pending>,
    unloading: bool,
    scroll: Scroll,
}

impl FrameAgent {
    pub fn new(
        window: WindowId,
        parent: Option<WindowId>,
        url: impl Into<String>,
        settings: Settings,
        client: BackgroundClient,
    ) -> Self {
        let machine = parent
            .is_none()
            .then(|| GestureStateMachine::new(settings.clone()));
        Self {
            window,
            parent,
            url: url.into(),
            settings,
            registry: FrameRegistry::new(),
            replica: SharedState::default(),
            machine,
            client,
            pending: Vec::new(),
            unloading: false,
            scroll: Scroll::default(),
        }
    }

    pub fn replica(&self) -> SharedState {
        self.replica
    }

    pub fn machine(&self) -> Option<&GestureStateMachine> {
        self.machine.as_ref()
    }

    pub fn scroll_y(&self) -> f64 {
        self.scroll.y
    }

    pub fn registry(&self) -> &FrameRegistry {
        &self.registry
    }

    pub fn apply_settings(&mut self, patch: &SettingsPatch) {
        self.settings.apply(patch);
        if let Some(m) = self.machine.as_mut() {
            m.set_settings(self.settings.clone());
        }
    }

    /// Tell the parent this frame exists.
    pub fn announce<P: FramePort + ?Sized>(&self, port: &mut P) {
        if let Some(parent) = self.parent {
            port.post(
                parent,
                Envelope {
                    from: self.window,
                    message: FrameMessage::LoadFrame,
                },
            );
        }
    }

    pub fn begin_unload<P: FramePort + ?Sized>(&mut self, port: &mut P) {
        self.unloading = true;
        if let Some(m) = self.machine.as_mut() {
            m.set_unloading(true);
        }
        if let Some(parent) = self.parent {
            port.post(
                parent,
                Envelope {
                    from: self.window,
                    message: FrameMessage::UnloadFrame,
                },
            );
        }
    }

    fn context(&self) -> GestureContext {
        GestureContext {
            frame: self.window,
            frame_url: self.url.clone(),
            is_nested: self.parent.is_some(),
        }
    }

    /// Entry point for DOM events raised in this frame. Returns whether the
    /// native default action should be prevented.
    pub fn on_dom_event<P: FramePort + ?Sized>(&mut self, event: DomEvent, port: &mut P) -> bool {
        if !event.trusted {
            debug!("frame {}: dropping untrusted {:?}", self.window, event.kind);
            return false;
        }
        match event.kind {
            DomEventKind::ContextMenu => {
                let suppress = !self.replica.context_menu;
                self.route(FrameMessage::ContextMenu(event.sample), port);
                suppress
            }
            DomEventKind::MouseDown => {
                if self.unloading {
                    return false;
                }
                let msg = FrameMessage::MouseDown {
                    sample: event.sample,
                    context: self.context(),
                    target: event.target,
                };
                self.route(msg, port);
                false
            }
            DomEventKind::MouseMove => {
                self.route(FrameMessage::MouseMove(event.sample), port);
                false
            }
            DomEventKind::MouseUp => {
                self.route(FrameMessage::MouseUp(event.sample), port);
                false
            }
            DomEventKind::Wheel => {
                let prevent =
                    self.settings.wheel_gestures && self.replica.state != GestureState::None;
                self.route(FrameMessage::Wheel(event.sample), port);
                prevent
            }
        }
    }

    fn route<P: FramePort + ?Sized>(&mut self, msg: FrameMessage, port: &mut P) {
        match self.parent {
            Some(parent) => port.post(
                parent,
                Envelope {
                    from: self.window,
                    message: msg,
                },
            ),
            None => self.handle_top(msg, port),
        }
    }

    /// Inter-frame message delivery.
    pub fn on_message<P: FramePort + ?Sized>(&mut self, env: Envelope, doc: &Document, port: &mut P) {
        match env.message {
            FrameMessage::LoadFrame => {
                self.registry.on_frame_loaded(env.from, doc);
                debug!("frame {}: {} child frame(s) known", self.window, self.registry.len());
            }
            FrameMessage::UnloadFrame => self.registry.on_frame_unloaded(env.from),
            FrameMessage::StateUpdate(patch) => {
                if Some(env.from) != self.parent {
                    debug!("frame {}: state update from non-parent {}", self.window, env.from);
                    return;
                }
                self.replica.apply(&patch);
                self.registry
                    .broadcast(port, self.window, &FrameMessage::StateUpdate(patch));
            }
            input => {
                let input = match self.registry.offset_for(env.from) {
                    Some((ox, oy)) => input.offset_by(ox, oy),
                    None => {
                        debug!("frame {}: unknown child {}, not rebasing", self.window, env.from);
                        input
                    }
                };
                self.route(input, port);
            }
        }
    }

    fn handle_top<P: FramePort + ?Sized>(&mut self, msg: FrameMessage, port: &mut P) {
        let Some(machine) = self.machine.as_mut() else {
            return;
        };
        match msg {
            FrameMessage::MouseDown {
                sample,
                context,
                target,
            } => machine.mouse_down(&sample, context, target),
            FrameMessage::MouseMove(s) => machine.mouse_move(&s),
            FrameMessage::MouseUp(s) => machine.mouse_up(&s),
            FrameMessage::Wheel(s) => {
                machine.wheel(&s);
            }
            FrameMessage::ContextMenu(s) => debug!(
                "frame {}: context menu at ({}, {}), allowed={}",
                self.window,
                s.x,
                s.y,
                machine.context_menu_allowed()
            ),
            _ => {}
        }
        self.flush(port);
    }

    /// Push state changes down and requests out.
    fn flush<P: FramePort + ?Sized>(&mut self, port: &mut P) {
        let Some(machine) = self.machine.as_mut() else {
            return;
        };
        let patch = machine.take_patch();
        let requests = machine.take_requests();

        if let Some(patch) = patch {
            self.replica.apply(&patch);
            self.registry
                .broadcast(port, self.window, &FrameMessage::StateUpdate(patch));
        }

        for req in requests {
            let (kind, gesture) = match &req {
                ContentRequest::MouseGesture(g) => (PendingKind::Mouse, g.clone()),
                ContentRequest::WheelGesture(g) | ContentRequest::ChordGesture(g) => {
                    (PendingKind::Discrete, g.clone())
                }
                _ => {
                    if let Err(e) = self.client.notify(self.window, req) {
                        warn!("frame {}: {e}", self.window);
                    }
                    continue;
                }
            };
            match self.client.request(self.window, req) {
                Ok(rx) => self.pending.push(Pending {
                    kind,
                    request: gesture,
                    rx,
                }),
                Err(e) => {
                    warn!("frame {}: {e}", self.window);
                    if kind == PendingKind::Discrete {
                        if let Some(m) = self.machine.as_mut() {
                            m.on_discrete_reply(&GestureReply::default());
                        }
                    }
                }
            }
        }
    }

    pub fn tick<P: FramePort + ?Sized>(&mut self, port: &mut P) {
        if let Some(m) = self.machine.as_mut() {
            m.tick();
            self.flush(port);
        }
    }

    /// Wait for every outstanding background reply and act on it. Returns
    /// whether anything was pending.
    pub fn settle<P: FramePort + ?Sized>(&mut self, port: &mut P) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        for p in std::mem::take(&mut self.pending) {
            let reply = match wait_reply(&p.rx) {
                Ok(BackgroundReply::Gesture(reply)) => reply,
                Ok(other) => {
                    warn!("frame {}: unexpected reply {other:?}", self.window);
                    GestureReply::default()
                }
                Err(e) => {
                    warn!("frame {}: {e}", self.window);
                    GestureReply::default()
                }
            };
            if p.kind == PendingKind::Discrete {
                if let Some(m) = self.machine.as_mut() {
                    m.on_discrete_reply(&reply);
                }
            }
            if let Some(script) = &reply.script {
                self.run_script(script, &p.request);
            }
        }
        self.flush(port);
        true
    }

    /// Faults are reported as a status and never escape.
    fn run_script(&self, script: &UserScript, req: &GestureRequest) {
        // requests are tagged with the frame the gesture started in
        let mut host = ContentScriptHost {
            client: &self.client,
            frame: req.context.frame,
            request: req,
        };
        let status = match scripts::run(script, &mut host) {
            Ok(()) => {
                debug!("frame {}: script '{}' finished", self.window, script.id);
                return;
            }
            Err(e) => format!("Script '{}' failed: {e}", script.id),
        };
        warn!("frame {}: {status}", self.window);
        if let Err(e) = self
            .client
            .notify(self.window, ContentRequest::GestureProgress { status })
        {
            warn!("frame {}: {e}", self.window);
        }
    }

    /// Commands from the host. Only the top agent holds gesture state.
    pub fn on_command<P: FramePort + ?Sized>(
        &mut self,
        command: ContentCommand,
        port: &mut P,
    ) -> ContentReply {
        match command {
            ContentCommand::Delegate { command, .. } => {
                self.run_dom_command(command);
                ContentReply::Done
            }
            ContentCommand::AbortGesture => {
                if let Some(m) = self.machine.as_mut() {
                    m.abort();
                }
                self.flush(port);
                ContentReply::Done
            }
            ContentCommand::ApplyState(snapshot) => {
                let ctx = self.context();
                if let Some(m) = self.machine.as_mut() {
                    m.apply_presentation(&snapshot, ctx);
                }
                self.flush(port);
                ContentReply::Done
            }
            ContentCommand::QueryState => match self.machine.as_ref() {
                Some(m) => ContentReply::State(m.presentation_state()),
                None => ContentReply::Done,
            },
        }
    }

    fn run_dom_command(&mut self, command: CommandId) {
        let s = &mut self.scroll;
        match command {
            CommandId::ScrollTop => s.y = 0.0,
            CommandId::ScrollBottom => s.y = s.max,
            CommandId::PageUp => s.y = (s.y - s.page).max(0.0),
            CommandId::PageDown => s.y = (s.y + s.page).min(s.max),
            CommandId::Stop => {}
            other => {
                warn!("frame {}: {other} is not a frame command", self.window);
                return;
            }
        }
        info!("frame {}: {command} (scroll y = {})", self.window, s.y);
    }
}

/// Helpers injected into a running user script.
struct ContentScriptHost<'a> {
    client: &'a BackgroundClient,
    frame: WindowId,
    request: &'a GestureRequest,
}

impl ScriptHost for ContentScriptHost<'_> {
    fn status(&mut self, text: &str) {
        let req = ContentRequest::GestureProgress {
            status: text.to_string(),
        };
        if let Err(e) = self.client.notify(self.frame, req) {
            warn!("script: {e}");
        }
    }

    fn command(&mut self, command: CommandId) -> Result<(), ScriptError> {
        let req = ContentRequest::RunCommand {
            command,
            context: self.request.context.clone(),
            target: self.request.target.clone(),
        };
        match self.client.call(self.frame, req) {
            Ok(BackgroundReply::Value(Ok(_))) => Ok(()),
            Ok(BackgroundReply::Value(Err(message))) => Err(ScriptError::CommandFailed {
                command: command.to_string(),
                message,
            }),
            Ok(other) => Err(ScriptError::CommandFailed {
                command: command.to_string(),
                message: format!("unexpected reply {other:?}"),
            }),
            Err(e) => Err(ScriptError::CommandFailed {
                command: command.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn execute_in_background(
        &mut self,
        function: &str,
        args: &[String],
    ) -> Result<String, ScriptError> {
        let req = ContentRequest::ExecuteInBackground {
            function: function.to_string(),
            args: args.to_vec(),
        };
        let fail = |message: String| ScriptError::Background {
            function: function.to_string(),
            message,
        };
        match self.client.call(self.frame, req) {
            Ok(BackgroundReply::Value(v)) => v.map_err(fail),
            Ok(other) => Err(fail(format!("unexpected reply {other:?}"))),
            Err(e) => Err(fail(e.to_string())),
        }
    }
}
