//! Gesture lifecycle owned by the top frame, plus the replicated fragments
//! every other frame keeps.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::frames::WindowId;
use crate::gestures::{Chord, GestureRecognizer, Recognizer, WheelDirection};
use crate::ipc::{ContentRequest, GestureReply, GestureRequest};
use crate::tracker::MouseSample;

pub const TICK_MS: u64 = 100;
pub const DEAD_TIME_TICKS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GestureState {
    #[default]
    None,
    MouseDown,
    MouseMove,
    Wheel,
}

impl GestureState {
    pub fn is_tracking(self) -> bool {
        matches!(self, GestureState::MouseDown | GestureState::MouseMove)
    }
}

/// Where the gesture started. Captured at mouse-down.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GestureContext {
    pub frame: WindowId,
    pub frame_url: String,
    pub is_nested: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub src: String,
    /// `img`, `video` or `audio`.
    pub kind: String,
}

/// Snapshot of the element under the pointer at mouse-down.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetElementInfo {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub link_href: Option<String>,
    #[serde(default)]
    pub media: Option<MediaInfo>,
}

/// Fields replicated into every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharedState {
    pub state: GestureState,
    /// Native context menu allowed.
    pub context_menu: bool,
    /// A wheel/chord result is pending.
    pub disable_gestures: bool,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            state: GestureState::None,
            context_menu: true,
            disable_gestures: false,
        }
    }
}

impl SharedState {
    pub fn apply(&mut self, patch: &StatePatch) {
        if let Some(s) = patch.state {
            self.state = s;
        }
        if let Some(c) = patch.context_menu {
            self.context_menu = c;
        }
        if let Some(d) = patch.disable_gestures {
            self.disable_gestures = d;
        }
    }
}

/// Changed fields only.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatePatch {
    pub state: Option<GestureState>,
    pub context_menu: Option<bool>,
    pub disable_gestures: Option<bool>,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.context_menu.is_none() && self.disable_gestures.is_none()
    }
}

/// What survives a tab switch. Never the gesture string.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PresentationState {
    pub state: GestureState,
    pub context_menu: bool,
    pub chord: Vec<u8>,
}

/// Idle-tick counter behind the gesture timeout.
#[derive(Debug, Default)]
struct GestureTimer {
    limit: u32,
    idle: u32,
    running: bool,
}

impl GestureTimer {
    fn start(&mut self, timeout_ms: u64) {
        self.limit = u32::try_from(timeout_ms.div_ceil(TICK_MS)).unwrap_or(u32::MAX);
        self.idle = 0;
        self.running = self.limit > 0;
    }

    fn stop(&mut self) {
        self.running = false;
        self.idle = 0;
    }

    fn touch(&mut self) {
        self.idle = 0;
    }

    /// True when the limit is reached on this tick.
    fn tick(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.idle += 1;
        self.idle >= self.limit
    }
}

pub struct GestureStateMachine {
    settings: Settings,
    shared: SharedState,
    patch: StatePatch,
    requests: Vec<ContentRequest>,
    recognizer: GestureRecognizer,
    moved: bool,
    context: GestureContext,
    target: TargetElementInfo,
    chord: Chord,
    timer: GestureTimer,
    dead_ticks: u32,
    trail: Vec<(f64, f64)>,
    unloading: bool,
}

impl GestureStateMachine {
    pub fn new(settings: Settings) -> Self {
        let recognizer = GestureRecognizer::new(settings.gesture_style, settings.gesture_fidelity);
        Self {
            settings,
            shared: SharedState::default(),
            patch: StatePatch::default(),
            requests: Vec::new(),
            recognizer,
            moved: false,
            context: GestureContext::default(),
            target: TargetElementInfo::default(),
            chord: Chord::default(),
            timer: GestureTimer::default(),
            dead_ticks: 0,
            trail: Vec::new(),
            unloading: false,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Takes effect from the next gesture on.
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    pub fn state(&self) -> GestureState {
        self.shared.state
    }

    pub fn shared(&self) -> SharedState {
        self.shared
    }

    pub fn context_menu_allowed(&self) -> bool {
        self.shared.context_menu
    }

    pub fn current_gesture(&self) -> String {
        self.recognizer.current_gesture()
    }

    pub fn trail(&self) -> &[(f64, f64)] {
        &self.trail
    }

    pub fn set_unloading(&mut self, unloading: bool) {
        self.unloading = unloading;
    }

    /// Fields changed since the last call.
    pub fn take_patch(&mut self) -> Option<StatePatch> {
        let patch = std::mem::take(&mut self.patch);
        (!patch.is_empty()).then_some(patch)
    }

    pub fn take_requests(&mut self) -> Vec<ContentRequest> {
        std::mem::take(&mut self.requests)
    }

    fn set_state(&mut self, state: GestureState) {
        if self.shared.state != state {
            self.shared.state = state;
            self.patch.state = Some(state);
        }
    }

    fn set_context_menu(&mut self, allowed: bool) {
        if self.shared.context_menu != allowed {
            self.shared.context_menu = allowed;
            self.patch.context_menu = Some(allowed);
        }
    }

    fn set_disable_gestures(&mut self, disabled: bool) {
        if self.shared.disable_gestures != disabled {
            self.shared.disable_gestures = disabled;
            self.patch.disable_gestures = Some(disabled);
        }
    }

    fn request(&self, gesture: String) -> GestureRequest {
        GestureRequest {
            gesture,
            context: self.context.clone(),
            target: self.target.clone(),
        }
    }

    fn leave(&mut self) {
        self.timer.stop();
        self.trail.clear();
        self.chord = Chord::default();
        self.set_state(GestureState::None);
    }

    pub fn mouse_down(
        &mut self,
        sample: &MouseSample,
        context: GestureContext,
        target: TargetElementInfo,
    ) {
        if self.unloading {
            return;
        }
        let gesture_button = self.settings.gesture_button;
        match self.shared.state {
            GestureState::None if sample.button == gesture_button => {
                self.set_state(GestureState::MouseDown);
                self.set_context_menu(false);
                self.dead_ticks = 0;
                self.recognizer =
                    GestureRecognizer::new(self.settings.gesture_style, self.settings.gesture_fidelity);
                self.recognizer.reset(sample);
                self.moved = false;
                self.context = context;
                self.target = target;
                self.chord = Chord::start(gesture_button);
                self.trail.clear();
                if self.settings.draw_trail {
                    self.trail.push(self.recognizer.origin());
                }
                self.timer.start(self.settings.gesture_timeout_ms);
                debug!("state: gesture started in frame {}", self.context.frame);
            }
            GestureState::MouseDown | GestureState::MouseMove | GestureState::Wheel
                if self.settings.chord_gestures && sample.button != gesture_button =>
            {
                self.chord_press(sample.button);
            }
            _ => {}
        }
    }

    fn chord_press(&mut self, button: u8) {
        if self.shared.disable_gestures {
            debug!("state: chord result pending, dropping button {button}");
            return;
        }
        self.timer.stop();
        self.trail.clear();
        self.chord.press(button);
        self.set_state(GestureState::Wheel);
        self.set_context_menu(false);
        self.set_disable_gestures(true);
        let req = self.request(self.chord.to_gesture());
        self.requests.push(ContentRequest::ChordGesture(req));
    }

    pub fn mouse_move(&mut self, sample: &MouseSample) {
        match self.shared.state {
            GestureState::MouseDown => {
                self.set_state(GestureState::MouseMove);
                self.moved = true;
                self.set_context_menu(false);
                self.track(sample);
            }
            GestureState::MouseMove => self.track(sample),
            _ => {}
        }
    }

    fn track(&mut self, sample: &MouseSample) {
        self.timer.touch();
        let Some(step) = self.recognizer.step(sample) else {
            return;
        };
        if self.settings.draw_trail {
            self.trail.push((step.sample.x, step.sample.y));
        }
        if step.appended {
            self.requests.push(ContentRequest::GestureProgress {
                status: format!("Gesture: {}", self.recognizer.current_gesture()),
            });
        }
    }

    pub fn mouse_up(&mut self, sample: &MouseSample) {
        if sample.button != self.settings.gesture_button {
            return;
        }
        match self.shared.state {
            GestureState::MouseDown | GestureState::MouseMove => {
                let gesture = self.recognizer.current_gesture();
                if !self.moved {
                    self.set_context_menu(true);
                }
                self.leave();
                if !gesture.is_empty() {
                    let req = self.request(gesture);
                    self.requests.push(ContentRequest::MouseGesture(req));
                }
            }
            GestureState::Wheel => self.leave(),
            GestureState::None => {}
        }
    }

    /// Returns whether the wheel event belongs to the gesture (native
    /// scrolling should be prevented).
    pub fn wheel(&mut self, sample: &MouseSample) -> bool {
        if !self.settings.wheel_gestures || self.shared.state == GestureState::None {
            return false;
        }
        let Some(direction) = sample.wheel.as_ref().and_then(WheelDirection::classify) else {
            return true;
        };
        if self.shared.state.is_tracking() {
            self.timer.stop();
            self.trail.clear();
            self.set_state(GestureState::Wheel);
            self.set_context_menu(false);
        }
        if self.shared.disable_gestures {
            debug!("state: wheel result pending, dropping {direction}");
            return true;
        }
        self.set_disable_gestures(true);
        let req = self.request(direction.as_str().to_string());
        self.requests.push(ContentRequest::WheelGesture(req));
        true
    }

    /// Result of a wheel or chord dispatch.
    pub fn on_discrete_reply(&mut self, reply: &GestureReply) {
        self.set_disable_gestures(false);
        if self.shared.state == GestureState::Wheel && !reply.repeat {
            self.leave();
        }
    }

    pub fn tick(&mut self) {
        if self.dead_ticks > 0 {
            self.dead_ticks -= 1;
            if self.dead_ticks == 0 && self.shared.state == GestureState::None {
                self.set_context_menu(true);
            }
        }
        if self.shared.state.is_tracking() && self.timer.tick() {
            info!("state: gesture timed out");
            self.abort();
            self.requests.push(ContentRequest::GestureProgress {
                status: "Gesture timed out".to_string(),
            });
        }
    }

    /// Cancel whatever is in progress; the context menu stays suppressed
    /// for the dead time.
    pub fn abort(&mut self) {
        self.leave();
        self.set_disable_gestures(false);
        self.set_context_menu(false);
        self.dead_ticks = DEAD_TIME_TICKS;
    }

    pub fn presentation_state(&self) -> PresentationState {
        PresentationState {
            state: self.shared.state,
            context_menu: self.shared.context_menu,
            chord: self.chord.buttons().to_vec(),
        }
    }

    /// Adopt state cloned from another tab. Only a wheel/chord session can
    /// continue here; a drawn gesture cannot.
    pub fn apply_presentation(&mut self, snapshot: &PresentationState, context: GestureContext) {
        self.timer.stop();
        self.trail.clear();
        let state = if snapshot.state == GestureState::Wheel {
            GestureState::Wheel
        } else {
            GestureState::None
        };
        self.set_state(state);
        self.set_context_menu(snapshot.context_menu);
        self.set_disable_gestures(false);
        self.chord = Chord::from_buttons(snapshot.chord.clone());
        self.context = context;
        self.target = TargetElementInfo::default();
    }
}
