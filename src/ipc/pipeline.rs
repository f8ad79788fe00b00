//! In-process browser: tabs of nested frames, the inter-frame queue, the
//! background context and the host operations it requests. Replay scripts
//! drive it step by step.

use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use thiserror::Error;

use super::background::BackgroundHandle;
use super::{ContentRequest, Envelope, FramePort};
use crate::actions::{ContentCommand, ContentReply, HostOp, TabId};
use crate::config::{Profile, Settings, SettingsPatch};
use crate::content::{DomEvent, DomEventKind, FrameAgent};
use crate::frames::{Document, FrameElement, Rect, WindowId};
use crate::state::{GestureState, SharedState, TargetElementInfo};
use crate::tracker::{MouseSample, WheelDelta};

const MAX_SETTLE_ROUNDS: usize = 64;

#[derive(Debug, Error)]
pub enum StateCloneError {
    #[error("tab {0} is a privileged page")]
    Privileged(TabId),
    #[error("tab {0} is gone")]
    Closed(TabId),
}

impl FramePort for VecDeque<(WindowId, Envelope)> {
    fn post(&mut self, to: WindowId, envelope: Envelope) {
        self.push_back((to, envelope));
    }
}

struct FrameSlot {
    agent: FrameAgent,
    doc: Document,
    parent: Option<WindowId>,
}

pub struct Tab {
    pub id: TabId,
    pub privileged: bool,
    top: WindowId,
    frames: BTreeMap<WindowId, FrameSlot>,
    queue: VecDeque<(WindowId, Envelope)>,
    history: Vec<String>,
    history_pos: usize,
}

impl Tab {
    fn new(id: TabId, top: WindowId, url: &str, privileged: bool, agent: FrameAgent) -> Self {
        let mut frames = BTreeMap::new();
        frames.insert(
            top,
            FrameSlot {
                agent,
                doc: Document::new(url),
                parent: None,
            },
        );
        Self {
            id,
            privileged,
            top,
            frames,
            queue: VecDeque::new(),
            history: vec![url.to_string()],
            history_pos: 0,
        }
    }

    pub fn top(&self) -> WindowId {
        self.top
    }

    pub fn url(&self) -> &str {
        &self.history[self.history_pos]
    }

    pub fn windows(&self) -> Vec<WindowId> {
        self.frames.keys().copied().collect()
    }

    pub fn contains(&self, window: WindowId) -> bool {
        self.frames.contains_key(&window)
    }

    pub fn agent(&self, window: WindowId) -> Option<&FrameAgent> {
        self.frames.get(&window).map(|s| &s.agent)
    }

    /// Deliver queued inter-frame messages until the queue is empty.
    fn pump(&mut self) {
        while let Some((to, env)) = self.queue.pop_front() {
            match self.frames.get_mut(&to) {
                Some(FrameSlot { agent, doc, .. }) => agent.on_message(env, doc, &mut self.queue),
                None => debug!("tab {}: dropping message for gone window {to}", self.id),
            }
        }
    }

    fn add_frame(
        &mut self,
        window: WindowId,
        parent: WindowId,
        url: &str,
        rect: Rect,
        agent: FrameAgent,
    ) -> Result<()> {
        let parent_slot = self
            .frames
            .get_mut(&parent)
            .ok_or_else(|| anyhow!("tab {}: no parent window {parent}", self.id))?;
        parent_slot.doc.frames.push(FrameElement {
            content_window: window,
            rect,
        });
        agent.announce(&mut self.queue);
        self.frames.insert(
            window,
            FrameSlot {
                agent,
                doc: Document::new(url),
                parent: Some(parent),
            },
        );
        self.pump();
        Ok(())
    }

    fn remove_frame(&mut self, window: WindowId) -> Result<()> {
        if window == self.top {
            return Err(anyhow!("tab {}: cannot unload the top frame", self.id));
        }
        let children: Vec<WindowId> = self
            .frames
            .iter()
            .filter(|(_, s)| s.parent == Some(window))
            .map(|(w, _)| *w)
            .collect();
        for child in children {
            self.remove_frame(child)?;
        }
        let slot = self
            .frames
            .get_mut(&window)
            .ok_or_else(|| anyhow!("tab {}: no window {window}", self.id))?;
        slot.agent.begin_unload(&mut self.queue);
        self.pump();
        if let Some(slot) = self.frames.remove(&window) {
            if let Some(parent) = slot.parent.and_then(|p| self.frames.get_mut(&p)) {
                parent.doc.remove_frame(window);
            }
        }
        Ok(())
    }

    fn dom_event(&mut self, window: WindowId, event: DomEvent) -> Result<bool> {
        if self.privileged {
            debug!("tab {}: no content agents on privileged pages", self.id);
            return Ok(false);
        }
        let slot = self
            .frames
            .get_mut(&window)
            .ok_or_else(|| anyhow!("tab {}: no window {window}", self.id))?;
        let prevent = slot.agent.on_dom_event(event, &mut self.queue);
        self.pump();
        Ok(prevent)
    }

    fn tick(&mut self) {
        for slot in self.frames.values_mut() {
            slot.agent.tick(&mut self.queue);
        }
        self.pump();
    }

    fn settle(&mut self) -> bool {
        let mut any = false;
        for slot in self.frames.values_mut() {
            any |= slot.agent.settle(&mut self.queue);
        }
        self.pump();
        any
    }

    fn apply_settings(&mut self, patch: &SettingsPatch) {
        for slot in self.frames.values_mut() {
            slot.agent.apply_settings(patch);
        }
    }

    /// Request/response with the tab's top content agent.
    fn request(&mut self, command: ContentCommand) -> Result<ContentReply, StateCloneError> {
        if self.privileged {
            return Err(StateCloneError::Privileged(self.id));
        }
        let top = self.top;
        let slot = self
            .frames
            .get_mut(&top)
            .ok_or(StateCloneError::Closed(self.id))?;
        let reply = slot.agent.on_command(command, &mut self.queue);
        self.pump();
        Ok(reply)
    }

    fn deliver(&mut self, frame: WindowId, command: ContentCommand) {
        match self.frames.get_mut(&frame) {
            Some(slot) => {
                slot.agent.on_command(command, &mut self.queue);
                self.pump();
            }
            None => debug!("tab {}: delegate target {frame} is gone", self.id),
        }
    }

    /// Pages visited before the current one, oldest first.
    fn seed_history(&mut self, earlier: &[String]) {
        let current = self.url().to_string();
        self.history = earlier.to_vec();
        self.history.push(current);
        self.history_pos = self.history.len() - 1;
    }

    /// Forward entries are dropped, as in a browser.
    fn navigate(&mut self, url: &str) {
        self.history.truncate(self.history_pos + 1);
        self.history.push(url.to_string());
        self.history_pos = self.history.len() - 1;
        if let Some(slot) = self.frames.get_mut(&self.top) {
            slot.doc.url = url.to_string();
        }
    }

    fn navigate_history(&mut self, delta: i32) -> bool {
        let pos = self.history_pos as i64 + delta as i64;
        if pos < 0 || pos >= self.history.len() as i64 {
            return false;
        }
        self.history_pos = pos as usize;
        let url = self.history[self.history_pos].clone();
        if let Some(slot) = self.frames.get_mut(&self.top) {
            slot.doc.url = url;
        }
        true
    }
}

/// Frame tree of a tab in a replay script.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameSpec {
    pub id: WindowId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub rect: Rect,
    #[serde(default)]
    pub frames: Vec<FrameSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TabSpec {
    pub url: String,
    #[serde(default)]
    pub privileged: bool,
    /// Earlier pages, oldest first. `url` is the current entry.
    #[serde(default)]
    pub history: Vec<String>,
    pub frame: FrameSpec,
}

impl FrameSpec {
    fn ids(&self, out: &mut Vec<WindowId>) {
        out.push(self.id);
        for f in &self.frames {
            f.ids(out);
        }
    }
}

fn default_button() -> u8 {
    2
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Step {
    MouseDown {
        frame: WindowId,
        #[serde(default = "default_button")]
        button: u8,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
        #[serde(default)]
        target: TargetElementInfo,
        #[serde(default)]
        untrusted: bool,
    },
    MouseMove {
        frame: WindowId,
        dx: f64,
        dy: f64,
        #[serde(default)]
        untrusted: bool,
    },
    MouseUp {
        frame: WindowId,
        #[serde(default = "default_button")]
        button: u8,
        #[serde(default)]
        untrusted: bool,
    },
    Wheel {
        frame: WindowId,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
        #[serde(default)]
        untrusted: bool,
    },
    ContextMenu {
        frame: WindowId,
        #[serde(default)]
        untrusted: bool,
    },
    Tick {
        #[serde(default = "one")]
        count: u32,
    },
    Settle,
    Unload {
        frame: WindowId,
    },
    Activate {
        tab: TabId,
    },
    /// Load a new page in the tab's top frame.
    Navigate {
        tab: TabId,
        url: String,
    },
    Settings(SettingsPatch),
    /// Swap in another profile file, relative to the script.
    Profile {
        path: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayScript {
    /// Profile file, relative to the script.
    #[serde(default)]
    pub profile: Option<String>,
    pub tabs: Vec<TabSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

pub struct Browser {
    tabs: Vec<Tab>,
    active: usize,
    settings: Settings,
    bg: BackgroundHandle,
    host_rx: Receiver<HostOp>,
    next_tab: TabId,
    next_window: WindowId,
    pointers: HashMap<WindowId, (f64, f64)>,
    status: Option<String>,
    log: Vec<String>,
    base_dir: PathBuf,
}

impl Browser {
    pub fn new(profile: Profile) -> Result<Self> {
        let settings = profile.settings.clone();
        let (host_tx, host_rx) = mpsc::channel();
        let bg = BackgroundHandle::start(profile, host_tx)?;
        Ok(Self {
            tabs: Vec::new(),
            active: 0,
            settings,
            bg,
            host_rx,
            next_tab: 1,
            next_window: 1,
            pointers: HashMap::new(),
            status: None,
            log: Vec::new(),
            base_dir: PathBuf::from("."),
        })
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    fn note(&mut self, line: String) {
        info!("host: {line}");
        self.log.push(line);
    }

    pub fn tab_ids(&self) -> Vec<TabId> {
        self.tabs.iter().map(|t| t.id).collect()
    }

    pub fn active_tab(&self) -> Option<TabId> {
        self.tabs.get(self.active).map(|t| t.id)
    }

    pub fn tab(&self, id: TabId) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == id)
    }

    fn tab_index(&self, id: TabId) -> Option<usize> {
        self.tabs.iter().position(|t| t.id == id)
    }

    fn tab_of(&self, window: WindowId) -> Result<usize> {
        self.tabs
            .iter()
            .position(|t| t.contains(window))
            .ok_or_else(|| anyhow!("no frame with window {window}"))
    }

    fn window_in_use(&self, window: WindowId) -> bool {
        self.tabs.iter().any(|t| t.contains(window))
    }

    fn agent(&self, window: WindowId) -> Option<&FrameAgent> {
        self.tabs.iter().find_map(|t| t.agent(window))
    }

    /// Replicated state as seen from `window`.
    pub fn replica(&self, window: WindowId) -> Option<SharedState> {
        self.agent(window).map(|a| a.replica())
    }

    pub fn top_state(&self, tab: TabId) -> Option<GestureState> {
        let t = self.tab(tab)?;
        t.agent(t.top())?.machine().map(|m| m.state())
    }

    pub fn current_gesture(&self, tab: TabId) -> Option<String> {
        let t = self.tab(tab)?;
        t.agent(t.top())?.machine().map(|m| m.current_gesture())
    }

    pub fn trail(&self, tab: TabId) -> Vec<(f64, f64)> {
        self.tab(tab)
            .and_then(|t| t.agent(t.top()))
            .and_then(|a| a.machine())
            .map(|m| m.trail().to_vec())
            .unwrap_or_default()
    }

    pub fn scroll_y(&self, window: WindowId) -> Option<f64> {
        self.agent(window).map(|a| a.scroll_y())
    }

    fn alloc_window(&mut self, wanted: Option<WindowId>) -> WindowId {
        let id = wanted.unwrap_or(self.next_window);
        self.next_window = self.next_window.max(id + 1);
        id
    }

    fn new_agent(
        &self,
        tab: TabId,
        window: WindowId,
        parent: Option<WindowId>,
        url: &str,
    ) -> FrameAgent {
        FrameAgent::new(window, parent, url, self.settings.clone(), self.bg.client(tab))
    }

    pub fn open_tab(&mut self, url: &str, privileged: bool) -> (TabId, WindowId) {
        self.open_tab_with(url, privileged, None)
    }

    fn open_tab_with(
        &mut self,
        url: &str,
        privileged: bool,
        top: Option<WindowId>,
    ) -> (TabId, WindowId) {
        let id = self.next_tab;
        self.next_tab += 1;
        let top = self.alloc_window(top);
        let agent = self.new_agent(id, top, None, url);
        self.tabs.push(Tab::new(id, top, url, privileged, agent));
        (id, top)
    }

    pub fn add_frame(
        &mut self,
        tab: TabId,
        window: Option<WindowId>,
        parent: WindowId,
        url: &str,
        rect: Rect,
    ) -> Result<WindowId> {
        let idx = self
            .tab_index(tab)
            .ok_or_else(|| anyhow!("no tab {tab}"))?;
        if let Some(w) = window {
            if self.window_in_use(w) {
                return Err(anyhow!("window {w} is already loaded"));
            }
        }
        let window = self.alloc_window(window);
        let agent = self.new_agent(tab, window, Some(parent), url);
        self.tabs[idx].add_frame(window, parent, url, rect, agent)?;
        Ok(window)
    }

    pub fn load_tab(&mut self, spec: &TabSpec) -> Result<TabId> {
        let mut ids = Vec::new();
        spec.frame.ids(&mut ids);
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id) || self.window_in_use(id) {
                return Err(anyhow!("tab {}: window {id} is used twice", spec.url));
            }
        }
        let (tab, top) = self.open_tab_with(&spec.url, spec.privileged, Some(spec.frame.id));
        if !spec.history.is_empty() {
            if let Some(t) = self.tabs.last_mut() {
                t.seed_history(&spec.history);
            }
        }
        let mut stack: Vec<(WindowId, &FrameSpec)> =
            spec.frame.frames.iter().map(|f| (top, f)).collect();
        while let Some((parent, f)) = stack.pop() {
            let url = f.url.clone().unwrap_or_else(|| format!("{}#frame{}", spec.url, f.id));
            let window = self.add_frame(tab, Some(f.id), parent, &url, f.rect)?;
            stack.extend(f.frames.iter().map(|c| (window, c)));
        }
        Ok(tab)
    }

    pub fn activate(&mut self, tab: TabId) -> Result<()> {
        self.active = self.tab_index(tab).ok_or_else(|| anyhow!("no tab {tab}"))?;
        Ok(())
    }

    pub fn navigate(&mut self, tab: TabId, url: &str) -> Result<()> {
        let idx = self.tab_index(tab).ok_or_else(|| anyhow!("no tab {tab}"))?;
        self.tabs[idx].navigate(url);
        self.note(format!("tab {tab}: navigated to {url}"));
        Ok(())
    }

    pub fn unload_frame(&mut self, window: WindowId) -> Result<()> {
        let idx = self.tab_of(window)?;
        self.tabs[idx].remove_frame(window)
    }

    /// Dispatch a DOM event in `window`. Returns whether its default was
    /// prevented.
    pub fn dom_event(&mut self, window: WindowId, event: DomEvent) -> Result<bool> {
        let idx = self.tab_of(window)?;
        self.tabs[idx].dom_event(window, event)
    }

    pub fn tick(&mut self) {
        for tab in self.tabs.iter_mut() {
            tab.tick();
        }
    }

    pub fn apply_settings(&mut self, patch: &SettingsPatch) {
        self.settings.apply(patch);
        for tab in self.tabs.iter_mut() {
            tab.apply_settings(patch);
        }
    }

    /// Mappings switch immediately; settings reach every frame.
    pub fn set_profile(&mut self, profile: Profile) {
        let patch = SettingsPatch::from(&profile.settings);
        let name = profile.meta.name.clone().unwrap_or_else(|| "unnamed".into());
        self.bg.update_profile(profile);
        self.apply_settings(&patch);
        self.note(format!("profile: {name}"));
    }

    /// Directory `profile` steps are resolved against.
    pub fn set_base_dir(&mut self, dir: &Path) {
        self.base_dir = dir.to_path_buf();
    }

    /// Run until no replies are outstanding and the host has nothing left
    /// to do.
    pub fn settle(&mut self) -> Result<()> {
        for _ in 0..MAX_SETTLE_ROUNDS {
            // everything sent so far has been handled once this returns
            self.bg.client(0).call(0, ContentRequest::Ping)?;
            let mut busy = false;
            for tab in self.tabs.iter_mut() {
                busy |= tab.settle();
            }
            while let Ok(op) = self.host_rx.try_recv() {
                busy = true;
                self.apply(op);
            }
            if !busy {
                return Ok(());
            }
        }
        warn!("host: still busy after {MAX_SETTLE_ROUNDS} rounds");
        Ok(())
    }

    fn apply(&mut self, op: HostOp) {
        match op {
            HostOp::Status(s) => {
                self.note(format!("status: {s}"));
                self.status = Some(s);
            }
            HostOp::CloseTab(id) => {
                let Some(idx) = self.tab_index(id) else {
                    return;
                };
                self.tabs.remove(idx);
                if idx < self.active || self.active >= self.tabs.len() {
                    self.active = self.active.saturating_sub(1);
                }
                self.note(format!("closed tab {id}"));
            }
            HostOp::OpenTab { url, active } => {
                let (id, _) = self.open_tab(&url, false);
                if active {
                    self.active = self.tabs.len() - 1;
                }
                self.note(format!("opened tab {id} at {url}"));
            }
            HostOp::SwitchTab { from, offset } => {
                let Some(from_idx) = self.tab_index(from) else {
                    return;
                };
                let n = self.tabs.len() as i64;
                let to_idx = (from_idx as i64 + offset as i64).rem_euclid(n) as usize;
                if to_idx == from_idx {
                    return;
                }
                self.carry_state(from_idx, to_idx);
                self.active = to_idx;
                let to = self.tabs[to_idx].id;
                self.note(format!("activated tab {to}"));
            }
            HostOp::History { tab, delta } => {
                let Some(idx) = self.tab_index(tab) else {
                    return;
                };
                let moved = self.tabs[idx].navigate_history(delta);
                let dir = if delta < 0 { "back" } else { "forward" };
                if moved {
                    let url = self.tabs[idx].url().to_string();
                    self.note(format!("tab {tab}: {dir} to {url}"));
                } else {
                    self.note(format!("tab {tab}: no history to go {dir}"));
                }
            }
            HostOp::Reload(tab) => self.note(format!("tab {tab}: reload")),
            HostOp::Delegate {
                tab,
                frame,
                command,
            } => {
                let Some(idx) = self.tab_index(tab) else {
                    return;
                };
                self.tabs[idx].deliver(frame, ContentCommand::Delegate { frame, command });
                self.note(format!("tab {tab} frame {frame}: {command}"));
            }
            HostOp::Abort(tab) => {
                let Some(idx) = self.tab_index(tab) else {
                    return;
                };
                match self.tabs[idx].request(ContentCommand::AbortGesture) {
                    Ok(_) => debug!("host: aborted gesture in tab {tab}"),
                    Err(e) => debug!("host: abort in tab {tab}: {e}"),
                }
            }
        }
    }

    /// Clone presentation state from the tab being left into the tab being
    /// entered. Failures only cost continuity. The tab being left is
    /// aborted by the `Abort` that follows every switch.
    fn carry_state(&mut self, from_idx: usize, to_idx: usize) {
        let snapshot = match self.tabs[from_idx].request(ContentCommand::QueryState) {
            Ok(ContentReply::State(s)) => s,
            Ok(ContentReply::Done) => return,
            Err(e) => {
                debug!("host: state clone skipped: {e}");
                return;
            }
        };
        if let Err(e) = self.tabs[to_idx].request(ContentCommand::ApplyState(snapshot)) {
            debug!("host: state clone skipped: {e}");
        }
    }

    pub fn load_script(&mut self, script: &ReplayScript) -> Result<()> {
        for spec in &script.tabs {
            self.load_tab(spec)?;
        }
        self.active = 0;
        Ok(())
    }

    fn pointer_event(
        &mut self,
        window: WindowId,
        kind: DomEventKind,
        sample: MouseSample,
        untrusted: bool,
    ) -> Result<bool> {
        let mut event = DomEvent::new(kind, sample);
        event.trusted = !untrusted;
        self.dom_event(window, event)
    }

    pub fn run_step(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::MouseDown {
                frame,
                button,
                x,
                y,
                target,
                untrusted,
            } => {
                self.pointers.insert(*frame, (*x, *y));
                let mut event = DomEvent::new(DomEventKind::MouseDown, MouseSample::at(*button, *x, *y));
                event.target = target.clone();
                event.trusted = !*untrusted;
                self.dom_event(*frame, event)?;
            }
            Step::MouseMove {
                frame,
                dx,
                dy,
                untrusted,
            } => {
                let (x, y) = self.pointers.get(frame).copied().unwrap_or_default();
                let (x, y) = (x + dx, y + dy);
                self.pointers.insert(*frame, (x, y));
                let sample = MouseSample {
                    button: self.settings.gesture_button,
                    x,
                    y,
                    dx: *dx,
                    dy: *dy,
                    wheel: None,
                };
                self.pointer_event(*frame, DomEventKind::MouseMove, sample, *untrusted)?;
            }
            Step::MouseUp {
                frame,
                button,
                untrusted,
            } => {
                let (x, y) = self.pointers.get(frame).copied().unwrap_or_default();
                self.pointer_event(*frame, DomEventKind::MouseUp, MouseSample::at(*button, x, y), *untrusted)?;
            }
            Step::Wheel {
                frame,
                x,
                y,
                untrusted,
            } => {
                let (px, py) = self.pointers.get(frame).copied().unwrap_or_default();
                let sample = MouseSample {
                    wheel: Some(WheelDelta {
                        x: *x,
                        y: *y,
                        ..WheelDelta::default()
                    }),
                    ..MouseSample::at(self.settings.gesture_button, px, py)
                };
                let prevented = self.pointer_event(*frame, DomEventKind::Wheel, sample, *untrusted)?;
                if prevented {
                    self.note(format!("frame {frame}: wheel scroll prevented"));
                }
            }
            Step::ContextMenu { frame, untrusted } => {
                let (x, y) = self.pointers.get(frame).copied().unwrap_or_default();
                let prevented = self.pointer_event(
                    *frame,
                    DomEventKind::ContextMenu,
                    MouseSample::at(self.settings.gesture_button, x, y),
                    *untrusted,
                )?;
                let shown = if prevented { "suppressed" } else { "shown" };
                self.note(format!("frame {frame}: context menu {shown}"));
            }
            Step::Tick { count } => {
                for _ in 0..*count {
                    self.tick();
                }
            }
            Step::Settle => self.settle()?,
            Step::Unload { frame } => self.unload_frame(*frame)?,
            Step::Activate { tab } => self.activate(*tab)?,
            Step::Navigate { tab, url } => self.navigate(*tab, url)?,
            Step::Settings(patch) => self.apply_settings(patch),
            Step::Profile { path } => {
                let profile = Profile::load(&self.base_dir.join(path))?;
                self.set_profile(profile);
            }
        }
        Ok(())
    }

    pub fn replay(&mut self, script: &ReplayScript) -> Result<()> {
        self.load_script(script)?;
        for step in &script.steps {
            self.run_step(step)?;
        }
        self.settle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mapping;
    use crate::gestures::GestureStyle;

    fn profile() -> Profile {
        let mut p = Profile::default();
        p.meta.name = Some("test".into());
        p.meta.allow_scripts = true;
        p.settings = Settings {
            gesture_button: 2,
            gesture_timeout_ms: 400,
            gesture_fidelity: 10.0,
            gesture_style: GestureStyle::Cardinal,
            wheel_gestures: true,
            chord_gestures: true,
            draw_trail: true,
        };
        let maps: [(&str, &str, Option<&str>, Option<&str>); 7] = [
            ("mouse", "DR", Some("closeTab"), None),
            ("mouse", "R", Some("scrollBottom"), None),
            ("mouse", "L", None, Some("broken")),
            ("mouse", "U", None, Some("report")),
            ("wheel", "down", Some("nextTab"), None),
            ("wheel", "up", Some("previousTab"), None),
            ("chord", "2-0", Some("historyBack"), None),
        ];
        for (table, g, c, s) in maps {
            let m = Mapping {
                gesture: g.into(),
                command: c.map(str::to_string),
                script: s.map(str::to_string),
            };
            match table {
                "mouse" => p.mouse.insert(g.into(), m),
                "wheel" => p.wheel.insert(g.into(), m),
                _ => p.chord.insert(g.into(), m),
            };
        }
        p.scripts
            .insert("broken".into(), "status starting\nfail \"it broke\"".into());
        p.scripts.insert(
            "report".into(),
            "background profileName\nstatus \"profile $result\"".into(),
        );
        p
    }

    /// Tab 1: top window 1 with child 2 at (100, 50) and grandchild 3 at
    /// (10, 20) inside it.
    fn browser() -> Browser {
        let mut b = Browser::new(profile()).unwrap();
        let spec: TabSpec = serde_json::from_value(serde_json::json!({
            "url": "https://example.org/",
            "frame": {
                "id": 1,
                "frames": [{
                    "id": 2,
                    "rect": { "x": 100.0, "y": 50.0 },
                    "frames": [{ "id": 3, "rect": { "x": 10.0, "y": 20.0 } }]
                }]
            }
        }))
        .unwrap();
        b.load_tab(&spec).unwrap();
        b
    }

    fn run(b: &mut Browser, steps: serde_json::Value) {
        let steps: Vec<Step> = serde_json::from_value(steps).unwrap();
        for s in &steps {
            b.run_step(s).unwrap();
        }
    }

    #[test]
    fn frames_register_with_their_parents() {
        let b = browser();
        let tab = b.tab(1).unwrap();
        assert_eq!(tab.agent(1).unwrap().registry().offset_for(2), Some((100.0, 50.0)));
        assert_eq!(tab.agent(2).unwrap().registry().offset_for(3), Some((10.0, 20.0)));
        assert!(tab.agent(3).unwrap().registry().is_empty());
    }

    #[test]
    fn gesture_in_top_frame_resolves_and_runs() {
        let mut b = browser();
        b.open_tab("https://other.example/", false);
        run(
            &mut b,
            serde_json::json!([
                { "type": "mousedown", "frame": 1, "x": 0.0, "y": 0.0 },
                { "type": "mousemove", "frame": 1, "dx": 0.0, "dy": 15.0 },
                { "type": "mousemove", "frame": 1, "dx": 0.0, "dy": 15.0 },
                { "type": "mousemove", "frame": 1, "dx": 12.0, "dy": 0.0 },
                { "type": "mousemove", "frame": 1, "dx": 12.0, "dy": 0.0 },
                { "type": "mouseup", "frame": 1 },
                { "type": "settle" }
            ]),
        );
        assert_eq!(b.tab_ids(), vec![2]);
        assert_eq!(b.status(), Some("Close Tab"));
        assert!(b.log().iter().any(|l| l == "closed tab 1"));
    }

    #[test]
    fn unknown_gesture_only_reports_status() {
        let mut b = browser();
        run(
            &mut b,
            serde_json::json!([
                { "type": "mousedown", "frame": 1 },
                { "type": "mousemove", "frame": 1, "dx": 0.0, "dy": 12.0 },
                { "type": "mousemove", "frame": 1, "dx": 0.0, "dy": 12.0 },
                { "type": "mouseup", "frame": 1 },
                { "type": "settle" }
            ]),
        );
        assert_eq!(b.status(), Some("Unknown Gesture: D"));
        assert_eq!(b.tab_ids(), vec![1]);
    }

    #[test]
    fn nested_input_is_rebased_into_top_coordinates() {
        let mut b = browser();
        run(
            &mut b,
            serde_json::json!([
                { "type": "mousedown", "frame": 3, "x": 5.0, "y": 5.0 },
            ]),
        );
        assert_eq!(b.top_state(1), Some(GestureState::MouseDown));
        // trail starts at the mouse-down point in top coordinates
        assert_eq!(b.trail(1), vec![(115.0, 75.0)]);
    }

    #[test]
    fn state_is_replicated_down_the_tree() {
        let mut b = browser();
        run(&mut b, serde_json::json!([{ "type": "mousedown", "frame": 3 }]));
        for w in [1, 2, 3] {
            let r = b.replica(w).unwrap();
            assert_eq!(r.state, GestureState::MouseDown);
            assert!(!r.context_menu);
        }
        run(&mut b, serde_json::json!([{ "type": "mouseup", "frame": 2 }]));
        for w in [1, 2, 3] {
            let r = b.replica(w).unwrap();
            assert_eq!(r.state, GestureState::None);
            assert!(r.context_menu);
        }
    }

    #[test]
    fn delegated_command_runs_in_origin_frame() {
        let mut b = browser();
        run(
            &mut b,
            serde_json::json!([
                { "type": "mousedown", "frame": 2 },
                { "type": "mousemove", "frame": 2, "dx": 12.0, "dy": 0.0 },
                { "type": "mousemove", "frame": 2, "dx": 12.0, "dy": 0.0 },
                { "type": "mouseup", "frame": 2 },
                { "type": "settle" }
            ]),
        );
        assert_eq!(b.scroll_y(2), Some(10_000.0));
        assert_eq!(b.scroll_y(1), Some(0.0));
        assert!(b.log().iter().any(|l| l == "tab 1 frame 2: scrollBottom"));
    }

    #[test]
    fn context_menu_follows_the_replicated_flag() {
        let mut b = browser();
        // pure click: menu allowed afterwards
        run(
            &mut b,
            serde_json::json!([
                { "type": "mousedown", "frame": 3 },
                { "type": "mouseup", "frame": 3 },
                { "type": "contextmenu", "frame": 3 },
                // gesture with movement: menu suppressed in every frame
                { "type": "mousedown", "frame": 3 },
                { "type": "mousemove", "frame": 3, "dx": 3.0, "dy": 0.0 },
                { "type": "mouseup", "frame": 3 },
                { "type": "contextmenu", "frame": 3 },
                { "type": "contextmenu", "frame": 1 }
            ]),
        );
        let menus: Vec<&String> = b.log().iter().filter(|l| l.contains("context menu")).collect();
        assert_eq!(
            menus,
            vec![
                "frame 3: context menu shown",
                "frame 3: context menu suppressed",
                "frame 1: context menu suppressed"
            ]
        );
    }

    #[test]
    fn untrusted_events_never_reach_the_machine() {
        let mut b = browser();
        run(
            &mut b,
            serde_json::json!([{ "type": "mousedown", "frame": 2, "untrusted": true }]),
        );
        assert_eq!(b.top_state(1), Some(GestureState::None));
    }

    #[test]
    fn unknown_child_is_not_rebased() {
        let mut b = browser();
        // frame 3's element disappears from frame 2's document before it loads
        b.tabs[0].frames.get_mut(&2).unwrap().doc.remove_frame(3);
        b.tabs[0].frames.get_mut(&2).unwrap().agent = FrameAgent::new(
            2,
            Some(1),
            "x",
            b.settings.clone(),
            b.bg.client(1),
        );
        run(&mut b, serde_json::json!([{ "type": "mousedown", "frame": 3, "x": 5.0, "y": 5.0 }]));
        // frame 2 is still known to the top, frame 3 is not known to frame 2
        assert_eq!(b.trail(1), vec![(105.0, 55.0)]);
    }

    #[test]
    fn times_out_without_mouse_up() {
        let mut b = browser();
        run(
            &mut b,
            serde_json::json!([
                { "type": "mousedown", "frame": 1 },
                { "type": "tick", "count": 3 }
            ]),
        );
        assert_eq!(b.top_state(1), Some(GestureState::MouseDown));
        run(&mut b, serde_json::json!([{ "type": "tick" }, { "type": "settle" }]));
        assert_eq!(b.top_state(1), Some(GestureState::None));
        assert_eq!(b.replica(3).unwrap().state, GestureState::None);
        assert_eq!(b.status(), Some("Gesture timed out"));
    }

    #[test]
    fn wheel_gesture_switches_tab_and_carries_state() {
        let mut b = browser();
        let (tab2, top2) = b.open_tab("https://two.example/", false);
        run(
            &mut b,
            serde_json::json!([
                { "type": "mousedown", "frame": 1 },
                { "type": "wheel", "frame": 1, "y": 5.0 },
                // still pending: dropped
                { "type": "wheel", "frame": 1, "y": 5.0 },
                { "type": "settle" }
            ]),
        );
        assert_eq!(b.active_tab(), Some(tab2));
        assert_eq!(b.log().iter().filter(|l| l.starts_with("activated")).count(), 1);
        assert_eq!(b.top_state(tab2), Some(GestureState::Wheel));
        assert!(!b.replica(top2).unwrap().context_menu);
        assert_eq!(b.top_state(1), Some(GestureState::None));

        // the session continues in the new tab and can come back
        let step = Step::Wheel {
            frame: top2,
            x: 0.0,
            y: -5.0,
            untrusted: false,
        };
        b.run_step(&step).unwrap();
        b.settle().unwrap();
        assert_eq!(b.active_tab(), Some(1));
        assert_eq!(b.top_state(1), Some(GestureState::Wheel));
        assert_eq!(b.top_state(tab2), Some(GestureState::None));

        run(&mut b, serde_json::json!([{ "type": "mouseup", "frame": 1 }]));
        assert_eq!(b.top_state(1), Some(GestureState::None));
        assert!(!b.replica(3).unwrap().context_menu);
    }

    #[test]
    fn switching_into_privileged_tab_swallows_clone_failure() {
        let mut b = browser();
        let (tab2, _) = b.open_tab("about:config", true);
        run(
            &mut b,
            serde_json::json!([
                { "type": "mousedown", "frame": 1 },
                { "type": "wheel", "frame": 1, "y": 5.0 },
                { "type": "settle" }
            ]),
        );
        assert_eq!(b.active_tab(), Some(tab2));
        assert_eq!(b.top_state(tab2), Some(GestureState::None));
        // the tab being left is reset even though the clone failed
        assert_eq!(b.top_state(1), Some(GestureState::None));

        // back in tab 1, a plain wheel scrolls again
        run(
            &mut b,
            serde_json::json!([
                { "type": "tick", "count": 100 },
                { "type": "activate", "tab": 1 },
                { "type": "wheel", "frame": 1, "y": 5.0 },
                { "type": "settle" }
            ]),
        );
        let prevented = b.log().iter().filter(|l| l.ends_with("wheel scroll prevented")).count();
        assert_eq!(prevented, 1);
        assert_eq!(b.active_tab(), Some(1));
        assert_eq!(b.top_state(1), Some(GestureState::None));
    }

    #[test]
    fn abort_resets_only_the_addressed_tab() {
        let mut b = browser();
        let (tab2, top2) = b.open_tab("https://two.example/", false);
        run(
            &mut b,
            serde_json::json!([
                { "type": "mousedown", "frame": 3 },
                { "type": "mousedown", "frame": top2 }
            ]),
        );
        b.apply(HostOp::Abort(1));
        b.apply(HostOp::Abort(99));
        assert_eq!(b.top_state(1), Some(GestureState::None));
        assert!(b.trail(1).is_empty());
        assert_eq!(b.replica(3).unwrap().state, GestureState::None);
        assert_eq!(b.top_state(tab2), Some(GestureState::MouseDown));
    }

    #[test]
    fn tab_switch_wraps_from_the_activated_tab() {
        let mut b = browser();
        let (tab2, _) = b.open_tab("https://two.example/", false);
        run(
            &mut b,
            serde_json::json!([
                { "type": "activate", "tab": tab2 },
                { "type": "mousedown", "frame": 1 },
                { "type": "wheel", "frame": 1, "y": 5.0 },
                { "type": "settle" }
            ]),
        );
        // nextTab is relative to the tab the gesture was drawn in
        assert_eq!(b.active_tab(), Some(tab2));
        assert!(b.run_step(&Step::Activate { tab: 99 }).is_err());
    }

    #[test]
    fn chord_gesture_goes_back_in_history() {
        let mut b = browser();
        let chord = serde_json::json!([
            { "type": "mousedown", "frame": 2, "button": 2 },
            { "type": "mousedown", "frame": 2, "button": 0 },
            { "type": "mouseup", "frame": 2, "button": 0 },
            { "type": "mouseup", "frame": 2, "button": 2 },
            { "type": "settle" }
        ]);
        run(&mut b, chord.clone());
        assert!(b.log().iter().any(|l| l == "tab 1: no history to go back"));
        assert_eq!(b.status(), Some("Back"));

        run(
            &mut b,
            serde_json::json!([
                { "type": "navigate", "tab": 1, "url": "https://example.org/next" }
            ]),
        );
        assert_eq!(b.tab(1).unwrap().url(), "https://example.org/next");
        run(&mut b, chord);
        assert_eq!(b.tab(1).unwrap().url(), "https://example.org/");
        assert!(b.log().iter().any(|l| l == "tab 1: back to https://example.org/"));
    }

    #[test]
    fn tab_history_moves_both_ways() {
        let mut b = Browser::new(profile()).unwrap();
        let spec: TabSpec = serde_json::from_value(serde_json::json!({
            "url": "https://c.example/",
            "history": ["https://a.example/", "https://b.example/"],
            "frame": { "id": 1 }
        }))
        .unwrap();
        b.load_tab(&spec).unwrap();
        b.apply(HostOp::History { tab: 1, delta: -1 });
        b.apply(HostOp::History { tab: 1, delta: -1 });
        assert_eq!(b.tab(1).unwrap().url(), "https://a.example/");
        b.apply(HostOp::History { tab: 1, delta: 1 });
        assert_eq!(b.tab(1).unwrap().url(), "https://b.example/");

        // navigating drops the forward entry
        b.navigate(1, "https://d.example/").unwrap();
        b.apply(HostOp::History { tab: 1, delta: 1 });
        assert_eq!(b.tab(1).unwrap().url(), "https://d.example/");
        assert!(b.log().iter().any(|l| l == "tab 1: no history to go forward"));
        assert!(b.navigate(9, "https://x.example/").is_err());
    }

    #[test]
    fn window_ids_must_be_unique() {
        let mut b = browser();
        let reused: TabSpec = serde_json::from_value(serde_json::json!({
            "url": "https://two.example/",
            "frame": { "id": 3 }
        }))
        .unwrap();
        assert!(b.load_tab(&reused).is_err());

        let twice: TabSpec = serde_json::from_value(serde_json::json!({
            "url": "https://three.example/",
            "frame": { "id": 10, "frames": [{ "id": 11 }, { "id": 11 }] }
        }))
        .unwrap();
        assert!(b.load_tab(&twice).is_err());
        assert_eq!(b.tab_ids(), vec![1]);
        assert!(b.add_frame(1, Some(2), 1, "x", Rect::default()).is_err());
    }

    #[test]
    fn script_faults_become_status_messages() {
        let mut b = browser();
        run(
            &mut b,
            serde_json::json!([
                { "type": "mousedown", "frame": 1 },
                { "type": "mousemove", "frame": 1, "dx": -12.0, "dy": 0.0 },
                { "type": "mousemove", "frame": 1, "dx": -12.0, "dy": 0.0 },
                { "type": "mouseup", "frame": 1 },
                { "type": "settle" }
            ]),
        );
        assert!(b.log().iter().any(|l| l == "status: starting"));
        assert_eq!(b.status(), Some("Script 'broken' failed: it broke"));
        assert_eq!(b.top_state(1), Some(GestureState::None));
    }

    #[test]
    fn script_reaches_background_through_escape_hatch() {
        let mut b = browser();
        run(
            &mut b,
            serde_json::json!([
                { "type": "mousedown", "frame": 1 },
                { "type": "mousemove", "frame": 1, "dx": 0.0, "dy": -12.0 },
                { "type": "mousemove", "frame": 1, "dx": 0.0, "dy": -12.0 },
                { "type": "mouseup", "frame": 1 },
                { "type": "settle" }
            ]),
        );
        assert_eq!(b.status(), Some("profile test"));
    }

    #[test]
    fn unloaded_frame_leaves_the_registry() {
        let mut b = browser();
        run(&mut b, serde_json::json!([{ "type": "unload", "frame": 2 }]));
        let tab = b.tab(1).unwrap();
        assert!(!tab.contains(2));
        assert!(!tab.contains(3));
        assert!(tab.agent(1).unwrap().registry().is_empty());
    }

    #[test]
    fn profile_step_swaps_mappings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("alt.toml"),
            "[meta]\nname = \"alt\"\n[settings]\ngesture_timeout_ms = 0\n[mouse]\nD = \"reload\"\n",
        )
        .unwrap();
        let mut b = browser();
        b.set_base_dir(dir.path());
        run(
            &mut b,
            serde_json::json!([
                { "type": "profile", "path": "alt.toml" },
                { "type": "mousedown", "frame": 1 },
                { "type": "tick", "count": 50 },
                { "type": "mousemove", "frame": 1, "dx": 0.0, "dy": 12.0 },
                { "type": "mousemove", "frame": 1, "dx": 0.0, "dy": 12.0 },
                { "type": "mouseup", "frame": 1 },
                { "type": "settle" }
            ]),
        );
        assert!(b.log().iter().any(|l| l == "profile: alt"));
        assert!(b.log().iter().any(|l| l == "tab 1: reload"));
        assert_eq!(b.status(), Some("Reload"));
    }

    #[test]
    fn bundled_demo_closes_the_tab() {
        let script: ReplayScript =
            serde_json::from_str(include_str!("../../demos/close_tab.json")).unwrap();
        let mut b = Browser::new(Profile::default_profile().unwrap()).unwrap();
        b.replay(&script).unwrap();
        assert_eq!(b.tab_ids(), vec![2]);
        assert!(b.log().iter().any(|l| l == "frame 2: context menu suppressed"));
    }

    #[test]
    fn settings_steps_reach_every_frame() {
        let mut b = browser();
        run(
            &mut b,
            serde_json::json!([
                { "type": "settings", "wheel_gestures": false },
                { "type": "mousedown", "frame": 1 },
                { "type": "wheel", "frame": 1, "y": 5.0 },
                { "type": "settle" }
            ]),
        );
        assert_eq!(b.top_state(1), Some(GestureState::MouseDown));
        assert_eq!(b.tab_ids().len(), 1);
    }
}
