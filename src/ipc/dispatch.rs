use crate::actions::{CommandId, CommandSink, TabId};
use crate::config::{MappingTable, Profile};
use crate::ipc::{GestureReply, GestureRequest, UserScript};
use log::{info, warn};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    Mouse,
    Wheel,
    Chord,
}

impl GestureKind {
    fn table(self, p: &Profile) -> &MappingTable {
        match self {
            GestureKind::Mouse => &p.mouse,
            GestureKind::Wheel => &p.wheel,
            GestureKind::Chord => &p.chord,
        }
    }

    fn label(self) -> &'static str {
        match self {
            GestureKind::Mouse => "Gesture",
            GestureKind::Wheel => "Wheel Gesture",
            GestureKind::Chord => "Chord Gesture",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Command(CommandId),
    UserScript(UserScript),
}

pub struct GestureDispatcher {
    profile: Arc<Mutex<Profile>>,
}

impl GestureDispatcher {
    pub fn new(profile: Arc<Mutex<Profile>>) -> Self {
        Self { profile }
    }

    /// Exact lookup. A slot naming a script resolves to the script before
    /// its command is considered.
    pub fn resolve(&self, gesture: &str, kind: GestureKind) -> Option<Action> {
        let p = self.profile.lock().unwrap();
        let mapping = kind.table(&p).get(gesture)?;
        mapping
            .script
            .as_deref()
            .and_then(|id| {
                p.scripts.get(id).map(|body| {
                    Action::UserScript(UserScript {
                        id: id.to_string(),
                        body: body.clone(),
                    })
                })
            })
            .or_else(|| {
                mapping
                    .command
                    .as_deref()
                    .and_then(|c| c.parse::<CommandId>().ok())
                    .map(Action::Command)
            })
    }

    /// Commands run through the sink; scripts go back to the content side.
    pub fn execute(
        &self,
        action: Action,
        tab: TabId,
        req: &GestureRequest,
        sink: &mut CommandSink,
    ) -> GestureReply {
        match action {
            Action::Command(command) => {
                match sink.run(tab, command, &req.context, &req.target) {
                    Ok(()) => GestureReply {
                        status: Some(command.label().to_string()),
                        repeat: command.repeats(),
                        script: None,
                    },
                    Err(e) => {
                        warn!("dispatch: {command} failed: {e}");
                        GestureReply {
                            status: Some(format!("{} failed: {e}", command.label())),
                            ..GestureReply::default()
                        }
                    }
                }
            }
            Action::UserScript(script) => GestureReply {
                status: None,
                repeat: false,
                script: Some(script),
            },
        }
    }

    pub fn dispatch(
        &self,
        kind: GestureKind,
        tab: TabId,
        req: &GestureRequest,
        sink: &mut CommandSink,
    ) -> GestureReply {
        match self.resolve(&req.gesture, kind) {
            Some(action) => self.execute(action, tab, req, sink),
            None => {
                info!("dispatch: unknown {:?} gesture '{}'", kind, req.gesture);
                GestureReply {
                    status: Some(format!("Unknown {}: {}", kind.label(), req.gesture)),
                    ..GestureReply::default()
                }
            }
        }
    }
}
