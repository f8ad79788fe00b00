//! The privileged context: resolves gestures, runs commands, answers
//! `executeInBackground` calls. Runs on its own thread and shares nothing
//! with content agents except channels.

use anyhow::Result;
use log::{debug, info};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use super::dispatch::{GestureDispatcher, GestureKind};
use super::{BackgroundClient, BackgroundMsg, BackgroundReply, ContentRequest};
use crate::actions::{CommandSink, HostOp, TabId};
use crate::config::Profile;
use crate::frames::WindowId;

pub struct BackgroundHandle {
    profile: Arc<Mutex<Profile>>,
    tx: Sender<BackgroundMsg>,
    _thread: thread::JoinHandle<()>,
}

impl BackgroundHandle {
    pub fn start(profile: Profile, host_tx: Sender<HostOp>) -> Result<Self> {
        let profile_arc = Arc::new(Mutex::new(profile));
        let prof_clone = profile_arc.clone();
        let (tx, rx) = mpsc::channel::<BackgroundMsg>();
        let handle = thread::Builder::new()
            .name("background".into())
            .spawn(move || {
                let mut bg = Background::new(prof_clone, CommandSink::new(host_tx));
                bg.run(rx);
            })?;
        Ok(Self {
            profile: profile_arc,
            tx,
            _thread: handle,
        })
    }

    pub fn client(&self, tab: TabId) -> BackgroundClient {
        BackgroundClient::new(tab, self.tx.clone())
    }

    pub fn update_profile(&mut self, new_profile: Profile) {
        if let Ok(mut p) = self.profile.lock() {
            *p = new_profile;
        }
    }
}

struct Background {
    profile: Arc<Mutex<Profile>>,
    dispatcher: GestureDispatcher,
    sink: CommandSink,
    dispatched: u64,
}

impl Background {
    fn new(profile: Arc<Mutex<Profile>>, sink: CommandSink) -> Self {
        Self {
            dispatcher: GestureDispatcher::new(profile.clone()),
            profile,
            sink,
            dispatched: 0,
        }
    }

    fn run(&mut self, rx: Receiver<BackgroundMsg>) {
        while let Ok(msg) = rx.recv() {
            let reply = self.handle(msg.tab, msg.frame, msg.request);
            if let Some(tx) = msg.reply {
                // the asking frame may be gone already
                let _ = tx.send(reply);
            }
        }
        info!("background: all clients gone, stopping");
    }

    fn handle(&mut self, tab: TabId, frame: WindowId, request: ContentRequest) -> BackgroundReply {
        let (kind, req) = match request {
            ContentRequest::GestureProgress { status } => {
                self.sink.status(status);
                return BackgroundReply::Ack;
            }
            ContentRequest::Ping => return BackgroundReply::Ack,
            ContentRequest::ExecuteInBackground { function, args } => {
                debug!("background: {function}({}) for tab {tab} frame {frame}", args.join(", "));
                return BackgroundReply::Value(self.call(&function, &args));
            }
            ContentRequest::RunCommand {
                command,
                context,
                target,
            } => {
                let res = self
                    .sink
                    .run(tab, command, &context, &target)
                    .map(|_| command.label().to_string())
                    .map_err(|e| e.to_string());
                return BackgroundReply::Value(res);
            }
            ContentRequest::MouseGesture(req) => (GestureKind::Mouse, req),
            ContentRequest::WheelGesture(req) => (GestureKind::Wheel, req),
            ContentRequest::ChordGesture(req) => (GestureKind::Chord, req),
        };

        self.dispatched += 1;
        let reply = self.dispatcher.dispatch(kind, tab, &req, &mut self.sink);
        if let Some(status) = &reply.status {
            self.sink.status(status.clone());
        }
        BackgroundReply::Gesture(reply)
    }

    /// Fixed registry of functions content scripts may call.
    fn call(&self, function: &str, args: &[String]) -> Result<String, String> {
        match function {
            "echo" => Ok(args.join(" ")),
            "profileName" => {
                let p = self.profile.lock().map_err(|_| "profile lock poisoned".to_string())?;
                Ok(p.meta.name.clone().unwrap_or_else(|| "unnamed".to_string()))
            }
            "dispatchCount" => Ok(self.dispatched.to_string()),
            other => Err(format!("unknown background function '{other}'")),
        }
    }
}
