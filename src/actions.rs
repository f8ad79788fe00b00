//! Built-in commands and the host operations they turn into.

use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::Sender;

use anyhow::{Result, anyhow};
use log::{debug, warn};

use crate::frames::WindowId;
use crate::state::{GestureContext, PresentationState, TargetElementInfo};

pub type TabId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    CloseTab,
    NewTab,
    NextTab,
    PreviousTab,
    HistoryBack,
    HistoryForward,
    Reload,
    Stop,
    ScrollTop,
    ScrollBottom,
    PageUp,
    PageDown,
    OpenLinkInNewTab,
}

impl CommandId {
    pub const ALL: [CommandId; 13] = [
        CommandId::CloseTab,
        CommandId::NewTab,
        CommandId::NextTab,
        CommandId::PreviousTab,
        CommandId::HistoryBack,
        CommandId::HistoryForward,
        CommandId::Reload,
        CommandId::Stop,
        CommandId::ScrollTop,
        CommandId::ScrollBottom,
        CommandId::PageUp,
        CommandId::PageDown,
        CommandId::OpenLinkInNewTab,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandId::CloseTab => "closeTab",
            CommandId::NewTab => "newTab",
            CommandId::NextTab => "nextTab",
            CommandId::PreviousTab => "previousTab",
            CommandId::HistoryBack => "historyBack",
            CommandId::HistoryForward => "historyForward",
            CommandId::Reload => "reload",
            CommandId::Stop => "stop",
            CommandId::ScrollTop => "scrollTop",
            CommandId::ScrollBottom => "scrollBottom",
            CommandId::PageUp => "pageUp",
            CommandId::PageDown => "pageDown",
            CommandId::OpenLinkInNewTab => "openLinkInNewTab",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CommandId::CloseTab => "Close Tab",
            CommandId::NewTab => "New Tab",
            CommandId::NextTab => "Next Tab",
            CommandId::PreviousTab => "Previous Tab",
            CommandId::HistoryBack => "Back",
            CommandId::HistoryForward => "Forward",
            CommandId::Reload => "Reload",
            CommandId::Stop => "Stop",
            CommandId::ScrollTop => "Scroll to Top",
            CommandId::ScrollBottom => "Scroll to Bottom",
            CommandId::PageUp => "Page Up",
            CommandId::PageDown => "Page Down",
            CommandId::OpenLinkInNewTab => "Open Link in New Tab",
        }
    }

    /// Whether a wheel/chord session keeps going after this command.
    pub fn repeats(self) -> bool {
        matches!(
            self,
            CommandId::NextTab
                | CommandId::PreviousTab
                | CommandId::PageUp
                | CommandId::PageDown
                | CommandId::HistoryBack
                | CommandId::HistoryForward
        )
    }

    /// Commands that run inside the originating frame.
    pub fn needs_dom(self) -> bool {
        matches!(
            self,
            CommandId::Stop
                | CommandId::ScrollTop
                | CommandId::ScrollBottom
                | CommandId::PageUp
                | CommandId::PageDown
        )
    }
}

impl FromStr for CommandId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandId::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| anyhow!("unknown command: {s}"))
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Things only the browser host can do. Sent by the background context.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    Status(String),
    CloseTab(TabId),
    OpenTab { url: String, active: bool },
    /// Move the active tab by `offset`, carrying presentation state along.
    SwitchTab { from: TabId, offset: i32 },
    History { tab: TabId, delta: i32 },
    Reload(TabId),
    /// Run a DOM command inside a specific frame.
    Delegate {
        tab: TabId,
        frame: WindowId,
        command: CommandId,
    },
    /// Cancel whatever gesture the tab holds.
    Abort(TabId),
}

/// Commands sent from the host into a tab's content agents.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentCommand {
    Delegate {
        frame: WindowId,
        command: CommandId,
    },
    AbortGesture,
    ApplyState(PresentationState),
    QueryState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentReply {
    Done,
    State(PresentationState),
}

/// Turns commands into host operations for the tab they were drawn in.
pub struct CommandSink {
    tx: Option<Sender<HostOp>>,
}

impl CommandSink {
    pub fn new(tx: Sender<HostOp>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn status(&mut self, text: impl Into<String>) {
        self.send(HostOp::Status(text.into()));
    }

    fn send(&mut self, op: HostOp) {
        if let Some(tx) = self.tx.as_ref() {
            if tx.send(op).is_err() {
                warn!("command sink: host went away");
                self.tx = None;
            }
        }
    }

    pub fn run(
        &mut self,
        tab: TabId,
        command: CommandId,
        context: &GestureContext,
        target: &TargetElementInfo,
    ) -> Result<()> {
        debug!("command sink: {command} in tab {tab}, frame {}", context.frame);

        if command.needs_dom() {
            self.send(HostOp::Delegate {
                tab,
                frame: context.frame,
                command,
            });
            return Ok(());
        }

        let op = match command {
            CommandId::CloseTab => HostOp::CloseTab(tab),
            CommandId::NewTab => HostOp::OpenTab {
                url: "about:newtab".to_string(),
                active: true,
            },
            CommandId::NextTab => HostOp::SwitchTab {
                from: tab,
                offset: 1,
            },
            CommandId::PreviousTab => HostOp::SwitchTab {
                from: tab,
                offset: -1,
            },
            CommandId::HistoryBack => HostOp::History { tab, delta: -1 },
            CommandId::HistoryForward => HostOp::History { tab, delta: 1 },
            CommandId::Reload => HostOp::Reload(tab),
            CommandId::OpenLinkInNewTab => {
                let url = target
                    .link_href
                    .clone()
                    .ok_or_else(|| anyhow!("no link under the gesture start"))?;
                HostOp::OpenTab { url, active: false }
            }
            other => return Err(anyhow!("command {other} has no host operation")),
        };
        let leaves_tab = matches!(op, HostOp::SwitchTab { .. });
        self.send(op);
        // the host has cloned the state by the time this arrives
        if leaves_tab {
            self.send(HostOp::Abort(tab));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn ctx() -> GestureContext {
        GestureContext {
            frame: 7,
            frame_url: "https://example.org/inner".into(),
            is_nested: true,
        }
    }

    #[test]
    fn command_ids_round_trip_names() {
        for c in CommandId::ALL {
            assert_eq!(c.as_str().parse::<CommandId>().unwrap(), c);
        }
        assert!("closetab".parse::<CommandId>().is_err());
    }

    #[test]
    fn dom_commands_are_delegated_to_origin_frame() {
        let (tx, rx) = mpsc::channel();
        let mut sink = CommandSink::new(tx);
        sink.run(3, CommandId::ScrollTop, &ctx(), &TargetElementInfo::default())
            .unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            HostOp::Delegate {
                tab: 3,
                frame: 7,
                command: CommandId::ScrollTop
            }
        );
    }

    #[test]
    fn open_link_needs_a_link() {
        let (tx, rx) = mpsc::channel();
        let mut sink = CommandSink::new(tx);
        assert!(
            sink.run(1, CommandId::OpenLinkInNewTab, &ctx(), &TargetElementInfo::default())
                .is_err()
        );
        let target = TargetElementInfo {
            tag_name: "A".into(),
            link_href: Some("https://example.org/x".into()),
            media: None,
        };
        sink.run(1, CommandId::OpenLinkInNewTab, &ctx(), &target).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            HostOp::OpenTab {
                url: "https://example.org/x".into(),
                active: false
            }
        );
    }

    #[test]
    fn tab_switch_aborts_the_tab_being_left() {
        let (tx, rx) = mpsc::channel();
        let mut sink = CommandSink::new(tx);
        sink.run(4, CommandId::PreviousTab, &ctx(), &TargetElementInfo::default())
            .unwrap();
        let ops: Vec<HostOp> = rx.try_iter().collect();
        assert_eq!(
            ops,
            vec![
                HostOp::SwitchTab {
                    from: 4,
                    offset: -1
                },
                HostOp::Abort(4)
            ]
        );

        sink.run(4, CommandId::Reload, &ctx(), &TargetElementInfo::default())
            .unwrap();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![HostOp::Reload(4)]);
    }

    #[test]
    fn sink_survives_host_going_away() {
        let (tx, rx) = mpsc::channel();
        let mut sink = CommandSink::new(tx);
        drop(rx);
        sink.run(1, CommandId::CloseTab, &ctx(), &TargetElementInfo::default())
            .unwrap();
        sink.status("still here");
        assert!(sink.tx.is_none());
    }
}
