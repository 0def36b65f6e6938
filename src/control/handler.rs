//! Command dispatch
//!
//! Decodes a request, does the accounting and the event-trace switch, and
//! tells the caller which action to run before the response goes out.

use tracing::debug;

use super::protocol::{
    Malformed, Request, Response, ID_DUMP, ID_RELOAD, ID_TRACE, REASON_BAD_VALUE,
    REASON_UNKNOWN_ID,
};
use crate::telemetry::{EventLog, LogSections, MessageLog};

/// Command counters common to both translators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStat {
    UpdatePolicy,
    DumpReq,
    Trace,
    Illegal,
}

/// The translator a command is addressed to.
pub trait ControlTarget {
    fn count(&self, stat: CommandStat);

    fn event_log(&self) -> &EventLog;

    fn message_log(&self) -> &MessageLog;

    /// Whether policy reload requests are served.
    fn can_reload(&self) -> bool;
}

/// Work left to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Reload,
    Dump(LogSections),
}

/// Outcome of one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub action: Option<Action>,
    /// `None` for datagrams that are not requests
    pub response: Option<Response>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CommandHandler;

impl CommandHandler {
    pub fn new() -> Self {
        Self
    }

    pub fn handle<T: ControlTarget + ?Sized>(&self, target: &T, datagram: &[u8]) -> Dispatch {
        let len = datagram.len() as u64;
        let req = match Request::decode(datagram) {
            Ok(req) => req,
            Err(bad) => {
                target.count(CommandStat::Illegal);
                let tag = match bad {
                    Malformed::Length(_) => b"udr1",
                    Malformed::Magic(_) => b"udr2",
                };
                target.event_log().record(tag, len, 0, Some(datagram));
                debug!(error = %bad, "command dropped");
                return Dispatch {
                    action: None,
                    response: None,
                };
            }
        };
        target.event_log().record(b"udr0", len, 0, Some(datagram));

        let mut action = None;
        let reason = match req.id {
            ID_DUMP => {
                target.count(CommandStat::DumpReq);
                action = Some(Action::Dump(LogSections::from_bits_retain(req.data)));
                0
            }
            ID_RELOAD if target.can_reload() => {
                target.count(CommandStat::UpdatePolicy);
                action = Some(Action::Reload);
                0
            }
            ID_TRACE => {
                target.count(CommandStat::Trace);
                if req.data > 1 {
                    REASON_BAD_VALUE
                } else {
                    let on = req.data == 1;
                    target.event_log().set_enabled(on);
                    target
                        .message_log()
                        .push(&format!("event trace is {}", if on { "on" } else { "off" }));
                    0
                }
            }
            _ => {
                target.count(CommandStat::Illegal);
                REASON_UNKNOWN_ID
            }
        };

        Dispatch {
            action,
            response: Some(Response::to(&req, reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::protocol::{RESULT_NG, RESULT_OK};
    use std::cell::RefCell;

    struct Target {
        counts: RefCell<Vec<CommandStat>>,
        events: EventLog,
        messages: MessageLog,
        reload: bool,
    }

    impl Target {
        fn new(reload: bool) -> Self {
            Self {
                counts: RefCell::new(Vec::new()),
                events: EventLog::new(),
                messages: MessageLog::new(),
                reload,
            }
        }

        fn tags(&self) -> Vec<String> {
            self.events.snapshot().iter().map(|e| e.tag_str()).collect()
        }
    }

    impl ControlTarget for Target {
        fn count(&self, stat: CommandStat) {
            self.counts.borrow_mut().push(stat);
        }
        fn event_log(&self) -> &EventLog {
            &self.events
        }
        fn message_log(&self) -> &MessageLog {
            &self.messages
        }
        fn can_reload(&self) -> bool {
            self.reload
        }
    }

    #[test]
    fn test_dump_request() {
        let target = Target::new(true);
        let d = CommandHandler::new().handle(&target, &Request::dump(0x11).encode());
        assert_eq!(
            d.action,
            Some(Action::Dump(LogSections::STAT | LogSections::POLICY))
        );
        let resp = d.response.unwrap();
        assert_eq!((resp.result, resp.reason), (RESULT_OK, 0));
        assert_eq!(*target.counts.borrow(), vec![CommandStat::DumpReq]);
        assert_eq!(target.tags(), vec!["udr0"]);
    }

    #[test]
    fn test_reload_only_where_served() {
        let handler = CommandHandler::new();
        let front = Target::new(true);
        assert_eq!(
            handler.handle(&front, &Request::reload().encode()).action,
            Some(Action::Reload)
        );

        let backend = Target::new(false);
        let d = handler.handle(&backend, &Request::reload().encode());
        assert_eq!(d.action, None);
        assert_eq!(d.response.unwrap().reason, REASON_UNKNOWN_ID);
        assert_eq!(*backend.counts.borrow(), vec![CommandStat::Illegal]);
    }

    #[test]
    fn test_trace_switch() {
        let handler = CommandHandler::new();
        let target = Target::new(false);
        target.events.set_enabled(true);

        let d = handler.handle(&target, &Request::trace(false).encode());
        assert!(d.response.unwrap().is_ok());
        assert!(!target.events.is_enabled());
        let msgs = target.messages.snapshot();
        assert_eq!(msgs.last().unwrap().text, "event trace is off");

        let d = handler.handle(&target, &Request::new(ID_TRACE, 2).encode());
        let resp = d.response.unwrap();
        assert_eq!((resp.result, resp.reason), (RESULT_NG, REASON_BAD_VALUE));
        assert!(!target.events.is_enabled());
        assert_eq!(
            *target.counts.borrow(),
            vec![CommandStat::Trace, CommandStat::Trace]
        );
    }

    #[test]
    fn test_malformed_gets_no_response() {
        let handler = CommandHandler::new();
        let target = Target::new(true);

        assert_eq!(handler.handle(&target, &[1, 2, 3]).response, None);
        let mut bad_magic = Request::dump(1).encode();
        bad_magic[3] ^= 0x55;
        assert_eq!(handler.handle(&target, &bad_magic).response, None);

        assert_eq!(
            *target.counts.borrow(),
            vec![CommandStat::Illegal, CommandStat::Illegal]
        );
        assert_eq!(target.tags(), vec!["udr1", "udr2"]);
    }

    #[test]
    fn test_unknown_id() {
        let target = Target::new(true);
        let d = CommandHandler::new().handle(&target, &Request::new(9, 0).encode());
        let resp = d.response.unwrap();
        assert_eq!(resp.id, 9);
        assert_eq!((resp.result, resp.reason), (RESULT_NG, REASON_UNKNOWN_ID));
    }
}
