//! Debugging helpers gated on the `DUPLEX_RPC_DEBUG` environment variable.

use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::connection::{Action, Message};
use crate::wire::Wire;

/// Whether `DUPLEX_RPC_DEBUG` is set to `1` or `trace`.
pub fn has_debug_env() -> bool {
    matches!(std::env::var_os("DUPLEX_RPC_DEBUG"), Some(v) if v == "1" || v == "trace")
}

/// Print an outgoing message to stderr, in the shape
/// `[timestamp] -> #target.method(args)`.
pub(crate) fn print_sent_message(message: &Message) {
    print_timestamp();
    eprintln!(" -> {}", Summary(message));
}

/// Print an incoming message to stderr, in the shape
/// `[timestamp] <- #target.method(args)`.
pub(crate) fn print_received_message(message: &Message) {
    print_timestamp();
    eprintln!(" <- {}", Summary(message));
}

struct Summary<'a>(&'a Message);

impl Display for Summary<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Message::Call { id, target, action, method, args } => {
                let verb = match action {
                    Action::Call => "call",
                    Action::Get => "get",
                    Action::Set => "set",
                };
                write!(f, "{verb}#{id} #{target}")?;
                if let Some(method) = method {
                    write!(f, ".{method}")?;
                }
                write!(f, "({})", DisplaySlice(args))
            }
            Message::Return { id, value } => write!(f, "return#{id} {}", DisplayWire(value)),
            Message::Throw { id, error } => write!(f, "throw#{id} {}: {}", error.name, error.message),
            Message::Resolve { id, value } => write!(f, "resolve#{id} {}", DisplayWire(value)),
            Message::Reject { id, error } => write!(f, "reject#{id} {}: {}", error.name, error.message),
            Message::Release { id } => write!(f, "release#{id}"),
            Message::HandlerMessage { wire_type, payload } => {
                write!(f, "handler[{wire_type}] {}", DisplayWire(payload))
            }
        }
    }
}

struct DisplaySlice<'a>(&'a [Wire]);

impl Display for DisplaySlice<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut it = self.0.iter();
        if let Some(wire) = it.next() {
            write!(f, "{}", DisplayWire(wire))?;
        }
        for wire in it {
            write!(f, ", {}", DisplayWire(wire))?;
        }
        Ok(())
    }
}

struct DisplayWire<'a>(&'a Wire);

impl Display for DisplayWire<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Wire::Null => write!(f, "null"),
            Wire::Bool(b) => write!(f, "{b}"),
            Wire::Number(n) => write!(f, "{n}"),
            Wire::String(s) => write!(f, "{s:?}"),
            Wire::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Wire::Array(items) => write!(f, "[{}]", DisplaySlice(items)),
            Wire::Map(fields) => {
                write!(f, "{{")?;
                let mut it = fields.iter();
                if let Some((k, v)) = it.next() {
                    write!(f, "{k}: {}", DisplayWire(v))?;
                }
                for (k, v) in it {
                    write!(f, ", {k}: {}", DisplayWire(v))?;
                }
                write!(f, "}}")
            }
            Wire::Tagged(tagged) => write!(f, "{tagged:?}"),
        }
    }
}

fn print_timestamp() {
    if let Ok(timestamp) = SystemTime::now().duration_since(UNIX_EPOCH) {
        let micros = timestamp.as_secs() * 1_000_000 + timestamp.subsec_micros() as u64;
        eprint!("[{:7}.{:06}][duplex-rpc]", micros / 1_000_000, micros % 1_000_000);
    }
}
