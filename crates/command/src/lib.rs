//! Textual command translator: one command per line, validated into typed
//! mailbox records, dispatched immediately or deferred by init tick.

mod translator;

pub use translator::{
    handle_line, parse_command, Action, CommandError, Parsed, SubmitTarget, HELP_TEXT,
};
