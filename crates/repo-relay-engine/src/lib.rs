//! Command relay core for the repo-relay GitHub bot.
//!
//! Parses slash-style commands out of issue and comment bodies, authorizes
//! the sender, mirrors commands into target repositories with loop and
//! duplicate protection, and keeps the origin-to-target thread links.

pub mod authorization;
pub mod cleanup_job;
pub mod command_parser;
pub mod command_validation;
pub mod config;
pub mod dispatcher;
pub mod error_reporter;
pub mod event_log;
pub mod relay_command;
pub mod relay_engine;
pub mod reply_relay;
pub mod spam_prevention;
pub mod thread_links;

#[cfg(test)]
mod test_support;

pub use authorization::{AuthorizationReason, AuthorizationResult, CommandAuthorizer};
pub use cleanup_job::{run_cleanup, CleanupJob, CleanupJobConfig, CleanupJobHandle, CleanupReport};
pub use command_parser::{parse_command, parse_command_from_payload, CommandSyntax};
pub use command_validation::{validate_command, CommandValidationError};
pub use config::{RelayEngineConfig, RouteMatch, RouteRule};
pub use dispatcher::{DispatchOutcome, RelayDispatcher};
pub use error_reporter::ErrorReporter;
pub use event_log::{
    EventLogFilter, JsonlEventLog, NotificationSink, RelayEvent, RelayEventKind, RelayEventLog,
};
pub use relay_command::{RelayCommand, RelayCommandKind};
pub use relay_engine::{
    RelayContext, RelayEngine, RelayFailure, RelayPreconditionError, RelayResult,
};
pub use reply_relay::{ReplyRelay, ReplyRelayOutcome};
pub use spam_prevention::{
    generate_relay_signature, is_bot_sender, is_relayed_message, RelayHistoryEntry,
    RelayHistoryGuard,
};
pub use thread_links::{
    JsonFileThreadLinkPersistence, ThreadLinkData, ThreadLinkEntry, ThreadLinkMetadata,
    ThreadLinkPersistence, ThreadLinkStore,
};
