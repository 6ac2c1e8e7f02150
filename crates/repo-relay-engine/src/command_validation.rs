use thiserror::Error;

use crate::relay_command::{is_recognized_command, recognized_commands, RelayCommand};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Shape problems with a parsed command, surfaced to the sender as a reply.
pub enum CommandValidationError {
    #[error("Unknown command: {command}. Valid commands: {valid}")]
    UnknownCommand { command: String, valid: String },
    #[error("Link command requires target repository")]
    MissingTarget,
    #[error("Target must be in format owner/repo")]
    InvalidTargetFormat { target: String },
    #[error("deploy_strategy requires strategy parameter")]
    MissingStrategy,
}

impl CommandValidationError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::UnknownCommand { .. } => "unknown_command",
            Self::MissingTarget => "missing_target",
            Self::InvalidTargetFormat { .. } => "invalid_target_format",
            Self::MissingStrategy => "missing_strategy",
        }
    }
}

/// Checks a parsed command against the recognized set and per-type requirements.
pub fn validate_command(command: &RelayCommand) -> Result<(), CommandValidationError> {
    if !is_recognized_command(&command.command_type) {
        return Err(CommandValidationError::UnknownCommand {
            command: command.command_type.clone(),
            valid: recognized_commands().join(", "),
        });
    }

    match command.command_type.as_str() {
        "link" => {
            let target = command
                .target
                .as_deref()
                .ok_or(CommandValidationError::MissingTarget)?;
            if !target.contains('/') {
                return Err(CommandValidationError::InvalidTargetFormat {
                    target: target.to_string(),
                });
            }
        }
        "deploy_strategy" => {
            if command.param("strategy").is_none() {
                return Err(CommandValidationError::MissingStrategy);
            }
        }
        _ => {}
    }
    Ok(())
}
