use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use repo_relay_core::current_unix_timestamp_ms;
use repo_relay_github::GithubWebhookPayload;

use crate::relay_command::{is_target_exempt, RelayCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The textual form a command was recognized in, listed in matching priority.
pub enum CommandSyntax {
    /// `command: <type>` followed by `key: value` lines.
    HeaderBlock,
    /// `!type <rest>` or `/type <rest>`.
    Prefixed,
    /// `!type` or `/type` ending the body.
    PrefixedBare,
    /// `command <type> target <repo>`.
    Legacy,
}

impl CommandSyntax {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeaderBlock => "header_block",
            Self::Prefixed => "prefixed",
            Self::PrefixedBare => "prefixed_bare",
            Self::Legacy => "legacy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CommandCandidate {
    command_type: String,
    target: Option<String>,
    params: BTreeMap<String, String>,
}

impl CommandCandidate {
    fn is_acceptable(&self) -> bool {
        !self.command_type.is_empty()
            && (self.target.is_some() || is_target_exempt(&self.command_type))
    }
}

type CommandMatcher = fn(&str) -> Option<CommandCandidate>;

const COMMAND_MATCHERS: [(CommandSyntax, CommandMatcher); 4] = [
    (CommandSyntax::HeaderBlock, match_header_block),
    (CommandSyntax::Prefixed, match_prefixed),
    (CommandSyntax::PrefixedBare, match_prefixed_bare),
    (CommandSyntax::Legacy, match_legacy),
];

/// Parses the command carried by a webhook payload, if any.
pub fn parse_command_from_payload(payload: &GithubWebhookPayload) -> Option<RelayCommand> {
    let body = payload.message_body()?;
    let sender = payload.resolved_sender()?;
    parse_command(body, sender)
}

/// Extracts a command from free text. Malformed input is a non-match, never an error.
pub fn parse_command(body: &str, sender: &str) -> Option<RelayCommand> {
    parse_command_with_syntax(body, sender).map(|(_, command)| command)
}

/// Walks the matchers in priority order and returns the first acceptable command.
pub fn parse_command_with_syntax(
    body: &str,
    sender: &str,
) -> Option<(CommandSyntax, RelayCommand)> {
    let sender = sender.trim();
    if body.is_empty() || sender.is_empty() {
        return None;
    }

    for (syntax, matcher) in COMMAND_MATCHERS {
        let Some(candidate) = matcher(body) else {
            continue;
        };
        if !candidate.is_acceptable() {
            continue;
        }
        tracing::debug!(
            syntax = syntax.as_str(),
            command = %candidate.command_type,
            sender,
            "parsed relay command"
        );
        return Some((
            syntax,
            RelayCommand {
                command_type: candidate.command_type,
                sender: sender.to_string(),
                timestamp_unix_ms: current_unix_timestamp_ms(),
                target: candidate.target,
                params: candidate.params,
            },
        ));
    }
    None
}

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn header_block_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, r"(?i)command:\s*([A-Za-z0-9_]+)[\r\n]+((?s:.*))")
}

fn param_line_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, r"([A-Za-z0-9_]+):\s*(.+)")
}

fn prefixed_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, r"(?i)[!/]([A-Za-z0-9_]+)\s+(.*)")
}

fn prefixed_bare_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, r"(?i)[!/]([A-Za-z0-9_]+)$")
}

fn legacy_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, r"(?i)command\s+([A-Za-z0-9_]+)\s+target\s+(\S+)")
}

fn match_header_block(body: &str) -> Option<CommandCandidate> {
    let captures = header_block_pattern()?.captures(body)?;
    let command_type = captures.get(1)?.as_str().to_ascii_lowercase();
    let block = captures.get(2).map_or("", |group| group.as_str());
    let line_pattern = param_line_pattern()?;

    let mut params = BTreeMap::new();
    for line in block.split(['\r', '\n']) {
        let Some(line_captures) = line_pattern.captures(line) else {
            continue;
        };
        let (Some(key), Some(value)) = (line_captures.get(1), line_captures.get(2)) else {
            continue;
        };
        let value = value.as_str().trim();
        if value.is_empty() {
            continue;
        }
        params.insert(key.as_str().trim().to_string(), value.to_string());
    }
    let target = resolve_target(&params);
    Some(CommandCandidate {
        command_type,
        target,
        params,
    })
}

fn match_prefixed(body: &str) -> Option<CommandCandidate> {
    let captures = prefixed_pattern()?.captures(body)?;
    let command_type = captures.get(1)?.as_str().to_ascii_lowercase();
    let rest = captures.get(2).map_or("", |group| group.as_str()).trim();

    let (target, params) = if rest.contains(':') {
        let params = parse_inline_params(rest);
        (resolve_target(&params), params)
    } else {
        let target = rest.split_whitespace().next().map(ToOwned::to_owned);
        (target, BTreeMap::new())
    };
    Some(CommandCandidate {
        command_type,
        target,
        params,
    })
}

fn match_prefixed_bare(body: &str) -> Option<CommandCandidate> {
    let captures = prefixed_bare_pattern()?.captures(body)?;
    Some(CommandCandidate {
        command_type: captures.get(1)?.as_str().to_ascii_lowercase(),
        target: None,
        params: BTreeMap::new(),
    })
}

fn match_legacy(body: &str) -> Option<CommandCandidate> {
    let captures = legacy_pattern()?.captures(body)?;
    Some(CommandCandidate {
        command_type: captures.get(1)?.as_str().to_ascii_lowercase(),
        target: Some(captures.get(2)?.as_str().to_string()),
        params: BTreeMap::new(),
    })
}

/// Splits `key:value` pairs on whitespace; only the first colon separates key from value.
fn parse_inline_params(rest: &str) -> BTreeMap<String, String> {
    rest.split_whitespace()
        .filter_map(|pair| pair.split_once(':'))
        .filter_map(|(key, value)| {
            let key = key.trim();
            let value = value.trim();
            (!key.is_empty() && !value.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

fn resolve_target(params: &BTreeMap<String, String>) -> Option<String> {
    params
        .get("target")
        .or_else(|| params.get("repo"))
        .cloned()
}
