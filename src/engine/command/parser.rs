//! Defines the normalizer and parsers for pr-cli commands.

use std::sync::LazyLock;

use regex::Regex;

use crate::engine::command::{
    BuiltInCommand, CommandName, MultiCommand, ParsedCommand, SingleCommand, SubCommand,
};

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CommandParseError {
    #[error("comment does not contain a command")]
    NoCommand,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("multi-command comment contains no recognized commands")]
    EmptyMulti,
    #[error("invalid argument: {0}")]
    BadArgument(String),
}

/// Recognizes a single regular command line.
static REGULAR_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^/(remove-lgtm|cherry-pick|cherrypick|unassign|unlabel|rebase|retest|assign|batch|check|close|help|label|lgtm|merge|ready)(?:\s+(\S.*))?\s*$",
    )
    .expect("invalid regular command regex")
});

/// Recognizes a built-in command line (reserved `__` prefix).
static BUILTIN_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/__([a-z0-9]+(?:[-_][a-z0-9]+)*)(?:\s+(\S.*))?\s*$")
        .expect("invalid built-in command regex")
});

/// Normalizes a comment body before command matching.
///
/// Leading and trailing whitespace is stripped, and any run of trailing line
/// terminators, including their backslash-escaped spellings, is removed.
/// Interior escaped newlines and tabs are preserved verbatim.
/// The result is a fixed point: normalizing twice yields the same text.
pub fn normalize_comment(text: &str) -> String {
    let mut current = text.trim();
    loop {
        let stripped = current
            .strip_suffix("\\n")
            .or_else(|| current.strip_suffix("\\r"))
            .or_else(|| current.strip_suffix('\n'))
            .or_else(|| current.strip_suffix('\r'));
        match stripped {
            Some(rest) => current = rest.trim_end(),
            None => break,
        }
    }
    current.to_string()
}

/// Parses a comment body into a command.
///
/// A body with more than one non-blank line starting with `/` is a
/// multi-command; lines not starting with `/` are ignored.
pub fn parse_comment(text: &str) -> Result<ParsedCommand, CommandParseError> {
    let text = normalize_comment(text);
    if text.is_empty() {
        return Err(CommandParseError::NoCommand);
    }

    let command_lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('/') && line.len() > 1)
        .collect();

    match command_lines.as_slice() {
        [] => Err(CommandParseError::NoCommand),
        [line] => parse_line(line),
        lines => build_multi(lines.iter().copied()),
    }
}

/// Parses one command line, expanding `/batch` and `/check` runner forms into
/// a multi-command.
fn parse_line(line: &str) -> Result<ParsedCommand, CommandParseError> {
    match parse_sub_line(line)? {
        SubCommand::BuiltIn(builtin) => Ok(ParsedCommand::BuiltIn(builtin)),
        SubCommand::Single(command) => match command.name {
            CommandName::Batch => expand_runner(line),
            CommandName::Check if !command.args.is_empty() => expand_runner(line),
            _ => Ok(ParsedCommand::Single(command)),
        },
    }
}

/// Expands the `/batch` and `/check` runner forms into a multi-command.
fn expand_runner(line: &str) -> Result<ParsedCommand, CommandParseError> {
    let subs = split_inline_commands(line);
    if subs.is_empty() {
        return Err(CommandParseError::EmptyMulti);
    }
    build_multi(subs.iter().map(String::as_str))
}

/// Parses one line into a sub-command. Never produces a multi-command, which
/// makes nested multis impossible by construction.
pub(crate) fn parse_sub_line(line: &str) -> Result<SubCommand, CommandParseError> {
    if let Some(captures) = BUILTIN_COMMAND.captures(line) {
        let name = captures[1].to_string();
        let args = match captures.get(2) {
            Some(args) => tokenize_args(args.as_str())?,
            None => vec![],
        };
        return Ok(SubCommand::BuiltIn(BuiltInCommand { name, args }));
    }

    let Some(captures) = REGULAR_COMMAND.captures(line) else {
        let unknown = line
            .trim_start_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or_default();
        return Err(CommandParseError::UnknownCommand(unknown.to_string()));
    };

    let name = CommandName::from_name(&captures[1])
        .unwrap_or_else(|| unreachable!("regex vocabulary out of sync with CommandName"));
    let args = match captures.get(2) {
        Some(args) => tokenize_args(args.as_str())?,
        None => vec![],
    };

    // `/lgtm cancel` is an alias of `/remove-lgtm`.
    if name == CommandName::Lgtm && args.as_slice() == ["cancel"] {
        return Ok(SubCommand::Single(SingleCommand::new(
            CommandName::RemoveLgtm,
            vec![],
        )));
    }

    Ok(SubCommand::Single(SingleCommand::new(name, args)))
}

/// Builds a multi-command from individual command lines. Runner commands
/// (`/batch`, `/check` with arguments) cannot nest and are dropped with a
/// warning; unrecognized lines are kept in `raw_lines` so the executor can
/// report them.
fn build_multi<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> Result<ParsedCommand, CommandParseError> {
    let mut commands = vec![];
    let mut raw_lines = vec![];

    for line in lines {
        match parse_sub_line(line) {
            Ok(SubCommand::Single(command))
                if command.name == CommandName::Batch
                    || (command.name == CommandName::Check && !command.args.is_empty()) =>
            {
                tracing::warn!("Dropping nested multi-command line `{line}`");
            }
            Ok(sub) => {
                commands.push(sub);
                raw_lines.push(line.to_string());
            }
            Err(CommandParseError::UnknownCommand(_)) => {
                raw_lines.push(line.to_string());
            }
            Err(error) => return Err(error),
        }
    }

    if commands.is_empty() {
        return Err(CommandParseError::EmptyMulti);
    }
    Ok(ParsedCommand::Multi(MultiCommand {
        commands,
        raw_lines,
    }))
}

/// Splits the runner form `/batch /cmd … /cmd …` into its command segments.
/// Tokens before the first embedded command (including the runner itself) are
/// discarded.
fn split_inline_commands(line: &str) -> Vec<String> {
    let mut segments: Vec<String> = vec![];
    // Skip the runner token itself.
    for token in line.split_whitespace().skip(1) {
        if token.starts_with('/') {
            segments.push(token.to_string());
        } else if let Some(current) = segments.last_mut() {
            current.push(' ');
            current.push_str(token);
        }
    }
    segments
}

/// Splits an argument string into tokens. Supports shell-style single and
/// double quotes, including the `--flag="value with spaces"` form. `@user`
/// tokens pass through untouched.
fn tokenize_args(input: &str) -> Result<Vec<String>, CommandParseError> {
    let mut tokens = vec![];
    let mut current = String::new();
    let mut pending = false;
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    pending = true;
                }
                c if c.is_whitespace() => {
                    if pending {
                        tokens.push(std::mem::take(&mut current));
                        pending = false;
                    }
                }
                _ => {
                    current.push(c);
                    pending = true;
                }
            },
        }
    }
    if quote.is_some() {
        return Err(CommandParseError::BadArgument(format!(
            "unterminated quote in `{input}`"
        )));
    }
    if pending {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::command::{CommandName, ParsedCommand, SubCommand};

    #[test]
    fn normalize_plain() {
        assert_eq!(normalize_comment("  /lgtm  "), "/lgtm");
    }

    #[test]
    fn normalize_trailing_terminators() {
        assert_eq!(normalize_comment("/lgtm\r\n\r\n"), "/lgtm");
        assert_eq!(normalize_comment("/lgtm\\n\\n"), "/lgtm");
        assert_eq!(normalize_comment("/lgtm \\r\\n"), "/lgtm");
    }

    #[test]
    fn normalize_preserves_interior_escapes_and_tabs() {
        assert_eq!(
            normalize_comment("/label a\\nb\tc\\n"),
            "/label a\\nb\tc"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        for body in [
            "  /lgtm \\n\\r\n",
            "hello\n/merge squash\r\n",
            "\t/assign @user\\n",
            "",
            "\\n\\n",
        ] {
            let once = normalize_comment(body);
            assert_eq!(normalize_comment(&once), once);
        }
    }

    #[test]
    fn no_command() {
        assert_eq!(
            parse_comment("Hi, this PR looks nice!"),
            Err(CommandParseError::NoCommand)
        );
    }

    #[test]
    fn bare_slash_is_no_command() {
        assert_eq!(parse_comment("/"), Err(CommandParseError::NoCommand));
    }

    #[test]
    fn unknown_command() {
        assert_eq!(
            parse_comment("/frobnicate now"),
            Err(CommandParseError::UnknownCommand("frobnicate".to_string()))
        );
    }

    #[test]
    fn parse_lgtm() {
        assert_eq!(
            parse_comment("/lgtm"),
            Ok(ParsedCommand::Single(SingleCommand::new(
                CommandName::Lgtm,
                vec![]
            )))
        );
    }

    #[test]
    fn parse_lgtm_cancel_alias() {
        assert_eq!(
            parse_comment("/lgtm cancel"),
            Ok(ParsedCommand::Single(SingleCommand::new(
                CommandName::RemoveLgtm,
                vec![]
            )))
        );
    }

    #[test]
    fn parse_cherrypick_synonym() {
        let command = parse_comment("/cherrypick release-1.2").unwrap();
        let ParsedCommand::Single(single) = command else {
            panic!("expected a single command");
        };
        assert_eq!(single.name, CommandName::CherryPick);
        assert_eq!(single.args, vec!["release-1.2"]);
        assert_eq!(single.to_string(), "/cherry-pick release-1.2");
    }

    #[test]
    fn parse_assign_users() {
        let command = parse_comment("/assign @carol @dave").unwrap();
        let ParsedCommand::Single(single) = command else {
            panic!("expected a single command");
        };
        assert_eq!(single.args, vec!["@carol", "@dave"]);
    }

    #[test]
    fn parse_quoted_args() {
        let command = parse_comment(r#"/label "needs review" bug"#).unwrap();
        let ParsedCommand::Single(single) = command else {
            panic!("expected a single command");
        };
        assert_eq!(single.args, vec!["needs review", "bug"]);
    }

    #[test]
    fn parse_flag_with_quoted_value() {
        let command = parse_comment(r#"/merge --message="fix the widget""#).unwrap();
        let ParsedCommand::Single(single) = command else {
            panic!("expected a single command");
        };
        assert_eq!(single.args, vec!["--message=fix the widget"]);
    }

    #[test]
    fn parse_unterminated_quote() {
        assert!(matches!(
            parse_comment(r#"/label "oops"#),
            Err(CommandParseError::BadArgument(_))
        ));
    }

    #[test]
    fn parse_command_among_prose() {
        let command = parse_comment("some context\n/rebase\nthanks!").unwrap();
        assert!(matches!(
            command,
            ParsedCommand::Single(SingleCommand {
                name: CommandName::Rebase,
                ..
            })
        ));
    }

    #[test]
    fn parse_builtin() {
        let command = parse_comment("/__post-merge-cherry-pick").unwrap();
        let ParsedCommand::BuiltIn(builtin) = command else {
            panic!("expected a built-in command");
        };
        assert_eq!(builtin.name, "post-merge-cherry-pick");
        assert!(builtin.args.is_empty());
    }

    #[test]
    fn parse_multi() {
        let command = parse_comment("/assign @carol\n/merge squash\n/unknown").unwrap();
        let ParsedCommand::Multi(multi) = command else {
            panic!("expected a multi-command");
        };
        assert_eq!(multi.commands.len(), 2);
        assert_eq!(
            multi.raw_lines,
            vec!["/assign @carol", "/merge squash", "/unknown"]
        );
        insta::assert_debug_snapshot!(multi.commands, @r#"
        [
            Single(
                SingleCommand {
                    name: Assign,
                    args: [
                        "@carol",
                    ],
                },
            ),
            Single(
                SingleCommand {
                    name: Merge,
                    args: [
                        "squash",
                    ],
                },
            ),
        ]
        "#);
    }

    #[test]
    fn parse_multi_ignores_prose_lines() {
        let command = parse_comment("please\n/assign @carol\nand then\n/rebase").unwrap();
        let ParsedCommand::Multi(multi) = command else {
            panic!("expected a multi-command");
        };
        assert_eq!(multi.commands.len(), 2);
    }

    #[test]
    fn parse_multi_drops_nested_batch() {
        let command = parse_comment("/assign @carol\n/batch /lgtm\n/rebase").unwrap();
        let ParsedCommand::Multi(multi) = command else {
            panic!("expected a multi-command");
        };
        assert_eq!(multi.commands.len(), 2);
        assert_eq!(multi.raw_lines, vec!["/assign @carol", "/rebase"]);
    }

    #[test]
    fn parse_multi_all_unknown_is_empty() {
        assert_eq!(
            parse_comment("/foo\n/bar"),
            Err(CommandParseError::EmptyMulti)
        );
    }

    #[test]
    fn parse_batch_inline() {
        let command = parse_comment("/batch /assign @carol /merge squash").unwrap();
        let ParsedCommand::Multi(multi) = command else {
            panic!("expected a multi-command");
        };
        assert_eq!(multi.commands.len(), 2);
        assert_eq!(multi.raw_lines, vec!["/assign @carol", "/merge squash"]);
    }

    #[test]
    fn parse_batch_without_commands() {
        assert_eq!(parse_comment("/batch"), Err(CommandParseError::EmptyMulti));
    }

    #[test]
    fn parse_check_bare_is_status() {
        assert_eq!(
            parse_comment("/check"),
            Ok(ParsedCommand::Single(SingleCommand::new(
                CommandName::Check,
                vec![]
            )))
        );
    }

    #[test]
    fn parse_check_with_commands_is_batch() {
        let command = parse_comment("/check /label bug /rebase").unwrap();
        let ParsedCommand::Multi(multi) = command else {
            panic!("expected a multi-command");
        };
        assert_eq!(multi.commands.len(), 2);
    }

    #[test]
    fn multi_never_nests() {
        let command = parse_comment("/batch /batch /lgtm\n/assign @x\n/rebase").unwrap();
        let ParsedCommand::Multi(multi) = command else {
            panic!("expected a multi-command");
        };
        for sub in &multi.commands {
            assert!(matches!(
                sub,
                SubCommand::Single(_) | SubCommand::BuiltIn(_)
            ));
        }
    }

    #[test]
    fn canonical_format_round_trip() {
        for body in [
            "/lgtm",
            "/remove-lgtm",
            "/assign @carol",
            "/merge squash",
            "/cherry-pick release-1.2",
            "/label bug needs-triage",
            "/__post-merge-cherry-pick",
        ] {
            let formatted = match parse_comment(body).unwrap() {
                ParsedCommand::Single(single) => single.to_string(),
                ParsedCommand::BuiltIn(builtin) => builtin.to_string(),
                ParsedCommand::Multi(_) => panic!("unexpected multi-command"),
            };
            assert_eq!(formatted, body);
        }
    }
}
