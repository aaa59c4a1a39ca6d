mod parser;

use std::fmt::{Display, Formatter};

pub(crate) use parser::parse_sub_line;
pub use parser::{normalize_comment, parse_comment, CommandParseError};

/// Name of the internal built-in executed after a merge to apply scheduled
/// cherry-picks.
pub const POST_MERGE_CHERRY_PICK: &str = "post-merge-cherry-pick";

/// The fixed vocabulary of user-visible commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandName {
    Help,
    Rebase,
    Lgtm,
    RemoveLgtm,
    CherryPick,
    Assign,
    Merge,
    Ready,
    Unassign,
    Label,
    Unlabel,
    Check,
    Retest,
    Close,
    Batch,
}

impl CommandName {
    /// Canonical spelling, without the leading slash.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::Help => "help",
            CommandName::Rebase => "rebase",
            CommandName::Lgtm => "lgtm",
            CommandName::RemoveLgtm => "remove-lgtm",
            CommandName::CherryPick => "cherry-pick",
            CommandName::Assign => "assign",
            CommandName::Merge => "merge",
            CommandName::Ready => "ready",
            CommandName::Unassign => "unassign",
            CommandName::Label => "label",
            CommandName::Unlabel => "unlabel",
            CommandName::Check => "check",
            CommandName::Retest => "retest",
            CommandName::Close => "close",
            CommandName::Batch => "batch",
        }
    }

    /// Resolves a spelled-out name, accepting the `cherrypick` synonym.
    pub fn from_name(name: &str) -> Option<CommandName> {
        let name = match name {
            "help" => CommandName::Help,
            "rebase" => CommandName::Rebase,
            "lgtm" => CommandName::Lgtm,
            "remove-lgtm" => CommandName::RemoveLgtm,
            "cherry-pick" | "cherrypick" => CommandName::CherryPick,
            "assign" => CommandName::Assign,
            "merge" => CommandName::Merge,
            "ready" => CommandName::Ready,
            "unassign" => CommandName::Unassign,
            "label" => CommandName::Label,
            "unlabel" => CommandName::Unlabel,
            "check" => CommandName::Check,
            "retest" => CommandName::Retest,
            "close" => CommandName::Close,
            "batch" => CommandName::Batch,
            _ => return None,
        };
        Some(name)
    }
}

impl Display for CommandName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.as_str())
    }
}

/// A regular command on a single line.
#[derive(Clone, Debug, PartialEq)]
pub struct SingleCommand {
    pub name: CommandName,
    pub args: Vec<String>,
}

impl SingleCommand {
    pub fn new(name: CommandName, args: Vec<String>) -> Self {
        Self { name, args }
    }
}

impl Display for SingleCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A command with the reserved `__` prefix, only invocable from internal
/// re-entry. Never validated against the comment sender.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltInCommand {
    /// Name without the `/__` prefix.
    pub name: String,
    pub args: Vec<String>,
}

impl Display for BuiltInCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "/__{}", self.name)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A command that may appear inside a multi-command body. `Multi` can never
/// nest here.
#[derive(Clone, Debug, PartialEq)]
pub enum SubCommand {
    Single(SingleCommand),
    BuiltIn(BuiltInCommand),
}

impl SubCommand {
    pub fn display_name(&self) -> String {
        match self {
            SubCommand::Single(cmd) => cmd.name.to_string(),
            SubCommand::BuiltIn(cmd) => format!("/__{}", cmd.name),
        }
    }
}

impl Display for SubCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SubCommand::Single(cmd) => Display::fmt(cmd, f),
            SubCommand::BuiltIn(cmd) => Display::fmt(cmd, f),
        }
    }
}

/// An ordered batch of sub-commands parsed from one comment.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiCommand {
    pub commands: Vec<SubCommand>,
    /// The raw command lines, in order, as they appeared in the body.
    /// Used by the sender-authenticity validator.
    pub raw_lines: Vec<String>,
}

/// A command parsed from a comment body.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedCommand {
    Single(SingleCommand),
    BuiltIn(BuiltInCommand),
    Multi(MultiCommand),
}
