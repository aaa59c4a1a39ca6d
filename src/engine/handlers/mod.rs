use anyhow::Context;
use tracing::Instrument;

use crate::engine::command::{
    parse_comment, parse_sub_line, BuiltInCommand, CommandName, CommandParseError, MultiCommand,
    ParsedCommand, SingleCommand, SubCommand, POST_MERGE_CHERRY_PICK,
};
use crate::engine::comment;
use crate::engine::context::{EngineContext, JobContext};
use crate::engine::event::{EventPayload, Job};
use crate::engine::process::JobQueue;
use crate::engine::{lgtm, validate};

mod assign;
mod cherry_pick;
mod close;
mod help;
mod labels;
mod merge;
mod rebase;
mod retest;
mod status;

/// Error returned by a command handler.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The failure has already been reported to the PR as a comment; callers
    /// must not post another one.
    #[error("{0}")]
    Commented(anyhow::Error),
    #[error("{0}")]
    Other(anyhow::Error),
}

impl From<anyhow::Error> for CommandError {
    fn from(error: anyhow::Error) -> Self {
        CommandError::Other(error)
    }
}

pub type CommandResult = Result<(), CommandError>;

/// Outcome of one sub-command of a multi-command.
#[derive(Debug)]
pub struct CommandOutcome {
    pub name: String,
    pub display: String,
    pub outcome: Result<(), String>,
}

/// Executes a single job. This is the worker-side entry point.
pub async fn handle_job(ctx: &EngineContext, queue: JobQueue, job: Job) -> anyhow::Result<()> {
    let event = job.event;
    match event.payload {
        EventPayload::Lifecycle(action) => {
            // Lifecycle events carry no commands; they are recorded for
            // correlation only.
            tracing::debug!(
                "PR {}#{} lifecycle action `{}` by {}",
                event.repository,
                event.pr_number,
                action.as_str(),
                event.sender
            );
            Ok(())
        }
        EventPayload::Comment(trigger_comment) => {
            if ctx.config.is_robot(&trigger_comment.author) && !ctx.config.debug {
                tracing::trace!(
                    "Ignoring comment by robot account {}",
                    trigger_comment.author
                );
                return Ok(());
            }

            let parsed = match parse_comment(&trigger_comment.body) {
                Ok(parsed) => parsed,
                Err(CommandParseError::NoCommand) => {
                    tracing::trace!("Comment is not a command");
                    return Ok(());
                }
                Err(error) => {
                    tracing::warn!("Cannot parse command: {error}");
                    let note = comment::parse_error_comment(&error.to_string());
                    ctx.client
                        .post_comment(event.pr_number, note.render())
                        .await
                        .context("Cannot reply to unparsable command")?;
                    return Ok(());
                }
            };
            record_command_metrics(ctx, &parsed);

            let sender = ctx
                .config
                .comment_sender
                .clone()
                .unwrap_or_else(|| trigger_comment.author.clone());
            let trigger = crate::engine::command::normalize_comment(
                ctx.config
                    .trigger_comment
                    .as_deref()
                    .unwrap_or(&trigger_comment.body),
            );

            let mut job_ctx = JobContext::new(
                event.repository.clone(),
                event.pr_number,
                ctx.client.clone(),
                ctx.config.clone(),
                ctx.results.clone(),
                queue,
                sender,
                trigger,
            );
            execute(&mut job_ctx, parsed).await
        }
    }
}

fn record_command_metrics(ctx: &EngineContext, parsed: &ParsedCommand) {
    match parsed {
        ParsedCommand::Single(command) => ctx.metrics.record_command(command.name.as_str()),
        ParsedCommand::BuiltIn(builtin) => {
            ctx.metrics.record_command(&format!("__{}", builtin.name))
        }
        ParsedCommand::Multi(multi) => {
            for sub in &multi.commands {
                match sub {
                    SubCommand::Single(command) => {
                        ctx.metrics.record_command(command.name.as_str())
                    }
                    SubCommand::BuiltIn(builtin) => {
                        ctx.metrics.record_command(&format!("__{}", builtin.name))
                    }
                }
            }
        }
    }
}

pub(crate) async fn execute(ctx: &mut JobContext, parsed: ParsedCommand) -> anyhow::Result<()> {
    match parsed {
        ParsedCommand::Single(command) => execute_single(ctx, command).await,
        ParsedCommand::BuiltIn(builtin) => execute_builtin(ctx, builtin).await,
        ParsedCommand::Multi(multi) => execute_multi(ctx, multi).await,
    }
}

async fn execute_single(ctx: &mut JobContext, command: SingleCommand) -> anyhow::Result<()> {
    if let Err(rejection) = validate::validate_single(ctx, &command).await? {
        tracing::warn!("Command {} rejected: {rejection}", command.name);
        let note = comment::validation_error_comment(&rejection);
        ctx.client
            .post_comment(ctx.pr_number, note.render())
            .await
            .context("Cannot post validation rejection")?;
        return Ok(());
    }

    match dispatch(ctx, &command).await {
        Ok(()) => Ok(()),
        Err(CommandError::Commented(error)) => {
            tracing::warn!("Command {} failed (already reported): {error:?}", command.name);
            Ok(())
        }
        Err(CommandError::Other(error)) => {
            let note = comment::command_failed_comment(&command.name.to_string());
            ctx.client
                .post_comment(ctx.pr_number, note.render())
                .await
                .with_context(|| {
                    format!("Cannot report failure of command {}: {error:?}", command.name)
                })?;
            Err(error.context(format!("Command {} failed", command.name)))
        }
    }
}

/// Built-ins skip PR-state and sender validation and never post generic error
/// comments; their failures only propagate to the worker log.
async fn execute_builtin(ctx: &mut JobContext, builtin: BuiltInCommand) -> anyhow::Result<()> {
    match builtin.name.as_str() {
        POST_MERGE_CHERRY_PICK => {
            let span = tracing::info_span!("PostMergeCherryPick");
            cherry_pick::post_merge(ctx)
                .instrument(span)
                .await
                .map_err(|error| match error {
                    CommandError::Commented(error) | CommandError::Other(error) => error,
                })
        }
        other => {
            tracing::warn!("Ignoring unknown built-in command /__{other}");
            Ok(())
        }
    }
}

async fn execute_multi(ctx: &mut JobContext, multi: MultiCommand) -> anyhow::Result<()> {
    if let Err(rejection) = validate::validate_multi_trigger(ctx, &multi.raw_lines).await? {
        tracing::warn!("Multi-command rejected: {rejection}");
        let note = comment::validation_error_comment(&rejection);
        ctx.client
            .post_comment(ctx.pr_number, note.render())
            .await
            .context("Cannot post validation rejection")?;
        return Ok(());
    }

    // Sub-commands run in order; a failing sub-command does not abort the
    // sequence.
    let mut outcomes = Vec::with_capacity(multi.raw_lines.len());
    for raw_line in &multi.raw_lines {
        outcomes.push(run_sub_command(ctx, raw_line).await?);
    }

    let summary = comment::batch_summary_comment(&outcomes);
    ctx.client
        .post_comment(ctx.pr_number, summary.render())
        .await
        .context("Cannot post batch summary")
}

async fn run_sub_command(ctx: &mut JobContext, raw_line: &str) -> anyhow::Result<CommandOutcome> {
    let failed = |name: &str, reason: String| CommandOutcome {
        name: name.to_string(),
        display: raw_line.to_string(),
        outcome: Err(reason),
    };

    let command = match parse_sub_line(raw_line) {
        Err(CommandParseError::UnknownCommand(name)) => {
            return Ok(failed(&format!("/{name}"), "unknown command".to_string()));
        }
        Err(error) => return Ok(failed(raw_line, error.to_string())),
        Ok(SubCommand::BuiltIn(builtin)) => {
            return Ok(failed(
                &format!("/__{}", builtin.name),
                "internal-only command".to_string(),
            ));
        }
        Ok(SubCommand::Single(command)) => command,
    };

    if command.name == CommandName::Lgtm {
        return Ok(failed(
            &command.name.to_string(),
            "not allowed in a multi-command batch".to_string(),
        ));
    }

    if let Err(rejection) = validate::validate_sub(ctx, &command).await? {
        return Ok(failed(&command.name.to_string(), rejection.to_string()));
    }

    let outcome = match dispatch(ctx, &command).await {
        Ok(()) => Ok(()),
        Err(CommandError::Commented(error) | CommandError::Other(error)) => {
            tracing::warn!("Sub-command {} failed: {error:?}", command.name);
            Err(error.to_string())
        }
    };
    Ok(CommandOutcome {
        name: command.name.to_string(),
        display: raw_line.to_string(),
        outcome,
    })
}

async fn dispatch(ctx: &mut JobContext, command: &SingleCommand) -> CommandResult {
    let span = tracing::info_span!("Command", name = command.name.as_str());
    match command.name {
        CommandName::Help => help::run(ctx).instrument(span).await,
        CommandName::Assign => assign::assign(ctx, &command.args).instrument(span).await,
        CommandName::Unassign => assign::unassign(ctx, &command.args).instrument(span).await,
        CommandName::Lgtm => {
            lgtm::approve(ctx).instrument(span).await?;
            Ok(())
        }
        CommandName::RemoveLgtm => {
            lgtm::dismiss(ctx).instrument(span).await?;
            Ok(())
        }
        CommandName::Label => labels::add(ctx, &command.args).instrument(span).await,
        CommandName::Unlabel => labels::remove(ctx, &command.args).instrument(span).await,
        CommandName::Rebase => rebase::run(ctx).instrument(span).await,
        CommandName::Retest => retest::run(ctx).instrument(span).await,
        CommandName::Check => status::run(ctx).instrument(span).await,
        CommandName::Merge | CommandName::Ready => {
            merge::run(ctx, &command.args).instrument(span).await
        }
        CommandName::CherryPick => cherry_pick::run(ctx, &command.args).instrument(span).await,
        CommandName::Close => close::run(ctx).instrument(span).await,
        CommandName::Batch => {
            // The parser expands `/batch` before dispatch.
            tracing::warn!("Batch command reached the dispatcher");
            Ok(())
        }
    }
}
