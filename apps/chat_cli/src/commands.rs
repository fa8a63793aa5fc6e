//! Input lines typed at the prompt.

use client_core::ModerationRequest;
use shared::domain::MessageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Reply { parent_id: MessageId, text: String },
    Channels,
    Join { slug: String },
    Older,
    Retry { client_id: String },
    Moderate { message_id: MessageId, request: ModerationRequest },
    Report { message_id: MessageId, reason: String },
    Log { message_id: MessageId },
    Help,
    Quit,
}

pub const HELP: &str = "\
/channels                list channels of the course
/join <slug>             switch channel
/older                   load an older page
/reply <id> <text>       reply in a thread
/retry <client-id>       resend a failed message
/pin|/unpin <id>         pin state (moderators)
/answer|/unanswer <id>   answer state in Q&A (moderators)
/lock|/unlock <id>       thread lock (moderators)
/hide|/restore <id>      visibility (moderators)
/report <id> <reason>    flag a message
/log <id>                moderation history (moderators)
/quit";

pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let args = parts.next().unwrap_or_default().trim();

    let moderation = match name {
        "pin" => Some(ModerationRequest::Pin),
        "unpin" => Some(ModerationRequest::Unpin),
        "answer" => Some(ModerationRequest::MarkAnswer),
        "unanswer" => Some(ModerationRequest::UnmarkAnswer),
        "lock" => Some(ModerationRequest::LockThread),
        "unlock" => Some(ModerationRequest::UnlockThread),
        "hide" => Some(ModerationRequest::Hide),
        "restore" => Some(ModerationRequest::Restore),
        _ => None,
    };
    if let Some(request) = moderation {
        return Ok(Command::Moderate {
            message_id: message_id(args)?,
            request,
        });
    }

    match name {
        "channels" => Ok(Command::Channels),
        "join" if !args.is_empty() => Ok(Command::Join {
            slug: args.to_string(),
        }),
        "older" => Ok(Command::Older),
        "retry" if !args.is_empty() => Ok(Command::Retry {
            client_id: args.to_string(),
        }),
        "reply" => {
            let (id, text) = split_id(args)?;
            Ok(Command::Reply {
                parent_id: id,
                text,
            })
        }
        "report" => {
            let (id, reason) = split_id(args)?;
            Ok(Command::Report {
                message_id: id,
                reason,
            })
        }
        "log" => Ok(Command::Log {
            message_id: message_id(args)?,
        }),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        _ => Err(format!("unknown command /{name}; try /help")),
    }
}

fn message_id(raw: &str) -> Result<MessageId, String> {
    raw.parse::<i64>()
        .map(MessageId)
        .map_err(|_| format!("expected a message id, got '{raw}'"))
}

fn split_id(args: &str) -> Result<(MessageId, String), String> {
    let (id, text) = args
        .split_once(char::is_whitespace)
        .ok_or_else(|| "expected <id> <text>".to_string())?;
    let text = text.trim();
    if text.is_empty() {
        return Err("expected <id> <text>".into());
    }
    Ok((message_id(id)?, text.to_string()))
}
