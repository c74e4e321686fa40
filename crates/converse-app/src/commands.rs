//! Terminal command parsing.

use std::path::Path;

use converse_core::types::AgentKind;

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Text to submit after whatever is already in the composer.
    Send(String),
    Attach(String),
    /// Clipboard text, attached as a text file.
    Paste(String),
    Link(String),
    /// Remove one pending attachment, or all with `None`.
    Detach(Option<String>),
    Edit { message_id: String, text: String },
    Delete(String),
    Rename {
        message_id: String,
        attachment_id: String,
        name: String,
    },
    History,
    Pending,
    Sessions,
    Open(String),
    DeleteSession(String),
    New,
    Agent(AgentKind),
    Listen,
    /// Feed a transcript fragment to the dictation engine.
    Say(String),
    /// Simulate the backend ending an utterance.
    End,
    /// Simulate a backend error code such as `not-allowed`.
    SpeechError(String),
    Stop,
    Up(String),
    Down(String),
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  <text>                         send the composer text plus <text> with pending attachments
  /send                          send the composer text as it is
  /attach <path>                 attach a local file
  /paste <text>                  attach pasted text as a file
  /link <url>                    attach a link
  /detach [id]                   remove one pending attachment, or all
  /pending                       list pending attachments
  /edit <id> <text>              edit a message and regenerate the reply
  /delete <id>                   delete a message and its reply
  /rename <msg-id> <att-id> <name>  rename an attachment, keeping its extension
  /history                       show the conversation
  /sessions                      list sessions
  /open <id>                     open a session
  /drop <id>                     delete a session
  /new                           start a new session
  /agent <kind>                  aisa, document, creative, voice, medical, generic
  /listen                        start dictation
  /say <fragment>                feed a transcript fragment
  /end                           end the current utterance
  /error <code>                  report a speech backend error (e.g. not-allowed)
  /stop                          stop dictation
  /up <id>, /down <id>           rate a reply
  /quit                          exit";

/// Parse one input line. Returns `Err` with a usage hint for bad commands and
/// `Ok(None)` for blank lines.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "send" => Command::Send(args.to_string()),
        "attach" => Command::Attach(required(args, "/attach <path>")?),
        "paste" => Command::Paste(required(args, "/paste <text>")?),
        "link" => Command::Link(required(args, "/link <url>")?),
        "detach" => Command::Detach((!args.is_empty()).then(|| args.to_string())),
        "pending" => Command::Pending,
        "edit" => {
            let (id, text) = args
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: /edit <id> <text>".to_string())?;
            Command::Edit {
                message_id: id.to_string(),
                text: text.trim().to_string(),
            }
        }
        "delete" => Command::Delete(required(args, "/delete <id>")?),
        "rename" => {
            let mut parts = args.splitn(3, char::is_whitespace);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(message_id), Some(attachment_id), Some(name)) if !message_id.is_empty() => {
                    Command::Rename {
                        message_id: message_id.to_string(),
                        attachment_id: attachment_id.to_string(),
                        name: name.trim().to_string(),
                    }
                }
                _ => return Err("usage: /rename <msg-id> <att-id> <name>".to_string()),
            }
        }
        "history" => Command::History,
        "sessions" => Command::Sessions,
        "open" => Command::Open(required(args, "/open <id>")?),
        "drop" => Command::DeleteSession(required(args, "/drop <id>")?),
        "new" => Command::New,
        "agent" => Command::Agent(args.parse::<AgentKind>()?),
        "listen" => Command::Listen,
        "say" => Command::Say(required(args, "/say <fragment>")?),
        "end" => Command::End,
        "error" => Command::SpeechError(required(args, "/error <code>")?),
        "stop" => Command::Stop,
        "up" => Command::Up(required(args, "/up <id>")?),
        "down" => Command::Down(required(args, "/down <id>")?),
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: /{} (try /help)", other)),
    };
    Ok(Some(command))
}

fn required(args: &str, usage: &str) -> Result<String, String> {
    if args.is_empty() {
        Err(format!("usage: {}", usage))
    } else {
        Ok(args.to_string())
    }
}

/// Guess a MIME type from the file extension.
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" | "xlsx" => "application/vnd.ms-excel",
        "ppt" | "pptx" => "application/vnd.ms-powerpoint",
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

// =============================================================================
// Tests
// =============================================================================
