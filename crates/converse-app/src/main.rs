//! Converse terminal client - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Install tracing
//! 3. Build storage, the AI client, the orchestrator and the dictation engine
//! 4. Wire them into a `SessionCoordinator` and bridge dictation sends
//! 5. Read commands from stdin until `/quit` or end of input

mod cli;
mod commands;
mod echo;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use converse_chat::{
    AiClient, FileLike, FileSource, GeminiClient, MemoryFeedback, MemoryStorage,
    ResponseOrchestrator, SessionCoordinator, SubmitOutcome,
};
use converse_core::config::ConverseConfig;
use converse_core::types::{Agent, FeedbackKind, Message, MessageId, SessionId};
use converse_dictation::{
    DictationEngine, InputBuffer, ManualSpeechBackend, SpeechErrorCode, StartOutcome,
    TranscriptOutcome,
};

use cli::CliArgs;
use commands::Command;
use echo::EchoClient;

fn build_client(config: &ConverseConfig, offline: bool) -> Arc<dyn AiClient> {
    if offline {
        tracing::info!("Offline mode: using echo client");
        return Arc::new(EchoClient);
    }
    let Some(api_key) = GeminiClient::api_key_from_env(&config.ai) else {
        tracing::warn!(
            env = %config.ai.api_key_env,
            "No API key found; using offline echo client"
        );
        return Arc::new(EchoClient);
    };
    match GeminiClient::new(api_key, &config.ai) {
        Ok(client) => {
            tracing::info!(model = %config.ai.model, "Gemini client ready");
            Arc::new(client)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to build Gemini client; using offline echo client");
            Arc::new(EchoClient)
        }
    }
}

fn print_message(message: &Message) {
    let edited = if message.edited { " (edited)" } else { "" };
    println!(
        "[{}] {} {}{}:",
        message.id,
        message.created_at.format("%H:%M"),
        message.role,
        edited
    );
    println!("{}", message.content);
    for attachment in &message.attachments {
        println!(
            "  [{}] {} ({}, {} bytes)",
            attachment.id, attachment.name, attachment.category, attachment.size
        );
    }
}

fn print_outcome(outcome: &SubmitOutcome) {
    match outcome {
        SubmitOutcome::Sent { user, reply, .. } => {
            print_message(user);
            print_message(reply);
        }
        SubmitOutcome::Rejected(reason) => println!("(not sent: {:?})", reason),
        SubmitOutcome::Failed(notice) => println!("! {}", notice.text),
    }
}

async fn attach_file(coordinator: &SessionCoordinator, path: &str) {
    let path = Path::new(path);
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            println!("! cannot read {}: {}", path.display(), e);
            return;
        }
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let file = FileLike::new(name, commands::guess_mime(path), bytes);
    match coordinator.attachments().ingest(file).await {
        Ok(a) => println!("attached [{}] {} ({})", a.id, a.name, a.category),
        Err(e) => println!("! {}", e),
    }
}

/// Handle one command. Returns `false` to quit.
async fn handle(coordinator: &Arc<SessionCoordinator>, command: Command) -> bool {
    match command {
        Command::Send(text) => {
            let outcome = coordinator.submit_input(&text).await;
            print_outcome(&outcome);
        }
        Command::Attach(path) => attach_file(coordinator, &path).await,
        Command::Paste(text) => {
            let file = FileLike::new("pasted.txt", "text/plain", text.into_bytes())
                .with_source(FileSource::Paste);
            match coordinator.attachments().ingest(file).await {
                Ok(a) => println!("attached [{}] {} ({})", a.id, a.name, a.category),
                Err(e) => println!("! {}", e),
            }
        }
        Command::Link(url) => match coordinator.attachments().ingest_link(&url) {
            Ok(a) => println!("linked [{}] {}", a.id, a.name),
            Err(e) => println!("! {}", e),
        },
        Command::Detach(Some(id)) => match coordinator.attachments().remove(Some(id.as_str())) {
            Some(a) => println!("detached [{}] {}", a.id, a.name),
            None => println!("! no pending attachment {}", id),
        },
        Command::Detach(None) => {
            coordinator.attachments().remove(None);
            println!("all attachments removed");
        }
        Command::Pending => {
            for a in coordinator.attachments().pending() {
                println!("[{}] {} ({}, {} bytes)", a.id, a.name, a.category, a.size);
            }
        }
        Command::Edit { message_id, text } => {
            match coordinator.edit(&MessageId::from(message_id), &text).await {
                Ok(converse_chat::EditOutcome::Regenerated { edited, reply }) => {
                    print_message(&edited);
                    print_message(&reply);
                }
                Ok(converse_chat::EditOutcome::Rejected) => println!("(edit ignored)"),
                Err(e) => println!("! {}", e),
            }
        }
        Command::Delete(message_id) => {
            match coordinator.delete(&MessageId::from(message_id)).await {
                Ok(report) => println!("deleted {} message(s)", report.removed.len()),
                Err(e) => println!("! {}", e),
            }
        }
        Command::Rename {
            message_id,
            attachment_id,
            name,
        } => match coordinator
            .rename_attachment(&MessageId::from(message_id), &attachment_id, &name)
            .await
        {
            Ok(message) => print_message(&message),
            Err(e) => println!("! {}", e),
        },
        Command::History => {
            for message in coordinator.lifecycle().messages() {
                print_message(&message);
            }
        }
        Command::Sessions => match coordinator.list_sessions().await {
            Ok(sessions) => {
                let active = coordinator.active_session();
                for s in sessions {
                    let marker = if s.id == active { "*" } else { " " };
                    println!(
                        "{} {}  {}  {}",
                        marker,
                        s.id,
                        s.updated_at.format("%Y-%m-%d %H:%M"),
                        s.title
                    );
                }
            }
            Err(e) => println!("! {}", e),
        },
        Command::Open(id) => match coordinator.open_session(&SessionId::new(id)).await {
            Ok(()) => println!("opened ({} messages)", coordinator.lifecycle().len()),
            Err(e) => println!("! {}", e),
        },
        Command::DeleteSession(id) => match coordinator.delete_session(&SessionId::new(id)).await {
            Ok(()) => println!("session deleted"),
            Err(e) => println!("! {}", e),
        },
        Command::New => {
            coordinator.start_new_session();
            println!("new conversation");
        }
        Command::Agent(kind) => {
            let name = format!("{:?}", kind);
            coordinator.select_agent(Agent::new(name, kind)).await;
            println!("agent: {:?} {:?}", kind, kind.capabilities());
        }
        Command::Listen => match coordinator.start_dictation().await {
            Ok(StartOutcome::Started) => println!("listening..."),
            Ok(StartOutcome::AlreadyListening) => println!("already listening"),
            Ok(StartOutcome::Unsupported) => {}
            Err(e) => println!("! {}", e),
        },
        Command::Say(fragment) => {
            if let Some(engine) = coordinator.dictation() {
                match engine.on_result(&fragment).await {
                    TranscriptOutcome::Updated(text) => println!("> {}", text),
                    TranscriptOutcome::Submit(text) => println!("> {} (sending)", text),
                    TranscriptOutcome::Ignored => println!("(not listening)"),
                }
            }
        }
        Command::End => {
            if let Some(engine) = coordinator.dictation() {
                engine.on_end().await;
            }
        }
        Command::SpeechError(code) => {
            if let Some(engine) = coordinator.dictation() {
                engine.on_error(SpeechErrorCode::from_code(&code)).await;
            }
        }
        Command::Stop => {
            coordinator.stop_dictation().await;
            if let Some(engine) = coordinator.dictation() {
                println!("dictation stopped after {}s", engine.elapsed_secs());
            }
        }
        Command::Up(id) => feedback(coordinator, id, FeedbackKind::Up).await,
        Command::Down(id) => feedback(coordinator, id, FeedbackKind::Down).await,
        Command::Help => println!("{}", commands::HELP),
        Command::Quit => return false,
    }
    true
}

async fn feedback(coordinator: &SessionCoordinator, id: String, kind: FeedbackKind) {
    match coordinator
        .post_feedback(&MessageId::from(id), kind, Vec::new(), None)
        .await
    {
        Ok(()) => println!("thanks for the feedback"),
        Err(e) => println!("! {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let config_file = args.resolve_config_path();
    let mut config = ConverseConfig::load_or_default(&config_file);
    args.apply(&mut config);

    // Tracing. Logs go to stderr so they do not mix with the conversation.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(args.resolve_log_level(&config))
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Converse v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    let client = build_client(&config, args.offline);
    let orchestrator = Arc::new(ResponseOrchestrator::new(
        client,
        config.chat.clone(),
        config.ai.model.clone(),
    ));

    let engine = DictationEngine::new(
        Arc::new(ManualSpeechBackend::new()),
        InputBuffer::new(),
        &config.dictation,
    )?;

    let coordinator = Arc::new(
        SessionCoordinator::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryFeedback::new()),
            orchestrator,
            &config,
        )
        .with_dictation(engine),
    );
    let bridge = coordinator.spawn_dictation_bridge();

    let mut notices = coordinator.subscribe_notices();
    let notice_printer = tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            println!("! {}", notice.text);
        }
    });

    println!(
        "Converse ({} / {}). Type /help for commands.",
        coordinator.agent().name,
        config.ai.model
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match commands::parse(&line) {
            Ok(Some(command)) => {
                if !handle(&coordinator, command).await {
                    break;
                }
            }
            Ok(None) => {}
            Err(hint) => println!("! {}", hint),
        }
    }

    coordinator.stop_dictation().await;
    if let Some(bridge) = bridge {
        bridge.abort();
    }
    notice_printer.abort();
    tracing::info!("Converse stopped");
    Ok(())
}
