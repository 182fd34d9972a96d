//! Interactive chat mode handler.
//!
//! Opens the thread store and the streaming client, creates a [`Session`],
//! and runs a readline-based loop that asks each line of input and renders
//! the session's events as they arrive.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::commands::special_commands::{parse_special_command, print_help, SpecialCommand};
use crate::config::Config;
use crate::error::Result;
use crate::feedback::FeedbackKind;
use crate::session::{AskOptions, Message, Session, SessionEvent, SessionIdentity};
use crate::storage::SledThreadStore;
use crate::stream::http::HttpGenerationClient;
use crate::stream::StreamStatus;

/// Start interactive chat mode
///
/// # Arguments
///
/// * `config` - Global configuration
/// * `conversation` - Conversation to resume; a new one is started if `None`
/// * `user` - User id sent with every request
///
/// # Examples
///
/// ```
/// use cliniq::commands::chat;
/// use cliniq::config::Config;
///
/// // In application code:
/// // chat::run_chat(Config::default(), None, "local-user".to_string()).await?;
/// ```
pub async fn run_chat(config: Config, conversation: Option<String>, user: String) -> Result<()> {
    tracing::info!("Starting interactive chat mode");

    let store = Arc::new(SledThreadStore::new(config.storage.resolve_path()?)?);
    let service = Arc::new(HttpGenerationClient::from_config(&config.service)?);

    let resuming = conversation.is_some();
    let identity = match conversation {
        Some(id) => SessionIdentity::resume(id, user),
        None => SessionIdentity::new(user),
    };

    let session = Session::new(identity, service, store.clone(), &config).with_quota_sink(store);
    let mut rx = session.subscribe();
    session.start();

    if resuming {
        let loaded = session.resume().await?;
        print_transcript(&session.messages());
        println!("Resumed conversation with {} thread(s).\n", loaded);
        drain(&session, &mut rx);
    }

    print_welcome_banner(&session);

    let mut rl = DefaultEditor::new()?;

    loop {
        drain(&session, &mut rx);

        match rl.readline(&format!("{} ", "cliniq>".green().bold())) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(trimmed)?;

                let command = match parse_special_command(trimmed) {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("{}\n", e.to_string().red());
                        continue;
                    }
                };

                match command {
                    SpecialCommand::Ask {
                        question,
                        follow_up,
                        direct_image,
                    } => {
                        let options = AskOptions {
                            follow_up,
                            direct_image,
                        };
                        let result =
                            render_while(&session, &mut rx, session.ask_with(&question, options))
                                .await;
                        if let Err(e) = result {
                            eprintln!("Error: {}\n", e);
                        }
                    }
                    SpecialCommand::Reload => {
                        let Some(target) = session.last_assistant_id() else {
                            println!("{}\n", "Nothing to reload yet.".yellow());
                            continue;
                        };
                        if let Err(e) =
                            render_while(&session, &mut rx, session.reload(&target)).await
                        {
                            eprintln!("Error: {}\n", e);
                        }
                    }
                    SpecialCommand::Feedback { kind, comment } => {
                        submit_feedback(&session, kind, &comment).await;
                    }
                    SpecialCommand::DismissFeedback => {
                        if session.dismiss_feedback() {
                            println!("{}\n", "Feedback prompt dismissed.".dimmed());
                        } else {
                            println!("{}\n", "There is no feedback prompt to dismiss.".yellow());
                        }
                    }
                    SpecialCommand::Quota => print_quota(&session),
                    SpecialCommand::Help => print_help(),
                    SpecialCommand::Exit => break,
                    SpecialCommand::None => {}
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                tracing::error!("Readline error: {:?}", err);
                break;
            }
        }
    }

    println!(
        "Conversation {} saved. Goodbye!",
        session.identity().conversation_id.cyan()
    );
    Ok(())
}

/// Awaits `work` while rendering session events as they arrive
async fn render_while<T>(
    session: &Session,
    rx: &mut broadcast::Receiver<SessionEvent>,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::pin!(work);
    loop {
        tokio::select! {
            result = &mut work => {
                drain(session, rx);
                return result;
            }
            event = rx.recv() => match event {
                Ok(event) => render_event(session, event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Renderer fell behind the session");
                }
                Err(RecvError::Closed) => return (&mut work).await,
            },
        }
    }
}

/// Renders events that are already queued
fn drain(session: &Session, rx: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = rx.try_recv() {
        render_event(session, event);
    }
}

fn render_event(session: &Session, event: SessionEvent) {
    match event {
        SessionEvent::MessagesChanged => {}
        SessionEvent::Delta { text, .. } => {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }
        SessionEvent::Status { status, .. } => {
            if status != StreamStatus::Complete {
                println!("{}", format!("[{}]", status.label()).dimmed());
            }
        }
        SessionEvent::Completed { message_id, .. } => {
            println!();
            if let Some(message) = session.message(&message_id) {
                print_answer_extras(&message);
            }
            println!();
        }
        SessionEvent::Failed { message_id, .. } => {
            println!();
            if let Some(message) = session.message(&message_id) {
                println!("{}", message.content.yellow());
                if message.answer.as_ref().is_some_and(|a| a.upgrade_prompt) {
                    println!("{}", "Upgrade to continue asking questions.".cyan());
                }
            }
            println!();
        }
        SessionEvent::QuotaUpdated {
            remaining,
            nearly_exhausted,
        } => {
            if nearly_exhausted {
                println!(
                    "{}\n",
                    format!("Only {} question(s) remaining.", remaining).yellow()
                );
            }
        }
        SessionEvent::FeedbackPromptDue { .. } => {
            println!(
                "{}\n",
                "Was the last answer helpful? Tell us with /helpful or /not-helpful, or /dismiss."
                    .cyan()
            );
        }
    }
}

/// Citations, images and suggestions of a completed answer
fn print_answer_extras(message: &Message) {
    let Some(answer) = &message.answer else {
        return;
    };

    let visible = answer.citations.visible();
    if !visible.is_empty() {
        println!("\n{}", "Sources:".bold());
        for citation in visible {
            let Some(preview) = answer.citations.preview(&citation.key) else {
                continue;
            };
            println!(
                "  [{}] {} ({})",
                preview.key.cyan(),
                preview.title,
                preview.source_label
            );
            if let Some(byline) = &preview.byline {
                println!("      {}", byline.dimmed());
            }
            if let Some(link) = &preview.link {
                println!("      {}", link.underline());
            }
        }
    }

    if !answer.svg_content.is_empty() {
        println!(
            "\n{}",
            format!("{} image(s) attached.", answer.svg_content.len()).dimmed()
        );
    }

    if !answer.follow_up_questions.is_empty() {
        println!("\n{}", "You could also ask:".bold());
        for question in &answer.follow_up_questions {
            println!("  - {}", question);
        }
    }
}

async fn submit_feedback(session: &Session, kind: FeedbackKind, comment: &str) {
    let thread_id = session
        .last_assistant_id()
        .and_then(|id| session.message(&id))
        .and_then(|message| message.thread.resolved().map(str::to_string));

    let Some(thread_id) = thread_id else {
        println!("{}\n", "There is no answered question to rate yet.".yellow());
        return;
    };

    match session
        .submit_feedback(&thread_id, kind, Vec::new(), comment)
        .await
    {
        Ok(_) => println!("{}\n", "Thanks for your feedback!".green()),
        Err(e) => eprintln!("Error: {}\n", e),
    }
}

fn print_quota(session: &Session) {
    match session.quota().remaining() {
        Some(remaining) if session.quota().is_nearly_exhausted() => {
            println!("{}\n", format!("{} question(s) remaining.", remaining).yellow())
        }
        Some(remaining) => println!("{} question(s) remaining.\n", remaining),
        None => println!("Remaining questions are not known yet.\n"),
    }
}

fn print_transcript(messages: &[Message]) {
    for message in messages {
        if message.is_user() {
            println!("{} {}", ">".green().bold(), message.content.bold());
        } else {
            println!("{}", message.content);
            print_answer_extras(message);
            println!();
        }
    }
}

fn print_welcome_banner(session: &Session) {
    println!(
        "\n{} {}",
        "Cliniq".bold().cyan(),
        "evidence-backed clinical answers".dimmed()
    );
    println!(
        "Conversation: {}",
        session.identity().conversation_id.cyan()
    );
    println!("Type /help for commands, exit to quit.\n");
}
