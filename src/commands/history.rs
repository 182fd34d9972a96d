use colored::Colorize;
use prettytable::{format, Table};
use serde_json::json;

use crate::config::Config;
use crate::error::Result;
use crate::storage::{SledThreadStore, Thread, ThreadStore};

const QUESTION_WIDTH: usize = 48;

/// Print the stored threads of a conversation
///
/// # Errors
///
/// Returns an error if the store cannot be opened or read
pub async fn handle_history(config: &Config, conversation: &str, json: bool) -> Result<()> {
    let store = SledThreadStore::new(config.storage.resolve_path()?)?;
    let threads = store.load_threads(conversation).await?;

    if json {
        let rows: Vec<_> = threads.iter().map(thread_json).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if threads.is_empty() {
        println!(
            "{}",
            format!("No threads found for conversation {}.", conversation).yellow()
        );
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "Thread ID".bold(),
        "Parent".bold(),
        "Asked".bold(),
        "Question".bold(),
        "Citations".bold()
    ]);

    for thread in &threads {
        let parent = thread
            .document
            .context
            .parent_thread_id
            .clone()
            .unwrap_or_else(|| "-".to_string());
        let asked = thread
            .asked_at()
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(prettytable::row![
            thread.thread_id.cyan(),
            parent,
            asked,
            truncate(&thread.document.user_message.content, QUESTION_WIDTH),
            thread.document.bot_response.citations.visible_count()
        ]);
    }

    println!("\nConversation {}:", conversation.bold());
    table.printstd();
    println!();
    println!(
        "Use {} to continue it.",
        format!("cliniq chat --conversation {}", conversation).cyan()
    );
    println!();

    Ok(())
}

fn thread_json(thread: &Thread) -> serde_json::Value {
    json!({
        "thread_id": thread.thread_id,
        "parent_thread_id": thread.document.context.parent_thread_id,
        "asked_at": thread.asked_at().map(|at| at.to_rfc3339()),
        "question": thread.document.user_message.content,
        "answer": thread.document.bot_response.content,
        "citations": thread.document.bot_response.citations.visible_count(),
    })
}

/// Shortens `text` to at most `width` characters
fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}
