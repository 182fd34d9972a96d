//! Special commands parser for interactive chat mode
//!
//! Plain input is asked as a question (a follow-up of the last answered
//! thread, when there is one). Lines prefixed with `/` are commands:
//! - Start a new root question or ask for an image answer
//! - Reload the last answer
//! - Rate the last answer or dismiss the feedback prompt
//! - Show remaining quota, help, or exit the session
//!
//! Command names are case-insensitive; their arguments keep their case.

use thiserror::Error;

use crate::feedback::FeedbackKind;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an unsupported argument
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Ask a question
    ///
    /// Plain input continues the conversation as a follow-up; `/new` starts
    /// a root question.
    Ask {
        question: String,
        follow_up: bool,
        direct_image: bool,
    },

    /// Destroy the last answer and ask its question again
    Reload,

    /// Rate the last answered thread, with an optional comment
    Feedback {
        kind: FeedbackKind,
        comment: String,
    },

    /// Close the feedback prompt without rating
    DismissFeedback,

    /// Show the remaining question quota
    Quota,

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Blank input
    None,
}

/// Parse a line of user input into a command
///
/// # Errors
///
/// Returns `CommandError::UnknownCommand` if input starts with "/" but is not
/// a valid command, `CommandError::MissingArgument` if a command needs a
/// question, and `CommandError::UnsupportedArgument` if a command takes no
/// argument but received one.
///
/// # Examples
///
/// ```
/// use cliniq::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// let cmd = parse_special_command("/reload").unwrap();
/// assert_eq!(cmd, SpecialCommand::Reload);
///
/// let cmd = parse_special_command("What about in pregnancy?").unwrap();
/// assert!(matches!(cmd, SpecialCommand::Ask { follow_up: true, .. }));
///
/// assert!(parse_special_command("/foo").is_err());
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(SpecialCommand::None);
    }

    let lower = trimmed.to_lowercase();
    if lower == "exit" || lower == "quit" {
        return Ok(SpecialCommand::Exit);
    }

    if !trimmed.starts_with('/') {
        return Ok(SpecialCommand::Ask {
            question: trimmed.to_string(),
            follow_up: true,
            direct_image: false,
        });
    }

    let (name, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((name, rest)) => (name.to_lowercase(), rest.trim()),
        None => (lower.clone(), ""),
    };

    match name.as_str() {
        "/new" => Ok(SpecialCommand::Ask {
            question: required(&name, rest, "/new <question>")?,
            follow_up: false,
            direct_image: false,
        }),
        "/image" => Ok(SpecialCommand::Ask {
            question: required(&name, rest, "/image <question>")?,
            follow_up: false,
            direct_image: true,
        }),
        "/reload" => no_argument(&name, rest, SpecialCommand::Reload),
        "/helpful" => Ok(SpecialCommand::Feedback {
            kind: FeedbackKind::Helpful,
            comment: rest.to_string(),
        }),
        "/not-helpful" | "/unhelpful" => Ok(SpecialCommand::Feedback {
            kind: FeedbackKind::NotHelpful,
            comment: rest.to_string(),
        }),
        "/dismiss" => no_argument(&name, rest, SpecialCommand::DismissFeedback),
        "/quota" => no_argument(&name, rest, SpecialCommand::Quota),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/exit" | "/quit" => Ok(SpecialCommand::Exit),
        _ => Err(CommandError::UnknownCommand(name)),
    }
}

fn required(command: &str, rest: &str, usage: &str) -> Result<String, CommandError> {
    if rest.is_empty() {
        Err(CommandError::MissingArgument {
            command: command.to_string(),
            usage: usage.to_string(),
        })
    } else {
        Ok(rest.to_string())
    }
}

fn no_argument(
    command: &str,
    rest: &str,
    parsed: SpecialCommand,
) -> Result<SpecialCommand, CommandError> {
    if rest.is_empty() {
        Ok(parsed)
    } else {
        Err(CommandError::UnsupportedArgument {
            command: command.to_string(),
            arg: rest.to_string(),
        })
    }
}

/// Display help text for chat commands
pub fn print_help() {
    println!(
        r#"
Commands for Interactive Chat Mode
==================================

ASKING:
  <text>              - Ask a follow-up of the last answer
  /new <question>     - Start a new, unrelated question
  /image <question>   - Ask for an image answer

ANSWERS:
  /reload             - Discard the last answer and ask again
  /helpful [comment]  - Mark the last answer as helpful
  /not-helpful [comment] - Mark the last answer as not helpful
  /dismiss            - Close the feedback prompt without rating

SESSION:
  /quota              - Show remaining questions
  /help               - Show this help message
  /?                  - Same as /help
  exit                - Exit interactive mode
  quit                - Same as exit

NOTES:
  - Command names are case-insensitive
  - Follow-ups are answered in the context of the last answered question
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_follow_up() {
        let cmd = parse_special_command("  What about Pregnancy?  ").unwrap();
        assert_eq!(
            cmd,
            SpecialCommand::Ask {
                question: "What about Pregnancy?".to_string(),
                follow_up: true,
                direct_image: false,
            }
        );
    }

    #[test]
    fn test_new_keeps_question_case() {
        let cmd = parse_special_command("/NEW Dosing of Metformin in CKD").unwrap();
        assert_eq!(
            cmd,
            SpecialCommand::Ask {
                question: "Dosing of Metformin in CKD".to_string(),
                follow_up: false,
                direct_image: false,
            }
        );
    }

    #[test]
    fn test_new_without_question() {
        let err = parse_special_command("/new").unwrap_err();
        assert!(matches!(err, CommandError::MissingArgument { ref command, .. } if command == "/new"));
    }

    #[test]
    fn test_image_sets_direct_image() {
        let cmd = parse_special_command("/image brachial plexus anatomy").unwrap();
        assert!(matches!(
            cmd,
            SpecialCommand::Ask { direct_image: true, follow_up: false, .. }
        ));
    }

    #[test]
    fn test_reload() {
        assert_eq!(parse_special_command("/reload").unwrap(), SpecialCommand::Reload);
        assert_eq!(parse_special_command("/Reload").unwrap(), SpecialCommand::Reload);
    }

    #[test]
    fn test_reload_rejects_argument() {
        let err = parse_special_command("/reload now").unwrap_err();
        assert_eq!(
            err,
            CommandError::UnsupportedArgument {
                command: "/reload".to_string(),
                arg: "now".to_string(),
            }
        );
    }

    #[test]
    fn test_feedback_with_comment() {
        let cmd = parse_special_command("/not-helpful Missing the pediatric dose").unwrap();
        assert_eq!(
            cmd,
            SpecialCommand::Feedback {
                kind: FeedbackKind::NotHelpful,
                comment: "Missing the pediatric dose".to_string(),
            }
        );
    }

    #[test]
    fn test_feedback_without_comment() {
        let cmd = parse_special_command("/helpful").unwrap();
        assert_eq!(
            cmd,
            SpecialCommand::Feedback {
                kind: FeedbackKind::Helpful,
                comment: String::new(),
            }
        );
    }

    #[test]
    fn test_dismiss_feedback() {
        assert_eq!(
            parse_special_command("/Dismiss").unwrap(),
            SpecialCommand::DismissFeedback
        );
        assert!(matches!(
            parse_special_command("/dismiss later"),
            Err(CommandError::UnsupportedArgument { .. })
        ));
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(parse_special_command("/quota").unwrap(), SpecialCommand::Quota);
        assert_eq!(parse_special_command("/?").unwrap(), SpecialCommand::Help);
        assert_eq!(parse_special_command("exit").unwrap(), SpecialCommand::Exit);
        assert_eq!(parse_special_command("QUIT").unwrap(), SpecialCommand::Exit);
        assert_eq!(parse_special_command("/exit").unwrap(), SpecialCommand::Exit);
    }

    #[test]
    fn test_blank_input() {
        assert_eq!(parse_special_command("   ").unwrap(), SpecialCommand::None);
    }

    #[test]
    fn test_unknown_command() {
        let err = parse_special_command("/mode write").unwrap_err();
        assert_eq!(err, CommandError::UnknownCommand("/mode".to_string()));
    }
}
