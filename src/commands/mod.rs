/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `chat`    — Interactive question answering
- `history` — Stored threads of a conversation

The handlers are thin; the conversation engine lives in `session`.
*/

// Interactive question-answering loop
pub mod chat;

// Thread history listing
pub mod history;

// Special commands parser for the chat loop
pub mod special_commands;
