//! Line-oriented chat loop.
//!
//! Reads one message per line from stdin, streams the answer to stdout and
//! routes every stream event through the conversation store. Only one
//! response streams at a time; Ctrl+C cancels it and keeps what arrived.

use std::error::Error;
use std::io::{self, Write};
use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::cli::load_effective_config;
use crate::core::chat_stream::{StreamEvent, StreamSubscriber};
use crate::core::config::data::{path_display, DEFAULT_DISPLAY_NAME};
use crate::core::config::Config;
use crate::core::conversation::{Conversation, ConversationStore};
use crate::core::message::Role;

const PROMPT: &str = "you>";

const HELP_TEXT: &str = "Commands:\n\
  /new          Start a new conversation\n\
  /list         List conversations\n\
  /switch <n>   Switch to conversation n from /list\n\
  /clear        Clear the current conversation\n\
  /config       Show the current configuration\n\
  /help         Show this help\n\
  /quit         Exit\n\
Ctrl+C cancels a response while it is streaming.";

const CONFIG_HINT: &str = "   Run 'azchat set <key> <value>' to configure, for example:\n   \
azchat set endpoint https://my-resource.openai.azure.com/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    New,
    List,
    /// 1-based position in the `/list` output.
    Switch(usize),
    Clear,
    Config,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplInput {
    Empty,
    Message(String),
    Command(ReplCommand),
    Invalid(String),
}

pub fn parse_input(line: &str) -> ReplInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ReplInput::Empty;
    }
    let Some(rest) = trimmed.strip_prefix('/') else {
        return ReplInput::Message(trimmed.to_string());
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let command = match name {
        "new" => ReplCommand::New,
        "list" => ReplCommand::List,
        "switch" => match parts.next().and_then(|n| n.parse::<usize>().ok()) {
            Some(index) if index > 0 => ReplCommand::Switch(index),
            _ => return ReplInput::Invalid("Usage: /switch <n> (see /list)".to_string()),
        },
        "clear" => ReplCommand::Clear,
        "config" => ReplCommand::Config,
        "help" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        _ => {
            return ReplInput::Invalid(format!(
                "Unknown command: /{name}. Type /help for commands."
            ))
        }
    };
    ReplInput::Command(command)
}

fn assistant_name(config: &Config) -> &str {
    let name = config.display_name.trim();
    if name.is_empty() {
        DEFAULT_DISPLAY_NAME
    } else {
        name
    }
}

/// Applies events to the store and echoes them to a writer.
pub struct TerminalSubscriber<'a, W: Write> {
    store: &'a mut ConversationStore,
    out: W,
}

impl<'a, W: Write> TerminalSubscriber<'a, W> {
    pub fn new(store: &'a mut ConversationStore, out: W) -> Self {
        Self { store, out }
    }

    fn echo(&mut self, event: &StreamEvent) -> io::Result<()> {
        match event {
            StreamEvent::Delta { text, .. } => {
                write!(self.out, "{text}")?;
                self.out.flush()
            }
            StreamEvent::Completed { .. } => writeln!(self.out),
            StreamEvent::Aborted { .. } => writeln!(self.out, "\n(response cancelled)"),
            StreamEvent::Failed { error, .. } => {
                writeln!(self.out)?;
                writeln!(self.out, "❌ {error}")?;
                if error.is_configuration() {
                    writeln!(self.out, "{CONFIG_HINT}")?;
                }
                Ok(())
            }
        }
    }
}

impl<W: Write> StreamSubscriber for TerminalSubscriber<'_, W> {
    fn on_event(&mut self, event: StreamEvent) {
        if let Err(err) = self.echo(&event) {
            debug!(error = %err, "Failed to echo stream event");
        }
        self.store.on_event(event);
    }
}

pub fn render_list(store: &ConversationStore) -> Vec<String> {
    store
        .conversations()
        .iter()
        .enumerate()
        .map(|(index, conversation)| {
            let marker = if conversation.id == store.active_id() {
                '*'
            } else {
                ' '
            };
            format!(
                "{marker} {}. {} ({} messages)",
                index + 1,
                conversation.title,
                conversation.messages.len()
            )
        })
        .collect()
}

pub fn render_transcript(conversation: &Conversation, config: &Config) -> Vec<String> {
    conversation
        .messages
        .iter()
        .filter(|message| !message.content.is_empty())
        .map(|message| match message.role {
            Role::User => format!("{PROMPT} {}", message.content),
            Role::Assistant => format!("{}> {}", assistant_name(config), message.content),
            Role::System => format!("[system] {}", message.content),
        })
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub fn handle_command<W: Write>(
    command: ReplCommand,
    store: &mut ConversationStore,
    config: &Config,
    config_path: &Path,
    out: &mut W,
) -> io::Result<Flow> {
    match command {
        ReplCommand::New => {
            store.create_conversation();
            writeln!(out, "Started {}", store.active().title)?;
        }
        ReplCommand::List => {
            for line in render_list(store) {
                writeln!(out, "{line}")?;
            }
        }
        ReplCommand::Switch(index) => {
            let Some(id) = store.conversations().get(index - 1).map(|c| c.id) else {
                writeln!(out, "⚠️  No conversation {index}; see /list")?;
                return Ok(Flow::Continue);
            };
            store.set_active(id);
            let conversation = store.active();
            writeln!(out, "Switched to {}", conversation.title)?;
            for line in render_transcript(conversation, config) {
                writeln!(out, "{line}")?;
            }
        }
        ReplCommand::Clear => {
            store.clear(store.active_id());
            writeln!(out, "Conversation cleared")?;
        }
        ReplCommand::Config => {
            writeln!(out, "Config file: {}", path_display(config_path))?;
            for line in config.display_lines() {
                writeln!(out, "{line}")?;
            }
        }
        ReplCommand::Help => writeln!(out, "{HELP_TEXT}")?,
        ReplCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

async fn send(
    client: &reqwest::Client,
    store: &mut ConversationStore,
    config: &Config,
    text: &str,
) -> io::Result<()> {
    let prepared = match store.begin_send(store.active_id(), text, config) {
        Ok(prepared) => prepared,
        Err(err) => {
            eprintln!("⚠️  {err}");
            return Ok(());
        }
    };

    let mut session = prepared.into_session(config);
    let handle = session.handle();
    let mut stdout = io::stdout();
    write!(stdout, "{}> ", assistant_name(config))?;
    stdout.flush()?;

    let mut subscriber = TerminalSubscriber::new(store, stdout);
    let run = session.run(client, &mut subscriber);
    tokio::pin!(run);
    let state = loop {
        tokio::select! {
            state = &mut run => break state,
            _ = tokio::signal::ctrl_c() => handle.cancel(),
        }
    };
    debug!(?state, "Response finished");
    Ok(())
}

pub async fn run_repl(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let client = reqwest::Client::new();
    let mut store = ConversationStore::new();
    let mut config = load_effective_config(config_path);

    println!("{} is ready. Type /help for commands.", assistant_name(&config));
    if let Some(missing) = config.missing_settings() {
        println!("⚠️  {missing}");
        println!("{CONFIG_HINT}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "{PROMPT} ")?;
        stdout.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            writeln!(stdout)?;
            break;
        };

        match parse_input(&line) {
            ReplInput::Empty => {}
            ReplInput::Invalid(message) => eprintln!("⚠️  {message}"),
            ReplInput::Command(command) => {
                if command == ReplCommand::Config {
                    config = load_effective_config(config_path);
                }
                let flow = handle_command(command, &mut store, &config, config_path, &mut stdout)?;
                if flow == Flow::Quit {
                    break;
                }
            }
            ReplInput::Message(text) => {
                // Pick up `azchat set` changes made from another terminal.
                config = load_effective_config(config_path);
                send(&client, &mut store, &config, &text).await?;
            }
        }
    }
    Ok(())
}
