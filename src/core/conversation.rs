//! In-memory conversations and the only consumer of stream events.
//!
//! Every change builds a new [`Conversation`] value and swaps it in. The
//! conversations and messages a change does not touch keep their `Arc`, so
//! holders of an old snapshot see a consistent view and cheap identity checks
//! tell what changed.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use crate::api::ChatMessage;
use crate::core::chat_stream::{StreamEvent, StreamSession, StreamSubscriber, StreamTarget};
use crate::core::config::Config;
use crate::core::constants::{CLEARED_CONVERSATION_TITLE, TITLE_ELLIPSIS, TITLE_MAX_GRAPHEMES};
use crate::core::message::{ConversationId, IdSequence, Message, MessageId, Role};

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub messages: Vec<Arc<Message>>,
    pub created_at: DateTime<Local>,
    /// Set once a user message has named the conversation.
    titled: bool,
    /// Placeholder of the session currently writing into this conversation.
    streaming: Option<MessageId>,
}

impl Conversation {
    fn new(id: ConversationId, title: String) -> Self {
        Self {
            id,
            title,
            messages: Vec::new(),
            created_at: Local::now(),
            titled: false,
            streaming: None,
        }
    }

    pub fn message(&self, id: MessageId) -> Option<&Arc<Message>> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    pub fn streaming_message(&self) -> Option<MessageId> {
        self.streaming
    }

    pub fn has_user_title(&self) -> bool {
        self.titled
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    EmptyMessage,
    UnknownConversation(ConversationId),
    /// A response is still streaming into this conversation.
    ConversationBusy(ConversationId),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::EmptyMessage => write!(f, "Message is empty"),
            SendError::UnknownConversation(id) => write!(f, "Conversation {id} does not exist"),
            SendError::ConversationBusy(_) => {
                write!(f, "Wait for the current response to finish or cancel it first")
            }
        }
    }
}

impl StdError for SendError {}

/// Everything needed to start the session for a send.
#[derive(Debug, Clone)]
pub struct PreparedSend {
    pub target: StreamTarget,
    pub api_messages: Vec<ChatMessage>,
}

impl PreparedSend {
    pub fn into_session(self, config: &Config) -> StreamSession {
        StreamSession::new(self.target, config, self.api_messages)
    }
}

/// Title derived from a message: whitespace collapsed, cut to the grapheme
/// budget, with an ellipsis appended only when something was cut.
pub fn derive_title(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut graphemes = collapsed.graphemes(true);
    let mut title: String = graphemes.by_ref().take(TITLE_MAX_GRAPHEMES).collect();
    if graphemes.next().is_some() {
        title.push_str(TITLE_ELLIPSIS);
    }
    title
}

pub struct ConversationStore {
    /// Newest first.
    conversations: Vec<Arc<Conversation>>,
    active: ConversationId,
    ids: IdSequence,
    created: u64,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// A store with one empty, active conversation.
    pub fn new() -> Self {
        let mut store = Self {
            conversations: Vec::new(),
            active: ConversationId(0),
            ids: IdSequence::new(),
            created: 0,
        };
        store.create_conversation();
        store
    }

    /// Add an empty conversation at the top of the list and focus it.
    pub fn create_conversation(&mut self) -> ConversationId {
        self.created += 1;
        let id = self.ids.next_conversation();
        let conversation = Conversation::new(id, format!("Conversation {}", self.created));
        self.conversations.insert(0, Arc::new(conversation));
        self.active = id;
        id
    }

    pub fn conversations(&self) -> &[Arc<Conversation>] {
        &self.conversations
    }

    pub fn get(&self, id: ConversationId) -> Option<&Arc<Conversation>> {
        self.conversations.iter().find(|conversation| conversation.id == id)
    }

    pub fn active_id(&self) -> ConversationId {
        self.active
    }

    pub fn active(&self) -> &Arc<Conversation> {
        // The list is never empty: removing the last conversation creates a new one.
        self.get(self.active).unwrap_or(&self.conversations[0])
    }

    pub fn set_active(&mut self, id: ConversationId) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.active = id;
        true
    }

    /// Drop a conversation. Events for it that arrive later are ignored.
    pub fn remove_conversation(&mut self, id: ConversationId) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|conversation| conversation.id != id);
        if self.conversations.len() == before {
            return false;
        }
        if self.conversations.is_empty() {
            self.create_conversation();
        } else if self.active == id {
            self.active = self.conversations[0].id;
        }
        true
    }

    fn update<F>(&mut self, id: ConversationId, update: F) -> bool
    where
        F: FnOnce(&Conversation) -> Option<Conversation>,
    {
        let Some(index) = self
            .conversations
            .iter()
            .position(|conversation| conversation.id == id)
        else {
            return false;
        };
        match update(&self.conversations[index]) {
            Some(next) => {
                self.conversations[index] = Arc::new(next);
                true
            }
            None => false,
        }
    }

    /// Append `message`. A user message also names an untitled conversation.
    pub fn append(&mut self, conversation_id: ConversationId, message: Message) -> bool {
        let title_source = message.role.is_user().then(|| message.content.clone());
        let appended = self.update(conversation_id, |conversation| {
            let mut next = conversation.clone();
            next.messages.push(Arc::new(message));
            Some(next)
        });
        if let (true, Some(text)) = (appended, title_source) {
            self.set_title_if_empty(conversation_id, &text);
        }
        appended
    }

    /// Replace one message's content with `f(content)`. Unknown ids are a no-op.
    pub fn mutate<F>(&mut self, conversation_id: ConversationId, message_id: MessageId, f: F) -> bool
    where
        F: FnOnce(&str) -> String,
    {
        self.update(conversation_id, |conversation| {
            let index = conversation
                .messages
                .iter()
                .position(|message| message.id == message_id)?;
            let mut next = conversation.clone();
            let content = f(&next.messages[index].content);
            next.messages[index] = Arc::new(next.messages[index].with_content(content));
            Some(next)
        })
    }

    pub fn remove(&mut self, conversation_id: ConversationId, message_id: MessageId) -> bool {
        self.update(conversation_id, |conversation| {
            conversation.message(message_id)?;
            let mut next = conversation.clone();
            next.messages.retain(|message| message.id != message_id);
            Some(next)
        })
    }

    /// Name the conversation after `text` unless a user message already did.
    pub fn set_title_if_empty(&mut self, conversation_id: ConversationId, text: &str) -> bool {
        self.update(conversation_id, |conversation| {
            if conversation.titled {
                return None;
            }
            let mut next = conversation.clone();
            next.title = derive_title(text);
            next.titled = true;
            Some(next)
        })
    }

    /// Empty a conversation so its next user message names it again.
    ///
    /// An in-flight session keeps running; its remaining events find no
    /// placeholder and are dropped.
    pub fn clear(&mut self, conversation_id: ConversationId) -> bool {
        self.update(conversation_id, |conversation| {
            let mut next = conversation.clone();
            next.messages.clear();
            next.title = CLEARED_CONVERSATION_TITLE.to_string();
            next.titled = false;
            next.streaming = None;
            Some(next)
        })
    }

    /// Record a user turn and its empty assistant placeholder.
    ///
    /// Returns the placeholder to stream into and the request messages:
    /// system prompt, prior transcript, then the new user message. Prior
    /// messages with no content are not sent.
    pub fn begin_send(
        &mut self,
        conversation_id: ConversationId,
        text: &str,
        config: &Config,
    ) -> Result<PreparedSend, SendError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(SendError::EmptyMessage);
        }
        let conversation = self
            .get(conversation_id)
            .ok_or(SendError::UnknownConversation(conversation_id))?;
        if conversation.is_streaming() {
            return Err(SendError::ConversationBusy(conversation_id));
        }

        let mut api_messages = Vec::with_capacity(conversation.messages.len() + 2);
        api_messages.push(ChatMessage::new(Role::System, config.effective_system_prompt()));
        api_messages.extend(
            conversation
                .messages
                .iter()
                .filter(|message| !message.content.is_empty())
                .map(|message| ChatMessage::new(message.role, message.content.clone())),
        );
        api_messages.push(ChatMessage::new(Role::User, content));

        let user_message = Message::new(self.ids.next_message(), Role::User, content);
        let placeholder_id = self.ids.next_message();
        self.append(conversation_id, user_message);
        self.append(conversation_id, Message::placeholder(placeholder_id));
        self.update(conversation_id, |conversation| {
            let mut next = conversation.clone();
            next.streaming = Some(placeholder_id);
            Some(next)
        });

        Ok(PreparedSend {
            target: StreamTarget {
                conversation_id,
                message_id: placeholder_id,
            },
            api_messages,
        })
    }

    fn release_stream(&mut self, target: StreamTarget) {
        self.update(target.conversation_id, |conversation| {
            if conversation.streaming != Some(target.message_id) {
                return None;
            }
            let mut next = conversation.clone();
            next.streaming = None;
            Some(next)
        });
    }

    pub fn apply_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Delta { target, text } => {
                self.mutate(target.conversation_id, target.message_id, |content| {
                    let mut appended = String::with_capacity(content.len() + text.len());
                    appended.push_str(content);
                    appended.push_str(text);
                    appended
                });
            }
            StreamEvent::Completed { target } | StreamEvent::Aborted { target } => {
                self.release_stream(*target);
            }
            StreamEvent::Failed { target, error } => {
                debug!(
                    conversation = %target.conversation_id,
                    message = %target.message_id,
                    %error,
                    "Discarding assistant placeholder after failed stream"
                );
                self.remove(target.conversation_id, target.message_id);
                self.release_stream(*target);
            }
        }
    }
}

impl StreamSubscriber for ConversationStore {
    fn on_event(&mut self, event: StreamEvent) {
        self.apply_event(&event);
    }
}
