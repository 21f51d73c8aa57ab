//! # Chat: the representative script-facing binding.
//!
//! Exercises the full instance machinery under one real workload: domain
//! buses adapted into script events, store access bridged off-thread, and
//! script calls validated synchronously.
//!
//! Collaborators are traits; the module owns none of the chat state itself:
//! - [`MessageStore`] persistence plus the four domain buses
//! - [`PageResolver`] existence lookups for page attachments
//! - [`AuditLog`] free-text audit entries for moderation toggles
//!
//! ## Script events
//! `"chatenabled"` (no payload), `"chatdisabled"` (reason code),
//! `"messagecreated"` (serialized message), `"messagedeleted"` (message id).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use unicode_normalization::UnicodeNormalization;

use crate::error::ModuleError;
use crate::events::EventBus;
use crate::instance::{ApplicationInstance, AsyncBridge, EventAdapter, OperationHandle};

/// Who wrote a message. Absent author marks a system message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAuthor {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

/// Rich content attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageAttachment {
    #[serde(rename_all = "camelCase")]
    ApplicationPage {
        application_id: String,
        page_id: String,
        height: u32,
    },
}

/// Why chat was disabled; carried on the `"chatdisabled"` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisabledReason {
    #[default]
    Unspecified,
    ModeratorNotPresent,
}

impl DisabledReason {
    /// Stable numeric code exposed to scripts.
    pub fn code(self) -> u8 {
        match self {
            DisabledReason::Unspecified => 0,
            DisabledReason::ModeratorNotPresent => 1,
        }
    }
}

/// One chat message, as stored and as serialized for scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub shadowbanned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<ChatAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<Box<ChatMessage>>,
    pub attachments: Vec<MessageAttachment>,
}

impl ChatMessage {
    /// True for messages the system posted itself.
    pub fn is_system(&self) -> bool {
        self.author.is_none()
    }
}

/// Persistence and fan-out contract for chat state.
///
/// The store assigns message ids and publishes on its buses as a side effect
/// of the mutating calls; the module never publishes on them directly.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn store_message(&self, message: ChatMessage) -> Result<ChatMessage, ModuleError>;
    async fn load_message(&self, id: &str) -> Result<ChatMessage, ModuleError>;
    async fn load_messages_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ChatMessage>, ModuleError>;

    async fn set_nickname(
        &self,
        address: &str,
        nickname: Option<String>,
    ) -> Result<(), ModuleError>;
    async fn nickname(&self, address: &str) -> Result<Option<String>, ModuleError>;

    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool, reason: DisabledReason);
    fn slow_mode(&self) -> bool;
    fn set_slow_mode(&self, enabled: bool);

    fn chat_enabled(&self) -> &EventBus<()>;
    fn chat_disabled(&self) -> &EventBus<DisabledReason>;
    fn message_created(&self) -> &EventBus<ChatMessage>;
    fn message_deleted(&self) -> &EventBus<String>;
}

/// Existence lookup for attachable application pages.
pub trait PageResolver: Send + Sync {
    fn page_exists(&self, application_id: &str, page_id: &str) -> bool;
}

/// Sink for moderation audit entries.
pub trait AuditLog: Send + Sync {
    fn record(&self, actor: &str, entry: &str);
}

/// Maximum page-attachment height in pixels.
pub const MAX_ATTACHMENT_HEIGHT: u32 = 512;

const NICKNAME_MIN_CHARS: usize = 3;
const NICKNAME_MAX_CHARS: usize = 16;
// Address-like prefixes scripts must not impersonate.
const RESERVED_NICKNAME_PREFIXES: [&str; 2] = ["ban_1", "ban_3"];

/// Serializes a message the way scripts receive it.
pub fn serialize_message(message: &ChatMessage) -> Value {
    serde_json::to_value(message).unwrap_or(Value::Null)
}

/// Chat binding of one application instance.
pub struct ChatModule {
    application_id: Arc<str>,
    store: Arc<dyn MessageStore>,
    pages: Arc<dyn PageResolver>,
    audit: Arc<dyn AuditLog>,
    bridge: AsyncBridge,
    adapter: Arc<EventAdapter>,
}

impl ChatModule {
    /// Wires the store's buses into the instance's adapter and starts it.
    pub fn new(
        instance: &ApplicationInstance,
        store: Arc<dyn MessageStore>,
        pages: Arc<dyn PageResolver>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let adapter = Arc::clone(instance.adapter());
        adapter.adapt_no_arg_event(store.chat_enabled(), "chatenabled");
        adapter.adapt_event(store.chat_disabled(), "chatdisabled", |reason| {
            json!({ "reason": reason.code() })
        });
        adapter.adapt_event(store.message_created(), "messagecreated", serialize_message);
        adapter.adapt_event(store.message_deleted(), "messagedeleted", |id| json!(id));
        adapter.start_or_resume();

        Self {
            application_id: instance.id().into(),
            store,
            pages,
            audit,
            bridge: instance.bridge().clone(),
            adapter,
        }
    }

    /// The instance's adapter, for listener registration.
    pub fn adapter(&self) -> &Arc<EventAdapter> {
        &self.adapter
    }

    /// Creates a user message. Content must be non-empty after trimming.
    pub async fn create_message(
        &self,
        author: ChatAuthor,
        content: &str,
        reference: Option<&str>,
    ) -> Result<ChatMessage, ModuleError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ModuleError::validation("message content is empty"));
        }
        let reference = self.resolve_reference(reference).await?;
        self.store
            .store_message(new_message(Some(author), content, reference, Vec::new()))
            .await
    }

    /// Creates an authorless system message; shadowbanning never applies.
    pub async fn create_system_message(&self, content: &str) -> Result<ChatMessage, ModuleError> {
        if content.trim().is_empty() {
            return Err(ModuleError::validation("message content is empty"));
        }
        self.store
            .store_message(new_message(None, content.trim(), None, Vec::new()))
            .await
    }

    /// Creates a message carrying an application page attachment.
    ///
    /// Unlike [`Self::create_message`], content may be empty: the attachment
    /// is the payload.
    pub async fn create_message_with_page_attachment(
        &self,
        author: ChatAuthor,
        content: &str,
        page_id: &str,
        height: u32,
        reference: Option<&str>,
    ) -> Result<ChatMessage, ModuleError> {
        if height == 0 || height > MAX_ATTACHMENT_HEIGHT {
            return Err(ModuleError::validation(format!(
                "attachment height must be between 1 and {MAX_ATTACHMENT_HEIGHT}"
            )));
        }
        if !self.pages.page_exists(&self.application_id, page_id) {
            return Err(ModuleError::not_found("page", page_id));
        }
        let reference = self.resolve_reference(reference).await?;
        let attachment = MessageAttachment::ApplicationPage {
            application_id: self.application_id.to_string(),
            page_id: page_id.to_owned(),
            height,
        };
        self.store
            .store_message(new_message(
                Some(author),
                content.trim(),
                reference,
                vec![attachment],
            ))
            .await
    }

    /// Loads messages in `[since, until]` off-thread; `transform` runs on
    /// the instance thread with the serialized, ordered result.
    pub fn get_messages<Tr>(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        transform: Tr,
    ) -> OperationHandle
    where
        Tr: FnOnce(Result<Vec<Value>, ModuleError>) + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        self.bridge.do_async(
            async move {
                let messages = store.load_messages_between(since, until).await?;
                Ok(messages.iter().map(serialize_message).collect())
            },
            transform,
        )
    }

    /// Cleans, validates and persists a nickname for `address`.
    ///
    /// `None` or a blank string clears the nickname. Returns the nickname as
    /// stored.
    pub async fn set_nickname(
        &self,
        address: &str,
        nickname: Option<String>,
    ) -> Result<Option<String>, ModuleError> {
        let cleaned = match nickname {
            None => None,
            Some(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(validate_nickname(trimmed)?)
                }
            }
        };
        self.store.set_nickname(address, cleaned.clone()).await?;
        Ok(cleaned)
    }

    /// Stored nickname for `address`, if any.
    pub async fn nickname(&self, address: &str) -> Result<Option<String>, ModuleError> {
        self.store.nickname(address).await
    }

    pub fn enabled(&self) -> bool {
        self.store.enabled()
    }

    /// Enables or disables chat and writes the audit entry.
    pub fn set_enabled(&self, enabled: bool, reason: DisabledReason) {
        self.store.set_enabled(enabled, reason);
        let entry = if enabled { "enabled chat" } else { "disabled chat" };
        self.audit.record(&self.application_id, entry);
    }

    pub fn slow_mode(&self) -> bool {
        self.store.slow_mode()
    }

    /// Toggles slow mode and writes the audit entry.
    pub fn set_slow_mode(&self, enabled: bool) {
        self.store.set_slow_mode(enabled);
        let entry = if enabled {
            "enabled chat slowmode"
        } else {
            "disabled chat slowmode"
        };
        self.audit.record(&self.application_id, entry);
    }

    /// Loads and checks a referenced message: it must exist and must not be
    /// a system message.
    async fn resolve_reference(
        &self,
        reference: Option<&str>,
    ) -> Result<Option<Box<ChatMessage>>, ModuleError> {
        let Some(id) = reference else {
            return Ok(None);
        };
        let referenced = self.store.load_message(id).await?;
        if referenced.is_system() {
            return Err(ModuleError::state(
                "system messages cannot be referenced",
            ));
        }
        Ok(Some(Box::new(referenced)))
    }
}

fn new_message(
    author: Option<ChatAuthor>,
    content: &str,
    reference: Option<Box<ChatMessage>>,
    attachments: Vec<MessageAttachment>,
) -> ChatMessage {
    ChatMessage {
        // The store assigns the definitive id.
        id: String::new(),
        created_at: Utc::now(),
        content: content.to_owned(),
        shadowbanned: false,
        author,
        reference,
        attachments,
    }
}

/// NFC-normalizes and validates an already-trimmed, non-empty nickname.
fn validate_nickname(trimmed: &str) -> Result<String, ModuleError> {
    let normalized: String = trimmed.nfc().collect();
    let chars = normalized.chars().count();
    if chars < NICKNAME_MIN_CHARS {
        return Err(ModuleError::validation(format!(
            "nickname must be at least {NICKNAME_MIN_CHARS} characters long"
        )));
    }
    if chars > NICKNAME_MAX_CHARS {
        return Err(ModuleError::validation(format!(
            "nickname must be at most {NICKNAME_MAX_CHARS} characters long"
        )));
    }
    if RESERVED_NICKNAME_PREFIXES
        .iter()
        .any(|p| normalized.starts_with(p))
    {
        return Err(ModuleError::validation(
            "nickname must not look like an address",
        ));
    }
    Ok(normalized)
}
