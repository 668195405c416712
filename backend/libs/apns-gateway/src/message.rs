use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Delivery category. Each purpose has its own certificate and connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// Visible alert delivery
    Standard,
    /// Silent wake for real-time signaling (PushKit)
    Voip,
}

impl Purpose {
    pub const ALL: [Purpose; 2] = [Purpose::Standard, Purpose::Voip];

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Standard => "standard",
            Purpose::Voip => "voip",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visible alert content for a standard push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub body: String,
    pub sound: String,
    pub badge: u32,
    pub content_available: bool,
}

impl Alert {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            sound: "default".to_string(),
            badge: 0,
            content_available: false,
        }
    }

    pub fn with_sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = sound.into();
        self
    }

    pub fn with_badge(mut self, badge: u32) -> Self {
        self.badge = badge;
        self
    }

    pub fn with_content_available(mut self, content_available: bool) -> Self {
        self.content_available = content_available;
        self
    }
}

/// Message body. VoIP pushes only carry custom data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    Standard {
        alert: Alert,
        extra: Map<String, Value>,
    },
    Voip {
        extra: Map<String, Value>,
    },
}

impl Payload {
    pub fn purpose(&self) -> Purpose {
        match self {
            Payload::Standard { .. } => Purpose::Standard,
            Payload::Voip { .. } => Purpose::Voip,
        }
    }

    /// Custom keys merged at the root of the JSON payload beside `aps`
    pub fn extra(&self) -> &Map<String, Value> {
        match self {
            Payload::Standard { extra, .. } | Payload::Voip { extra } => extra,
        }
    }
}

/// A notification addressed to one or more device tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    tokens: Vec<String>,
    payload: Payload,
}

impl Message {
    pub fn new(tokens: Vec<String>, payload: Payload) -> Self {
        Self { tokens, payload }
    }

    pub fn alert(token: impl Into<String>, alert: Alert, extra: Map<String, Value>) -> Self {
        Self::new(vec![token.into()], Payload::Standard { alert, extra })
    }

    pub fn voip(token: impl Into<String>, extra: Map<String, Value>) -> Self {
        Self::new(vec![token.into()], Payload::Voip { extra })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn purpose(&self) -> Purpose {
        self.payload.purpose()
    }

    /// Same payload, different recipients
    pub fn with_tokens(&self, tokens: Vec<String>) -> Self {
        Self {
            tokens,
            payload: self.payload.clone(),
        }
    }
}

/// Reason code plus human-readable explanation reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub reason: String,
    pub explanation: String,
}

impl Failure {
    pub fn new(reason: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            explanation: explanation.into(),
        }
    }
}

/// Structured outcome of one `send`.
///
/// Tokens that failed permanently land in `failed`, errors that are not tied
/// to a token land in `errors`, and tokens worth another attempt are kept to
/// build the retry message.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    message: Message,
    failed: BTreeMap<String, Failure>,
    errors: Vec<Failure>,
    retry_tokens: Vec<String>,
}

impl DeliveryResult {
    /// Empty result for `message`: every token delivered until recorded otherwise
    pub fn for_message(message: &Message) -> Self {
        Self {
            message: message.clone(),
            failed: BTreeMap::new(),
            errors: Vec::new(),
            retry_tokens: Vec::new(),
        }
    }

    pub fn record_failed(&mut self, token: impl Into<String>, failure: Failure) {
        self.failed.insert(token.into(), failure);
    }

    pub fn record_error(&mut self, failure: Failure) {
        self.errors.push(failure);
    }

    pub fn record_retry(&mut self, token: impl Into<String>) {
        let token = token.into();
        if !self.retry_tokens.contains(&token) {
            self.retry_tokens.push(token);
        }
    }

    pub fn failed(&self) -> &BTreeMap<String, Failure> {
        &self.failed
    }

    pub fn errors(&self) -> &[Failure] {
        &self.errors
    }

    pub fn needs_retry(&self) -> bool {
        !self.retry_tokens.is_empty()
    }

    /// The original message restricted to the tokens that still need sending
    pub fn retry_message(&self) -> Option<Message> {
        if self.needs_retry() {
            Some(self.message.with_tokens(self.retry_tokens.clone()))
        } else {
            None
        }
    }
}
