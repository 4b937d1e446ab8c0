//! Already-parsed protocol messages exchanged with the transport.
//!
//! The transport owns the wire grammar. By the time a [`Message`] reaches the
//! core its subject, optional headers and payload are split out, and the
//! header status line (if any) has been reduced to a numeric code plus
//! description.

use bytes::Bytes;
use std::collections::BTreeMap;

use crate::constants::NO_RESPONDERS_STATUS;
use crate::error::{ErrorCode, NatsError};

/// Message headers, including the optional status line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    status: Option<u16>,
    description: String,
    entries: BTreeMap<String, Vec<String>>,
}

impl Headers {
    /// Empty headers without a status.
    pub fn new() -> Self {
        Self::default()
    }

    /// Headers carrying only a status line.
    pub fn with_status(status: u16, description: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            description: description.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Append a value for `key`.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.entry(key.into()).or_default().push(value.into());
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Status code, if the message carried one.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Status description text.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// True when the status code signals a failure (>= 300).
    pub fn has_error(&self) -> bool {
        self.status.is_some_and(|code| code >= 300)
    }

    /// Error implied by the status, if any.
    ///
    /// 503 maps to `NoResponders`; any other failure status maps to
    /// `RequestError` carrying the status text.
    pub fn status_error(&self) -> Option<NatsError> {
        if !self.has_error() {
            return None;
        }
        let code = self.status?;
        if code == NO_RESPONDERS_STATUS {
            return Some(NatsError::for_code(ErrorCode::NoResponders));
        }
        let text = if self.description.is_empty() {
            code.to_string()
        } else {
            format!("{} {}", code, self.description)
        };
        Some(NatsError::new(ErrorCode::RequestError, text))
    }
}

/// An inbound application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Destination subject.
    pub subject: String,
    /// Reply subject, if the sender expects one.
    pub reply: Option<String>,
    /// Headers, if present.
    pub headers: Option<Headers>,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Message {
    /// Message without headers or reply subject.
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            headers: None,
            payload: payload.into(),
        }
    }

    /// Attach headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Attach a reply subject.
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Error implied by the header status, if any.
    pub fn status_error(&self) -> Option<NatsError> {
        self.headers.as_ref().and_then(Headers::status_error)
    }

    /// Deserialize the payload as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NatsError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Outbound protocol operation handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Publish a message.
    Publish {
        /// Destination subject.
        subject: String,
        /// Reply subject.
        reply: Option<String>,
        /// Optional headers.
        headers: Option<Headers>,
        /// Payload bytes.
        payload: Bytes,
    },
    /// Subscribe to a subject (wildcards allowed).
    Subscribe {
        /// Subject filter.
        subject: String,
        /// Subscription id.
        sid: u64,
    },
    /// Remove a subscription.
    Unsubscribe {
        /// Subscription id.
        sid: u64,
    },
}

/// Reject empty subjects and subjects containing whitespace.
pub fn validate_subject(subject: &str) -> Result<(), NatsError> {
    if subject.is_empty() || subject.chars().any(char::is_whitespace) {
        return Err(NatsError::new(
            ErrorCode::BadSubject,
            format!("{}: {:?}", ErrorCode::BadSubject, subject),
        ));
    }
    Ok(())
}
