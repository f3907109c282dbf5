//! Exchange - the unit of work flowing through a pipeline
//!
//! An exchange always has exactly one input message, an optional output
//! message, free-form properties and an exception slot holding at most one
//! processing error. Once the slot is populated, forward routing halts until
//! the designated error-handling step clears or replaces it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::ProcessingError;
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePattern {
    /// One-way: no reply expected
    InOnly,
    /// Request-reply: the caller waits for the output
    InOut,
}

/// Lets an enclosing route abandon an in-flight exchange from another task
#[derive(Debug, Clone)]
pub struct AbandonHandle {
    flag: Arc<AtomicBool>,
}

impl AbandonHandle {
    /// Mark the exchange abandoned; pending steps skip it
    pub fn abandon(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_abandoned(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct Exchange {
    id: String,
    pattern: ExchangePattern,
    created_at: DateTime<Utc>,
    from_endpoint: Option<String>,
    input: Message,
    output: Option<Message>,
    properties: HashMap<String, Value>,
    exception: Option<ProcessingError>,
    abandoned: Arc<AtomicBool>,
}

impl Exchange {
    pub fn new(pattern: ExchangePattern, input: Message) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pattern,
            created_at: Utc::now(),
            from_endpoint: None,
            input,
            output: None,
            properties: HashMap::new(),
            exception: None,
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// One-way exchange around `input`
    pub fn in_only(input: Message) -> Self {
        Self::new(ExchangePattern::InOnly, input)
    }

    /// Request-reply exchange around `input`
    pub fn in_out(input: Message) -> Self {
        Self::new(ExchangePattern::InOut, input)
    }

    /// Unique id, shared with copies
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pattern(&self) -> ExchangePattern {
        self.pattern
    }

    /// Switch between one-way and request-reply before dispatch
    pub fn set_pattern(&mut self, pattern: ExchangePattern) {
        self.pattern = pattern;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// URI of the consumer endpoint that created this exchange, if any
    pub fn from_endpoint(&self) -> Option<&str> {
        self.from_endpoint.as_deref()
    }

    pub fn set_from_endpoint(&mut self, uri: impl Into<String>) {
        self.from_endpoint = Some(uri.into());
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    pub fn input(&self) -> &Message {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut Message {
        &mut self.input
    }

    /// Output set by the last step that produced one
    pub fn output(&self) -> Option<&Message> {
        self.output.as_ref()
    }

    pub fn output_mut(&mut self) -> Option<&mut Message> {
        self.output.as_mut()
    }

    pub fn set_output(&mut self, message: Message) {
        self.output = Some(message);
    }

    /// Remove the output, falling back to the input as current message
    pub fn take_output(&mut self) -> Option<Message> {
        self.output.take()
    }

    /// The latest message: the output if a step produced one, else the input
    pub fn current(&self) -> &Message {
        self.output.as_ref().unwrap_or(&self.input)
    }

    /// Tagged result of the exchange so far
    pub fn outcome(&self) -> Result<&Message, &ProcessingError> {
        match &self.exception {
            Some(err) => Err(err),
            None => Ok(self.current()),
        }
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    /// Exchange-scoped property, not carried on the message
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    // ------------------------------------------------------------------------
    // Exception slot
    // ------------------------------------------------------------------------

    /// The error in the slot, if processing failed
    pub fn exception(&self) -> Option<&ProcessingError> {
        self.exception.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.exception.is_some()
    }

    /// Install an error into an empty slot.
    ///
    /// Returns `false` and keeps the existing error if the slot is already
    /// populated; only the designated error handler may replace it.
    pub fn set_exception(&mut self, error: ProcessingError) -> bool {
        if let Some(existing) = &self.exception {
            debug!(
                exchange_id = %self.id,
                existing = %existing,
                ignored = %error,
                "Exception slot already populated, keeping original error"
            );
            return false;
        }
        self.exception = Some(error);
        true
    }

    /// Overwrite the slot. Reserved for the error-handling step.
    pub fn replace_exception(&mut self, error: ProcessingError) -> Option<ProcessingError> {
        self.exception.replace(error)
    }

    /// Clear the slot. Reserved for the error-handling step.
    pub fn take_exception(&mut self) -> Option<ProcessingError> {
        self.exception.take()
    }

    // ------------------------------------------------------------------------
    // Abandonment and copies
    // ------------------------------------------------------------------------

    /// Shareable handle onto this exchange's abandon flag.
    ///
    /// Copies made with [`Exchange::copy`] get their own flag.
    pub fn abandon_handle(&self) -> AbandonHandle {
        AbandonHandle {
            flag: self.abandoned.clone(),
        }
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Independent copy with the same id, for hand-off to another consumer
    pub fn copy(&self) -> Self {
        Self {
            id: self.id.clone(),
            pattern: self.pattern,
            created_at: self.created_at,
            from_endpoint: self.from_endpoint.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            properties: self.properties.clone(),
            exception: self.exception.clone(),
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Take over the results of a copy that was processed elsewhere
    pub fn copy_results_from(&mut self, other: Exchange) {
        self.input = other.input;
        self.output = other.output;
        self.properties = other.properties;
        self.exception = other.exception;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_new_exchange_defaults() {
        let exchange = Exchange::in_only(Message::new("hello"));
        assert_eq!(exchange.pattern(), ExchangePattern::InOnly);
        assert!(exchange.output().is_none());
        assert!(exchange.exception().is_none());
        assert!(!exchange.id().is_empty());
        assert_eq!(exchange.current().body().as_text().as_deref(), Some("hello"));
    }

    #[test]
    fn test_set_exception_keeps_first_error() {
        let mut exchange = Exchange::in_only(Message::default());
        assert!(exchange.set_exception(ProcessingError::illegal_state("first")));
        assert!(!exchange.set_exception(ProcessingError::io("second")));

        let err = exchange.exception().unwrap();
        assert_eq!(err.kind, ErrorKind::IllegalState);
        assert_eq!(err.message, "first");
    }

    #[test]
    fn test_replace_and_take_exception() {
        let mut exchange = Exchange::in_only(Message::default());
        exchange.set_exception(ProcessingError::io("disk"));

        let previous = exchange.replace_exception(ProcessingError::timeout("late"));
        assert_eq!(previous.unwrap().kind, ErrorKind::Io);
        assert_eq!(exchange.exception().unwrap().kind, ErrorKind::Timeout);

        assert!(exchange.take_exception().is_some());
        assert!(!exchange.is_failed());
    }

    #[test]
    fn test_outcome_reflects_current_message() {
        let mut exchange = Exchange::in_out(Message::new("in"));
        exchange.set_output(Message::new("out"));
        assert_eq!(
            exchange.outcome().unwrap().body().as_text().as_deref(),
            Some("out")
        );

        exchange.set_exception(ProcessingError::illegal_argument("bad"));
        assert!(exchange.outcome().is_err());
    }

    #[test]
    fn test_copy_has_independent_abandon_flag() {
        let exchange = Exchange::in_only(Message::new("x"));
        let copy = exchange.copy();
        exchange.abandon_handle().abandon();

        assert!(exchange.is_abandoned());
        assert!(!copy.is_abandoned());
        assert_eq!(copy.id(), exchange.id());
    }

    #[test]
    fn test_copy_results_from() {
        let mut exchange = Exchange::in_out(Message::new("request"));
        let mut remote = exchange.copy();
        remote.set_output(Message::new("reply"));
        remote.set_property("handled-by", "worker-1");

        exchange.copy_results_from(remote);
        assert_eq!(exchange.output().unwrap().body().as_text().as_deref(), Some("reply"));
        assert_eq!(exchange.property("handled-by").unwrap(), "worker-1");
    }
}
