//! Inbound events and their projection into subscriber element types.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Event name (`event:` field), `"message"` when the server omits it.
    pub name: String,
    /// Payload (`data:` lines joined by `\n`).
    pub data: String,
    /// Last event id, if the server sent one.
    pub id: Option<String>,
    /// Reconnection delay advertised by the server.
    pub retry: Option<Duration>,
}

impl InboundEvent {
    /// Unnamed event carrying `data`.
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            name: "message".to_string(),
            data: data.into(),
            id: None,
            retry: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Decode the payload as JSON.
    pub fn read_data<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

impl From<eventsource_stream::Event> for InboundEvent {
    fn from(event: eventsource_stream::Event) -> Self {
        Self {
            name: if event.event.is_empty() {
                "message".to_string()
            } else {
                event.event
            },
            data: event.data,
            id: (!event.id.is_empty()).then_some(event.id),
            retry: event.retry,
        }
    }
}

/// Shape in which events are handed to a subscriber.
///
/// [`InboundEvent`] passes events through untouched, `String` keeps only the
/// payload and [`Json<T>`] decodes the payload with serde.
pub trait FromEvent: Sized + Send + 'static {
    fn from_event(event: InboundEvent) -> Result<Self>;
}

impl FromEvent for InboundEvent {
    fn from_event(event: InboundEvent) -> Result<Self> {
        Ok(event)
    }
}

impl FromEvent for String {
    fn from_event(event: InboundEvent) -> Result<Self> {
        Ok(event.data)
    }
}

/// Event payload decoded from JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> FromEvent for Json<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn from_event(event: InboundEvent) -> Result<Self> {
        event.read_data().map(Json)
    }
}
