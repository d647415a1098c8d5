//! Events of a streamed answer.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// One server-sent event. A stream ends with exactly one [`StreamEvent::Done`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Error(String),
    Done,
}

impl StreamEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl Serialize for StreamEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(if self.is_terminal() { 1 } else { 2 }))?;
        match self {
            Self::Delta(text) => {
                map.serialize_entry("text", text)?;
                map.serialize_entry("done", &false)?;
            }
            Self::Error(error) => {
                map.serialize_entry("error", error)?;
                map.serialize_entry("done", &false)?;
            }
            Self::Done => map.serialize_entry("done", &true)?,
        }
        map.end()
    }
}
