use serde::{Deserialize, Serialize};

/// One step of a preset response body.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetChunk {
    /// Raw body text delivered as one chunk.
    #[serde(rename = "text")]
    Text(String),
    /// The connection breaks while reading the body.
    #[serde(rename = "fail")]
    Fail,
}

/// The preset reply for one request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetReply {
    /// The HTTP status the provider answers with.
    pub status: u16,
    /// Body chunks, delivered in order after a successful status.
    pub chunks: Vec<PresetChunk>,
}

impl PresetReply {
    /// Creates a successful reply with raw body chunks.
    #[inline]
    pub fn with_chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            status: 200,
            chunks: chunks
                .into_iter()
                .map(|c| PresetChunk::Text(c.into()))
                .collect(),
        }
    }

    /// Creates a successful reply that streams one well-formed frame per
    /// fragment, followed by the done sentinel.
    pub fn with_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut chunks: Vec<String> = fragments
            .into_iter()
            .map(|fragment| frame(fragment.as_ref()))
            .collect();
        chunks.push("data: [DONE]\n".to_owned());
        Self::with_chunks(chunks)
    }

    /// Creates a reply that fails with the given status.
    #[inline]
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            chunks: vec![PresetChunk::Text(
                r#"{"error":{"message":"preset failure"}}"#.to_owned(),
            )],
        }
    }

    /// Breaks the connection after the chunks added so far.
    #[inline]
    pub fn then_fail(mut self) -> Self {
        self.chunks.push(PresetChunk::Fail);
        self
    }
}

/// Formats a single well-formed `data:` line carrying `content`.
pub fn frame(content: &str) -> String {
    let record = serde_json::json!({
        "choices": [{ "delta": { "content": content } }]
    });
    format!("data: {record}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize() {
        let reply = PresetReply::with_fragments(["• Sow ", "early"]).then_fail();

        let serialized = serde_json::to_string(&reply).unwrap();
        let deserialized: PresetReply =
            serde_json::from_str(&serialized).unwrap();

        assert_eq!(reply, deserialized);
        assert_eq!(deserialized.chunks.len(), 4);
        assert_eq!(deserialized.chunks[3], PresetChunk::Fail);
    }

    #[test]
    fn test_frame() {
        assert_eq!(
            frame("Hi"),
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n"
        );
    }
}
