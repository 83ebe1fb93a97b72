use serde::{Deserialize, Serialize};
use serde_json::json;

/// Sent as a text message ahead of each binary video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
}

impl FrameMetadata {
    pub fn to_message(&self) -> String {
        json!({
            "type": "event",
            "eventType": "frameid",
            "frameid": self.frame_id,
            "width": self.width,
            "height": self.height,
        })
        .to_string()
    }
}
