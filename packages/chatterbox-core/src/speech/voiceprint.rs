//! Speaker-identification side channel.
//!
//! Identification is opportunistic: the pipeline buffers a bounded slice of
//! utterance audio and hands it to whatever identifier the application
//! wires in. The result only updates the conversation's speaker fields.

use async_trait::async_trait;

use crate::error::ChatterboxResult;

/// An identified speaker and their stored preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerProfile {
    /// Display name, matched against the privileged-tool owner.
    pub name: String,
    /// Opaque preference blob attached to the conversation.
    pub preferences: String,
}

/// Runtime contract for a voiceprint model.
#[async_trait]
pub trait SpeakerIdentifier: Send + Sync {
    /// Identifies the speaker of `samples`, or `None` for an unknown voice.
    async fn identify(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> ChatterboxResult<Option<SpeakerProfile>>;
}
