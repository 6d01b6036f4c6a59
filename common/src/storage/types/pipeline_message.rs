use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classification::DocumentKind;

/// One pipeline stage per queue. Any stage may run multiple replica workers;
/// conversation messages get their own partition so sourcebook backfill
/// cannot starve live chat traffic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    Cracking,
    Chunking,
    Embedding,
    MessageEmbedding,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 4] = [
        PipelineStage::Cracking,
        PipelineStage::Chunking,
        PipelineStage::Embedding,
        PipelineStage::MessageEmbedding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Cracking => "cracking",
            PipelineStage::Chunking => "chunking",
            PipelineStage::Embedding => "embedding",
            PipelineStage::MessageEmbedding => "message-embedding",
        }
    }
}

impl std::str::FromStr for PipelineStage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cracking" => Ok(PipelineStage::Cracking),
            "chunking" => Ok(PipelineStage::Chunking),
            "embedding" => Ok(PipelineStage::Embedding),
            "message-embedding" | "message_embedding" => Ok(PipelineStage::MessageEmbedding),
            other => Err(anyhow::anyhow!(
                "unknown pipeline stage '{other}'. Expected 'cracking', 'chunking', 'embedding', or 'message-embedding'."
            )),
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed queue payload, one variant per stage input.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum PipelineMessage {
    CrackDocument {
        file_path: String,
        relative_directory: String,
    },
    DocumentReadyForChunking {
        document_id: String,
        file_path: String,
        file_name: String,
        relative_directory: String,
        file_size: u64,
        page_count: u32,
        cracked_at: DateTime<Utc>,
        document_kind: DocumentKind,
        ruleset_tag: String,
    },
    ChunkReadyForEmbedding {
        chunk_id: String,
        chunk_index: u32,
        chunk_text: String,
        document_id: String,
        file_name: String,
        file_path: String,
        relative_directory: String,
        file_size: u64,
        page_count: u32,
        cracked_at: DateTime<Utc>,
    },
    ConversationMessageReadyForEmbedding {
        message_id: String,
        game_id: String,
        text: String,
        role: String,
        created_at: DateTime<Utc>,
    },
}

impl PipelineMessage {
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineMessage::CrackDocument { .. } => PipelineStage::Cracking,
            PipelineMessage::DocumentReadyForChunking { .. } => PipelineStage::Chunking,
            PipelineMessage::ChunkReadyForEmbedding { .. } => PipelineStage::Embedding,
            PipelineMessage::ConversationMessageReadyForEmbedding { .. } => {
                PipelineStage::MessageEmbedding
            }
        }
    }

    /// Short label used in spans and task rows.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineMessage::CrackDocument { .. } => "crack_document",
            PipelineMessage::DocumentReadyForChunking { .. } => "document_ready_for_chunking",
            PipelineMessage::ChunkReadyForEmbedding { .. } => "chunk_ready_for_embedding",
            PipelineMessage::ConversationMessageReadyForEmbedding { .. } => {
                "conversation_message_ready_for_embedding"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn messages_map_to_their_stage() {
        let crack = PipelineMessage::CrackDocument {
            file_path: "5e/phb.pdf".into(),
            relative_directory: "5e".into(),
        };
        assert_eq!(crack.stage(), PipelineStage::Cracking);

        let message = PipelineMessage::ConversationMessageReadyForEmbedding {
            message_id: "m1".into(),
            game_id: "g1".into(),
            text: "I attack the darkness".into(),
            role: "player".into(),
            created_at: Utc::now(),
        };
        assert_eq!(message.stage(), PipelineStage::MessageEmbedding);
    }

    #[test]
    fn stage_round_trips_through_str() {
        for stage in PipelineStage::ALL {
            assert_eq!(
                PipelineStage::from_str(stage.as_str()).expect("parse"),
                stage
            );
        }
        assert!(PipelineStage::from_str("garbage").is_err());
    }

    #[test]
    fn message_survives_serde_round_trip() {
        let message = PipelineMessage::ChunkReadyForEmbedding {
            chunk_id: "doc1_chunk_2".into(),
            chunk_index: 2,
            chunk_text: "The tavern falls silent.".into(),
            document_id: "doc1".into(),
            file_name: "phb.pdf".into(),
            file_path: "5e/phb.pdf".into(),
            relative_directory: "5e".into(),
            file_size: 2048,
            page_count: 3,
            cracked_at: Utc::now(),
        };

        let json = serde_json::to_string(&message).expect("serialize");
        let back: PipelineMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, message);
    }
}
