use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{
    CategoryConfig, ChatProcessingConfig, KnowledgeRetrievalConfig, MessageVectorKind,
    RetrievalConfig, RetrievalConfigError, ScriptLibraryConfig, VectorSearchConfig,
};

/// Named bundles of thresholds and limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// High precision, low recall
    Conservative,
    #[default]
    Balanced,
    /// Low precision, high recall
    Liberal,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::Conservative, Preset::Balanced, Preset::Liberal];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Conservative => "conservative",
            Preset::Balanced => "balanced",
            Preset::Liberal => "liberal",
        }
    }

    /// A fresh copy of the preset's values
    #[inline]
    pub fn config(self) -> RetrievalConfig {
        match self {
            Preset::Balanced => balanced(),
            Preset::Conservative => RetrievalConfig {
                vector_search: VectorSearchConfig {
                    similarity_threshold: 0.8,
                    limit: 3,
                    ..balanced().vector_search
                },
                knowledge_retrieval: KnowledgeRetrievalConfig {
                    personality_matching: category(0.3, 1),
                    abbreviation_recognition: category(0.4, 5),
                    script_library: ScriptLibraryConfig {
                        similarity_threshold: 0.6,
                        limit: 3,
                        force_use_threshold: 0.8,
                    },
                    general_knowledge: category(0.6, 3),
                },
                ..balanced()
            },
            Preset::Liberal => RetrievalConfig {
                vector_search: VectorSearchConfig {
                    similarity_threshold: 0.4,
                    limit: 10,
                    ..balanced().vector_search
                },
                knowledge_retrieval: KnowledgeRetrievalConfig {
                    personality_matching: category(0.1, 2),
                    abbreviation_recognition: category(0.2, 15),
                    script_library: ScriptLibraryConfig {
                        similarity_threshold: 0.3,
                        limit: 8,
                        force_use_threshold: 0.6,
                    },
                    general_knowledge: category(0.3, 8),
                },
                ..balanced()
            },
        }
    }
}

const fn category(similarity_threshold: f64, limit: usize) -> CategoryConfig {
    CategoryConfig {
        similarity_threshold,
        limit,
    }
}

fn balanced() -> RetrievalConfig {
    RetrievalConfig {
        vector_search: VectorSearchConfig {
            similarity_threshold: 0.6,
            limit: 5,
            vector_type: MessageVectorKind::Message,
            include_context: false,
        },
        knowledge_retrieval: KnowledgeRetrievalConfig {
            // Loose on purpose: looking for any related trait
            personality_matching: category(0.2, 1),
            abbreviation_recognition: category(0.3, 10),
            script_library: ScriptLibraryConfig {
                similarity_threshold: 0.4,
                limit: 5,
                force_use_threshold: 0.7,
            },
            general_knowledge: category(0.5, 5),
        },
        chat_processing: ChatProcessingConfig {
            message_merge_seconds: 30,
            topic_trigger_hours: 24,
            history_limit: 10,
            batch_size: 10,
            embedding_delay_ms: 100,
        },
    }
}

impl fmt::Display for Preset {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = RetrievalConfigError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(Preset::Conservative),
            "balanced" => Ok(Preset::Balanced),
            "liberal" => Ok(Preset::Liberal),
            _ => Err(RetrievalConfigError::UnknownPreset(s.to_string())),
        }
    }
}
