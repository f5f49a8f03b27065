//! Retrieval configuration
//!
//! Thresholds and result limits per knowledge category, named presets and the
//! process-wide holder of the active configuration.


pub mod presets;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use presets::Preset;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetrievalConfigError {
    #[error("Unknown knowledge category: {0}")]
    UnknownCategory(String),
    #[error("Unknown preset: {0} (must be 'conservative', 'balanced' or 'liberal')")]
    UnknownPreset(String),
    #[error("Invalid similarity threshold for {section}: {value} (must be between 0 and 1)")]
    InvalidThreshold { section: &'static str, value: f64 },
    #[error("Invalid limit for {section}: {value} (must not be negative)")]
    NegativeLimit { section: &'static str, value: i64 },
    #[error(
        "Force-use threshold ({force}) must not be below the script library similarity threshold ({base})"
    )]
    ForceThresholdBelowBase { force: f64, base: f64 },
}

/// Knowledge categories with their own threshold and limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeCategory {
    PersonalityMatching,
    AbbreviationRecognition,
    ScriptLibrary,
    GeneralKnowledge,
}

impl KnowledgeCategory {
    pub const ALL: [KnowledgeCategory; 4] = [
        KnowledgeCategory::PersonalityMatching,
        KnowledgeCategory::AbbreviationRecognition,
        KnowledgeCategory::ScriptLibrary,
        KnowledgeCategory::GeneralKnowledge,
    ];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            KnowledgeCategory::PersonalityMatching => "personality_matching",
            KnowledgeCategory::AbbreviationRecognition => "abbreviation_recognition",
            KnowledgeCategory::ScriptLibrary => "script_library",
            KnowledgeCategory::GeneralKnowledge => "general_knowledge",
        }
    }
}

impl fmt::Display for KnowledgeCategory {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeCategory {
    type Err = RetrievalConfigError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "personality_matching" | "personality" => Ok(KnowledgeCategory::PersonalityMatching),
            "abbreviation_recognition" | "abbreviation" => {
                Ok(KnowledgeCategory::AbbreviationRecognition)
            }
            "script_library" | "script" => Ok(KnowledgeCategory::ScriptLibrary),
            "general_knowledge" | "general" => Ok(KnowledgeCategory::GeneralKnowledge),
            _ => Err(RetrievalConfigError::UnknownCategory(s.to_string())),
        }
    }
}

/// Threshold and result count for one knowledge category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub similarity_threshold: f64,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScriptLibraryConfig {
    pub similarity_threshold: f64,
    pub limit: usize,
    /// Matches at or above this score are meant to be used verbatim
    pub force_use_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRetrievalConfig {
    pub personality_matching: CategoryConfig,
    pub abbreviation_recognition: CategoryConfig,
    pub script_library: ScriptLibraryConfig,
    pub general_knowledge: CategoryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageVectorKind {
    Message,
    Context,
}

impl MessageVectorKind {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            MessageVectorKind::Message => "message",
            MessageVectorKind::Context => "context",
        }
    }
}

/// Defaults for searches over chat message vectors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchConfig {
    pub similarity_threshold: f64,
    pub limit: usize,
    pub vector_type: MessageVectorKind,
    pub include_context: bool,
}

impl VectorSearchConfig {
    /// Whether a search over `vector_type` falls under this section
    #[inline]
    pub fn covers(&self, vector_type: &str) -> bool {
        vector_type == self.vector_type.as_str()
            || (self.include_context && vector_type == MessageVectorKind::Context.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatProcessingConfig {
    pub message_merge_seconds: u64,
    pub topic_trigger_hours: u64,
    pub history_limit: usize,
    pub batch_size: usize,
    pub embedding_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub vector_search: VectorSearchConfig,
    pub knowledge_retrieval: KnowledgeRetrievalConfig,
    pub chat_processing: ChatProcessingConfig,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Preset::Balanced.config()
    }
}

impl RetrievalConfig {
    /// Threshold and limit for a knowledge category
    #[inline]
    pub fn category(&self, category: KnowledgeCategory) -> CategoryConfig {
        let knowledge = &self.knowledge_retrieval;
        match category {
            KnowledgeCategory::PersonalityMatching => knowledge.personality_matching,
            KnowledgeCategory::AbbreviationRecognition => knowledge.abbreviation_recognition,
            KnowledgeCategory::ScriptLibrary => CategoryConfig {
                similarity_threshold: knowledge.script_library.similarity_threshold,
                limit: knowledge.script_library.limit,
            },
            KnowledgeCategory::GeneralKnowledge => knowledge.general_knowledge,
        }
    }

    /// Only the script library carries a force-use bar
    #[inline]
    pub fn force_use_threshold(&self, category: KnowledgeCategory) -> Option<f64> {
        match category {
            KnowledgeCategory::ScriptLibrary => {
                Some(self.knowledge_retrieval.script_library.force_use_threshold)
            }
            _ => None,
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), RetrievalConfigError> {
        check_threshold("vector_search", self.vector_search.similarity_threshold)?;

        let knowledge = &self.knowledge_retrieval;
        check_threshold(
            "personality_matching",
            knowledge.personality_matching.similarity_threshold,
        )?;
        check_threshold(
            "abbreviation_recognition",
            knowledge.abbreviation_recognition.similarity_threshold,
        )?;
        check_threshold(
            "script_library",
            knowledge.script_library.similarity_threshold,
        )?;
        check_threshold(
            "script_library.force_use_threshold",
            knowledge.script_library.force_use_threshold,
        )?;
        check_threshold(
            "general_knowledge",
            knowledge.general_knowledge.similarity_threshold,
        )?;

        let script = &knowledge.script_library;
        if script.force_use_threshold < script.similarity_threshold {
            return Err(RetrievalConfigError::ForceThresholdBelowBase {
                force: script.force_use_threshold,
                base: script.similarity_threshold,
            });
        }

        Ok(())
    }

    /// Merge a partial update into a copy of this config.
    ///
    /// Unspecified leaves keep their current values. The result is validated
    /// as a whole, so an invalid patch never yields a config.
    #[inline]
    pub fn merged(&self, patch: &RetrievalConfigPatch) -> Result<Self, RetrievalConfigError> {
        let mut next = *self;

        if let Some(vector_search) = &patch.vector_search {
            let target = &mut next.vector_search;
            if let Some(threshold) = vector_search.similarity_threshold {
                target.similarity_threshold = threshold;
            }
            if let Some(limit) = vector_search.limit {
                target.limit = to_limit("vector_search", limit)?;
            }
            if let Some(kind) = vector_search.vector_type {
                target.vector_type = kind;
            }
            if let Some(include) = vector_search.include_context {
                target.include_context = include;
            }
        }

        if let Some(knowledge) = &patch.knowledge_retrieval {
            let target = &mut next.knowledge_retrieval;
            if let Some(section) = &knowledge.personality_matching {
                section.apply("personality_matching", &mut target.personality_matching)?;
            }
            if let Some(section) = &knowledge.abbreviation_recognition {
                section.apply(
                    "abbreviation_recognition",
                    &mut target.abbreviation_recognition,
                )?;
            }
            if let Some(section) = &knowledge.general_knowledge {
                section.apply("general_knowledge", &mut target.general_knowledge)?;
            }
            if let Some(script) = &knowledge.script_library {
                let target = &mut target.script_library;
                if let Some(threshold) = script.similarity_threshold {
                    target.similarity_threshold = threshold;
                }
                if let Some(limit) = script.limit {
                    target.limit = to_limit("script_library", limit)?;
                }
                if let Some(force) = script.force_use_threshold {
                    target.force_use_threshold = force;
                }
            }
        }

        if let Some(chat) = &patch.chat_processing {
            let target = &mut next.chat_processing;
            if let Some(value) = chat.message_merge_seconds {
                target.message_merge_seconds = value;
            }
            if let Some(value) = chat.topic_trigger_hours {
                target.topic_trigger_hours = value;
            }
            if let Some(value) = chat.history_limit {
                target.history_limit = value;
            }
            if let Some(value) = chat.batch_size {
                target.batch_size = value;
            }
            if let Some(value) = chat.embedding_delay_ms {
                target.embedding_delay_ms = value;
            }
        }

        next.validate()?;
        Ok(next)
    }
}

fn check_threshold(section: &'static str, value: f64) -> Result<(), RetrievalConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RetrievalConfigError::InvalidThreshold { section, value })
    }
}

fn to_limit(section: &'static str, value: i64) -> Result<usize, RetrievalConfigError> {
    usize::try_from(value).map_err(|_| RetrievalConfigError::NegativeLimit { section, value })
}

/// Partial update of the active config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_search: Option<VectorSearchPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_retrieval: Option<KnowledgeRetrievalPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_processing: Option<ChatProcessingPatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VectorSearchPatch {
    pub similarity_threshold: Option<f64>,
    pub limit: Option<i64>,
    pub vector_type: Option<MessageVectorKind>,
    pub include_context: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeRetrievalPatch {
    pub personality_matching: Option<CategoryPatch>,
    pub abbreviation_recognition: Option<CategoryPatch>,
    pub script_library: Option<ScriptLibraryPatch>,
    pub general_knowledge: Option<CategoryPatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryPatch {
    pub similarity_threshold: Option<f64>,
    pub limit: Option<i64>,
}

impl CategoryPatch {
    fn apply(
        &self,
        section: &'static str,
        target: &mut CategoryConfig,
    ) -> Result<(), RetrievalConfigError> {
        if let Some(threshold) = self.similarity_threshold {
            target.similarity_threshold = threshold;
        }
        if let Some(limit) = self.limit {
            target.limit = to_limit(section, limit)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptLibraryPatch {
    pub similarity_threshold: Option<f64>,
    pub limit: Option<i64>,
    pub force_use_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatProcessingPatch {
    pub message_merge_seconds: Option<u64>,
    pub topic_trigger_hours: Option<u64>,
    pub history_limit: Option<usize>,
    pub batch_size: Option<usize>,
    pub embedding_delay_ms: Option<u64>,
}

/// Holder of the single active [`RetrievalConfig`].
///
/// Clones share the same slot. Every write swaps in a whole new value, so
/// readers only ever observe complete configs.
#[derive(Debug, Clone)]
pub struct ActiveConfig {
    slot: Arc<RwLock<Arc<RetrievalConfig>>>,
}

impl Default for ActiveConfig {
    #[inline]
    fn default() -> Self {
        Self::new(RetrievalConfig::default())
    }
}

impl ActiveConfig {
    #[inline]
    pub fn new(initial: RetrievalConfig) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    #[inline]
    pub fn from_preset(preset: Preset) -> Self {
        Self::new(preset.config())
    }

    /// Snapshot of the current config
    #[inline]
    pub fn get(&self) -> Arc<RetrievalConfig> {
        Arc::clone(&self.slot.read())
    }

    /// Merge a partial update into the active config
    #[inline]
    pub fn set(
        &self,
        patch: &RetrievalConfigPatch,
    ) -> Result<Arc<RetrievalConfig>, RetrievalConfigError> {
        // Merge under the write lock so concurrent patches cannot drop each other
        let mut slot = self.slot.write();
        let next = Arc::new(slot.merged(patch)?);
        *slot = Arc::clone(&next);
        drop(slot);

        info!("Retrieval configuration updated");
        Ok(next)
    }

    #[inline]
    pub fn load_preset(&self, preset: Preset) -> Arc<RetrievalConfig> {
        let next = Arc::new(preset.config());
        *self.slot.write() = Arc::clone(&next);
        info!("Loaded retrieval preset '{}'", preset);
        next
    }

    #[inline]
    pub fn reset(&self) -> Arc<RetrievalConfig> {
        let next = Arc::new(RetrievalConfig::default());
        *self.slot.write() = Arc::clone(&next);
        info!("Retrieval configuration reset to defaults");
        next
    }
}
