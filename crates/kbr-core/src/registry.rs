//! Knowledge-base registry and per-request search targets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{KbrConfig, KnowledgeBaseConfig, RetrievalConfig};
use crate::types::Modality;

/// Overrides of the global retrieval settings for one knowledge base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetOverrides {
    pub vector_threshold: Option<f32>,
    pub keyword_threshold: Option<f32>,
    pub top_k: Option<usize>,
}

/// A known knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseDescriptor {
    pub id: String,
    /// Modalities searched, sorted and deduplicated.
    pub modalities: Vec<Modality>,
    #[serde(default)]
    pub overrides: TargetOverrides,
}

impl KnowledgeBaseDescriptor {
    /// A descriptor searching every modality with global settings.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            modalities: Modality::ALL.to_vec(),
            overrides: TargetOverrides::default(),
        }
    }

    pub fn from_config(id: impl Into<String>, config: &KnowledgeBaseConfig) -> Self {
        Self::new(id)
            .with_modalities(config.modalities.iter().copied())
            .with_overrides(TargetOverrides {
                vector_threshold: config.vector_threshold,
                keyword_threshold: config.keyword_threshold,
                top_k: config.top_k,
            })
    }

    pub fn with_modalities(mut self, modalities: impl IntoIterator<Item = Modality>) -> Self {
        let mut modalities: Vec<Modality> = modalities.into_iter().collect();
        modalities.sort();
        modalities.dedup();
        self.modalities = modalities;
        self
    }

    pub fn with_overrides(mut self, overrides: TargetOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Lookup of knowledge bases by ID.
///
/// An ID the registry does not know is not an error: the search stage
/// records it and moves on.
pub trait KnowledgeBaseRegistry: Send + Sync {
    fn lookup(&self, id: &str) -> Option<KnowledgeBaseDescriptor>;
}

/// In-memory registry.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    entries: BTreeMap<String, KnowledgeBaseDescriptor>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of every knowledge base listed in the configuration.
    pub fn from_config(config: &KbrConfig) -> Self {
        let mut registry = Self::new();
        for (id, kb) in &config.knowledge_bases {
            registry.insert(KnowledgeBaseDescriptor::from_config(id.clone(), kb));
        }
        registry
    }

    pub fn insert(&mut self, descriptor: KnowledgeBaseDescriptor) {
        self.entries.insert(descriptor.id.clone(), descriptor);
    }

    pub fn with(mut self, descriptor: KnowledgeBaseDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl KnowledgeBaseRegistry for StaticRegistry {
    fn lookup(&self, id: &str) -> Option<KnowledgeBaseDescriptor> {
        self.entries.get(id).cloned()
    }
}

// ============================================================================
// SearchTarget
// ============================================================================

/// One knowledge base to search with its effective settings. Built once per
/// request and never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTarget {
    pub knowledge_base_id: String,
    pub modalities: Vec<Modality>,
    pub vector_threshold: f32,
    pub keyword_threshold: f32,
    pub top_k: usize,
}

impl SearchTarget {
    /// Layer the descriptor's overrides on global settings.
    pub fn resolve(
        id: &str,
        global: &RetrievalConfig,
        descriptor: &KnowledgeBaseDescriptor,
    ) -> Self {
        let mut target = Self {
            knowledge_base_id: id.to_string(),
            modalities: descriptor.modalities.clone(),
            vector_threshold: global.vector_threshold,
            keyword_threshold: global.keyword_threshold,
            top_k: global.per_target_top_k,
        };

        let overrides = &descriptor.overrides;
        if let Some(t) = overrides.vector_threshold {
            debug!("Knowledge base override: {}.vectorThreshold = {}", id, t);
            target.vector_threshold = t;
        }
        if let Some(t) = overrides.keyword_threshold {
            debug!("Knowledge base override: {}.keywordThreshold = {}", id, t);
            target.keyword_threshold = t;
        }
        if let Some(k) = overrides.top_k {
            debug!("Knowledge base override: {}.topK = {}", id, k);
            target.top_k = k;
        }
        target
    }

    pub fn threshold_for(&self, modality: Modality) -> f32 {
        match modality {
            Modality::Vector => self.vector_threshold,
            Modality::Keyword => self.keyword_threshold,
        }
    }
}
