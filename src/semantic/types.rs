use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::semantic::preprocess::{compose_record_text, join_record_fields};

/// An embedding vector. Shared so cache hits and fan-out never copy floats.
pub type Embedding = Arc<[f32]>;

/// A record to be ranked. Owned by the caller; read-only here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub location: String,
    /// Previously stored embedding, possibly from an older provider version
    #[serde(
        default,
        alias = "embedding",
        deserialize_with = "deserialize_vector",
        skip_serializing_if = "Option::is_none"
    )]
    pub cached_vector: Option<Vec<f32>>,
}

fn deserialize_vector<'de, D>(deserializer: D) -> Result<Option<Vec<f32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<Vec<f32>> = Option::deserialize(deserializer)?;
    Ok(v.filter(|v| !v.is_empty()))
}

impl CandidateRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.cached_vector = Some(vector).filter(|v| !v.is_empty());
        self
    }

    /// Text sent to the embedding provider (truncated).
    pub fn text(&self) -> String {
        compose_record_text(&self.fields())
    }

    /// Full, untruncated text used for keyword extraction.
    pub fn keyword_text(&self) -> String {
        join_record_fields(&self.fields())
    }

    fn fields(&self) -> [&str; 4] {
        [
            self.title.as_str(),
            self.description.as_str(),
            self.category.as_str(),
            self.location.as_str(),
        ]
    }
}

/// What to rank candidates against.
#[derive(Debug, Clone, Default)]
pub struct RankQuery {
    pub text: String,
    pub category: Option<String>,
    /// Precomputed query vector; skips embedding the query when set
    pub vector: Option<Embedding>,
}

impl RankQuery {
    /// Free-text query.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Query built from an existing record ("find similar to this").
    ///
    /// The stored vector is only a hint: ranking falls back to embedding the
    /// text when it is unusable or from a different model.
    pub fn from_record(record: &CandidateRecord) -> Self {
        let category = Some(record.category.clone()).filter(|c| !c.trim().is_empty());
        Self {
            text: record.keyword_text(),
            category,
            vector: record.cached_vector.as_deref().map(Embedding::from),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_vector(mut self, vector: Embedding) -> Self {
        self.vector = Some(vector);
        self
    }
}

/// Per-call overrides. Unset fields fall back to [`crate::config::EngineConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RankOptions {
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
    pub timeout: Option<Duration>,
}

impl RankOptions {
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The three sub-scores behind a final score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScoreComponents {
    /// `(cosine + 1) / 2`, or 0 when no usable vector was available
    pub vector: f32,
    /// Jaccard similarity of keyword sets
    pub keyword: f32,
    /// 1.0 on category match, else 0.0
    pub category: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMatch {
    pub candidate_id: String,
    pub score: f32,
    pub components: ScoreComponents,
}

/// Result of a successful `rank` call.
#[derive(Debug, Clone, Serialize)]
pub struct RankResponse {
    pub matches: Vec<ScoredMatch>,
    /// True when at least one candidate's vector could not be resolved
    pub degraded: bool,
    /// Ids whose vector component fell back to 0, ascending
    pub unresolved: Vec<String>,
    #[serde(skip)]
    pub elapsed: Duration,
}
