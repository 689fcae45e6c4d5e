//! Hybrid semantic ranking for lost-and-found style records.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use semrank::config::EngineConfig;
//! use semrank::semantic::{
//!     CandidateRecord, GeminiEmbedder, RankOptions, RankQuery, SearchOrchestrator,
//! };
//!
//! let config = EngineConfig::load(std::path::Path::new("semrank.yaml"))?;
//! let provider = Arc::new(GeminiEmbedder::new(&config.gemini)?);
//! let engine = SearchOrchestrator::new(provider, config)?;
//!
//! let candidates = vec![CandidateRecord::new("1").with_title("Black laptop bag")];
//! let response = engine
//!     .rank(&RankQuery::text("black bag"), &candidates, RankOptions::default())
//!     .await?;
//! for m in response.matches {
//!     println!("{} {:.3}", m.candidate_id, m.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod semantic;
#[cfg(test)]
mod tests;

pub use config::{ConfigError, EngineConfig, GeminiConfig};
pub use semantic::{
    CandidateRecord, RankError, RankOptions, RankQuery, RankResponse, ScoredMatch,
    SearchOrchestrator,
};
