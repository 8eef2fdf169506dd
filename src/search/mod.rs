//! Hybrid search pipeline: fusion, reranking, expansion and orchestration.
//!
//! ```text
//! Query Text
//!     │
//!     ├────────────┬──────────────┬─────────────┐
//!     ▼            ▼              ▼             ▼
//! Normalizer   Embedding      Lexical BM25   Expansion (refine)
//!     │            │              │             │
//!     │            ▼              │             │
//!     │       Vector ANN          │             │
//!     │            └──────┬───────┘             │
//!     │                   ▼                     │
//!     │        Weighted fusion + RRF ◄──────────┘
//!     │                   │
//!     │                   ▼
//!     │          Rerank (optional)
//!     │                   │
//!     └───────────────────▼
//!              Translations + graph context
//! ```

mod expand;
pub mod fusion;
mod llm;
mod orchestrator;
mod rerank;
pub mod types;

pub use expand::*;
pub use llm::*;
pub use orchestrator::*;
pub use rerank::*;
