//! Side-channel knowledge-graph context.
//!
//! The resolver runs in parallel with the main pipeline and merges late: it
//! may attach related entities to the response and raise the scores of
//! matching ayahs. It never blocks the response beyond its own short
//! deadline, and failures leave the response untouched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::search::fusion::sort_fused;
use crate::search::types::{AyahBoost, AyahHit, GraphContext, Scored};

const GRAPH_DEADLINE: Duration = Duration::from_secs(3);

/// Knowledge-graph lookup seam.
#[async_trait]
pub trait GraphResolver: Send + Sync {
    async fn related(&self, query: &str) -> Result<GraphContext>;
}

/// Deadline-guarded wrapper around an optional resolver.
pub struct GraphContextFetcher {
    resolver: Option<Arc<dyn GraphResolver>>,
    deadline: Duration,
}

impl GraphContextFetcher {
    pub fn new(resolver: Option<Arc<dyn GraphResolver>>) -> Self {
        Self {
            resolver,
            deadline: GRAPH_DEADLINE,
        }
    }

    #[cfg(test)]
    pub fn with_deadline(resolver: Option<Arc<dyn GraphResolver>>, deadline: Duration) -> Self {
        Self { resolver, deadline }
    }

    /// Fetch related context; `None` on absence, failure or deadline.
    pub async fn fetch(&self, query: &str) -> Option<GraphContext> {
        let resolver = self.resolver.as_ref()?;
        match tokio::time::timeout(self.deadline, resolver.related(query)).await {
            Ok(Ok(context)) => Some(context),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "graph context lookup failed");
                None
            }
            Err(_) => {
                tracing::debug!("graph context lookup timed out");
                None
            }
        }
    }
}

/// Raise the scores of ayahs named in the boost list and restore ordering.
pub fn apply_ayah_boosts(ayahs: &mut Vec<Scored<AyahHit>>, boosts: &[AyahBoost]) {
    if boosts.is_empty() {
        return;
    }
    for scored in ayahs.iter_mut() {
        for boost in boosts {
            if scored.hit.surah_number == boost.surah_number
                && scored.hit.ayah_number == boost.ayah_number
            {
                scored.fused_score += boost.boost;
            }
        }
    }
    sort_fused(ayahs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KashshafError;

    struct SlowResolver;

    #[async_trait]
    impl GraphResolver for SlowResolver {
        async fn related(&self, _query: &str) -> Result<GraphContext> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(GraphContext::default())
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl GraphResolver for FailingResolver {
        async fn related(&self, _query: &str) -> Result<GraphContext> {
            Err(KashshafError::Repository("graph down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_absent_resolver_yields_none() {
        let fetcher = GraphContextFetcher::new(None);
        assert!(fetcher.fetch("الصلاة").await.is_none());
    }

    #[tokio::test]
    async fn test_deadline_yields_none() {
        let fetcher = GraphContextFetcher::with_deadline(
            Some(Arc::new(SlowResolver)),
            Duration::from_millis(10),
        );
        assert!(fetcher.fetch("الصلاة").await.is_none());
    }

    #[tokio::test]
    async fn test_failure_yields_none() {
        let fetcher = GraphContextFetcher::new(Some(Arc::new(FailingResolver)));
        assert!(fetcher.fetch("الصلاة").await.is_none());
    }

    #[test]
    fn test_boosts_reorder_ayahs() {
        let mut ayahs = vec![
            Scored::semantic(
                AyahHit { surah_number: 1, ayah_number: 1, ayah_end: None, text: String::new() },
                0.8,
                1,
            ),
            Scored::semantic(
                AyahHit { surah_number: 2, ayah_number: 255, ayah_end: None, text: String::new() },
                0.6,
                2,
            ),
        ];
        apply_ayah_boosts(
            &mut ayahs,
            &[AyahBoost { surah_number: 2, ayah_number: 255, boost: 0.5 }],
        );
        assert_eq!(ayahs[0].hit.surah_number, 2);
        assert!((ayahs[0].fused_score - 1.1).abs() < 1e-6);
    }
}
