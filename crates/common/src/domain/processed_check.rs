use crate::domain::result::DomainResult;
use crate::domain::{Envelope, RequestContext};
use async_trait::async_trait;

/// Deduplication lookup consulted before a stage runs
///
/// Callers treat an error as "not processed" so a broken lookup never
/// stalls the pipeline.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ProcessedCheck: Send + Sync {
    async fn is_processed(&self, ctx: &RequestContext, envelope: &Envelope) -> DomainResult<bool>;
}

/// Check that never reports a duplicate
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverProcessed;

#[async_trait]
impl ProcessedCheck for NeverProcessed {
    async fn is_processed(&self, _ctx: &RequestContext, _envelope: &Envelope) -> DomainResult<bool> {
        Ok(false)
    }
}
