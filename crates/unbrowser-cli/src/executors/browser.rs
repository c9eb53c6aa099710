//! Stand-in for the rendering tier when no browser backend is configured.

use async_trait::async_trait;

use unbrowser::{Tier, TierExecutor, TierFailure, TierRequest, TierResult};

pub struct UnavailableBrowser;

#[async_trait]
impl TierExecutor for UnavailableBrowser {
    fn tier(&self) -> Tier {
        Tier::Playwright
    }

    async fn execute(&self, _request: &TierRequest) -> Result<TierResult, TierFailure> {
        Err(TierFailure::unsupported("no browser backend configured"))
    }
}
