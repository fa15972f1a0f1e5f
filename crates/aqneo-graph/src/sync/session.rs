//! Bounded session setup for both ends of a sync.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::client::{GraphClient, GraphConfig};

/// Record source and sink sessions. Either side may have failed; a side
/// that did not come up within the timeout holds an error.
pub struct Sessions<S> {
    pub source: Result<S>,
    pub sink: Result<GraphClient>,
}

impl<S> Sessions<S> {
    pub fn is_ready(&self) -> bool {
        self.source.is_ok() && self.sink.is_ok()
    }

    /// Both sessions, or the first failure.
    pub fn into_ready(self) -> Result<(S, GraphClient)> {
        Ok((self.source?, self.sink?))
    }
}

async fn bounded<T>(name: &str, timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(session)) => Ok(session),
        Ok(Err(e)) => {
            warn!(session = name, error = %e, "Session failed to start");
            Err(e)
        }
        Err(_) => {
            warn!(session = name, timeout_secs = timeout.as_secs(), "Session timed out");
            Err(anyhow!("{name} session did not start within {}s", timeout.as_secs()))
        }
    }
}

/// Open the record source and the sink concurrently, each bounded by
/// `timeout`. Never waits longer than `timeout`.
pub async fn open_sessions<S, F, Fut>(config: &GraphConfig, source: F, timeout: Duration) -> Sessions<S>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<S>>,
{
    let (source, sink) = tokio::join!(
        bounded("source", timeout, source()),
        bounded("sink", timeout, GraphClient::connect(config)),
    );
    info!(source = source.is_ok(), sink = sink.is_ok(), "Sessions opened");
    Sessions { source, sink }
}
