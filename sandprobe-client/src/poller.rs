use std::time::Duration;

use http::{Method, header};
use log::{debug, trace, warn};
use sandprobe_proto::StatsSample;
use tokio::{
    task::JoinSet,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

use crate::{
    http_util::{self, Endpoint, FetchError},
    page::DashboardPage,
};

/// Keeps a [`DashboardPage`] current by polling the stats endpoint.
///
/// At most one request is outstanding at any time. A tick that fires while the
/// previous request has not resolved yet is skipped, so responses are always
/// applied in the order they were requested.
#[derive(Debug)]
pub struct TelemetryPoller {
    endpoint: Endpoint,
    interval: Duration,
    page: DashboardPage,
}

impl TelemetryPoller {
    pub fn try_new(endpoint: Endpoint, interval: Duration) -> anyhow::Result<Self> {
        if interval.is_zero() {
            anyhow::bail!("polling interval must be non-zero");
        }

        Ok(Self {
            endpoint,
            interval,
            page: DashboardPage::new(),
        })
    }

    #[cfg(test)]
    pub fn page(&self) -> &DashboardPage {
        &self.page
    }

    pub async fn fetch_stats(endpoint: &Endpoint) -> Result<StatsSample, FetchError> {
        let uri = endpoint.url("/api/stats");
        let req = http_util::basic_request_builder(&uri, Method::GET)
            .map_err(FetchError::Transport)?
            .header(header::ACCEPT, "application/json")
            .body(Vec::new())
            .map_err(|e| FetchError::Transport(e.into()))?;

        http_util::fetch_json(req, endpoint).await
    }

    /// Polls until `shutdown` is cancelled, calling `on_update` after every applied sample.
    pub async fn run(
        &mut self,
        shutdown: CancellationToken,
        mut on_update: impl FnMut(&DashboardPage),
    ) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut outstanding: JoinSet<Result<StatsSample, FetchError>> = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    // dropping the JoinSet aborts a request still in flight
                    debug!("telemetry poller stopped");
                    return;
                }
                Some(res) = outstanding.join_next() => match res {
                    Ok(Ok(sample)) => {
                        trace!("applying stats sample {sample:?}");
                        self.page.apply(sample);
                        on_update(&self.page);
                    }
                    Ok(Err(e)) => warn!("failed to poll stats: {e}"),
                    Err(e) => warn!("stats request task failed: {e}"),
                },
                _ = ticker.tick() => {
                    if !outstanding.is_empty() {
                        debug!("previous stats request still outstanding, skipping tick");
                        continue;
                    }
                    let endpoint = self.endpoint.clone();
                    outstanding.spawn(async move { Self::fetch_stats(&endpoint).await });
                }
            }
        }
    }
}
