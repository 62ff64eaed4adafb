// Periodic liveness and clock-drift probing, independent of the message
// pipeline.
//
// Grounded on `original_source/utils/api/rafthttp/probing_status.go`:
// a background task probes each peer on a fixed interval (shortened
// after a failure so outages are noticed quickly) and flags excessive
// clock drift, here via a `GET /probing` round trip instead of the
// `xiang90/probing` library's ICMP-style prober, since there is no
// equivalent crate in this stack.

use super::status::ProbeSample;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const HEALTHY_INTERVAL: Duration = Duration::from_secs(30);
const UNHEALTHY_INTERVAL: Duration = Duration::from_secs(5);
const CLOCK_DRIFT_WARN: Duration = Duration::from_secs(1);

pub fn spawn_prober(
    peer_id: u64,
    base_url: String,
    client: reqwest::Client,
    on_sample: impl Fn(ProbeSample) + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = UNHEALTHY_INTERVAL;
        loop {
            tokio::time::sleep(interval).await;
            let sample = probe_once(&client, &base_url).await;
            if !sample.healthy {
                tracing::warn!(peer = peer_id, "prober detected unhealthy status");
                interval = UNHEALTHY_INTERVAL;
            } else {
                interval = HEALTHY_INTERVAL;
            }
            if sample.clock_drift > CLOCK_DRIFT_WARN {
                tracing::warn!(peer = peer_id, drift = ?sample.clock_drift, "clock drift against peer is too high");
            }
            on_sample(sample);
        }
    })
}

async fn probe_once(client: &reqwest::Client, base_url: &str) -> ProbeSample {
    let url = format!("{}/probing", base_url.trim_end_matches('/'));
    let sent_at = Instant::now();
    let local_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();

    match client.get(&url).timeout(Duration::from_secs(2)).send().await {
        Ok(resp) if resp.status().is_success() => {
            let round_trip = sent_at.elapsed();
            let remote_epoch_ms: u128 = resp
                .headers()
                .get("x-server-time-ms")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(local_epoch.as_millis());
            let local_mid = local_epoch.as_millis() + round_trip.as_millis() / 2;
            let drift_ms = local_mid.abs_diff(remote_epoch_ms);
            ProbeSample {
                healthy: true,
                round_trip,
                clock_drift: Duration::from_millis(drift_ms as u64),
                observed_at: SystemTime::now(),
            }
        }
        _ => ProbeSample {
            healthy: false,
            round_trip: sent_at.elapsed(),
            clock_drift: Duration::ZERO,
            observed_at: SystemTime::now(),
        },
    }
}
