//! SSH reachability probe.

use tokio::time::sleep;
use tracing::debug;

use crate::retry::RetryPolicy;
use crate::ssh::{RemoteShell, SshEndpoint};

/// Attempts up to `policy.max_attempts()` handshakes against `endpoint`.
///
/// A refused or timed-out connection is an expected outcome and is reported
/// as `false`, never as an error.
pub async fn probe<S>(shell: &S, endpoint: &SshEndpoint, policy: RetryPolicy) -> bool
where
    S: RemoteShell + ?Sized,
{
    let max_attempts = policy.max_attempts();
    for attempt in 1..=max_attempts {
        if shell.handshake(endpoint) {
            debug!(%endpoint, attempt, "ssh handshake succeeded");
            return true;
        }
        debug!(%endpoint, attempt, max_attempts, "ssh handshake failed");
        if attempt < max_attempts {
            sleep(policy.delay_for(attempt)).await;
        }
    }
    false
}
