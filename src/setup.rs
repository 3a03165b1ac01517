//! One-time reachability pass run before the load starts, for targets on a
//! local development host.

use tracing::{info, info_span, warn, Instrument};

use crate::actor::ActorDescriptor;
use crate::checks::{run_checks, Check};
use crate::response::fetch;
use crate::walker::Walker;

/// True when `base_url` parses and its host ends with `suffix`.
pub fn should_run_setup(base_url: &str, suffix: &str) -> bool {
    if suffix.is_empty() {
        return false;
    }
    reqwest::Url::parse(base_url)
        .ok()
        .and_then(|url| url.host_str().map(|host| host.ends_with(suffix)))
        .unwrap_or(false)
}

/// Fetches every actor that has an id once and runs the ActivityPub check.
///
/// Returns the number of actors that passed. Failures are logged and
/// recorded like any other check; they do not stop the run.
pub async fn run_setup(walker: &Walker, actors: &[ActorDescriptor]) -> usize {
    let mut passed = 0;
    async {
        for actor in actors {
            let Some(id) = actor.id.as_deref() else {
                continue;
            };

            let response = fetch(walker.client(), id, walker.aggregator()).await;
            let results = run_checks(&[Check::ActivityPub], &response, walker.aggregator());
            if results.iter().all(|r| r.passed) {
                passed += 1;
            } else {
                warn!(actor = %id, status = ?response.status, "Actor failed setup check");
            }
        }
        info!(checked = actors.len(), passed, "Setup complete");
    }
    .instrument(info_span!("setup"))
    .await;
    passed
}
