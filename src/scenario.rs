//! The load-test iteration.
//!
//! [`Scenario::slam`] is what each virtual user runs: walk every configured
//! actor in order, then pause. It holds no mutable state of its own, so any
//! number of virtual users may run it at once.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info_span, Instrument};

use crate::actor::ActorDescriptor;
use crate::utils::parse_duration_string;
use crate::walker::Walker;

/// Pause applied at the end of each iteration.
///
/// # Examples
/// ```
/// use activitypub_loadtest::scenario::ThinkTime;
/// use std::time::Duration;
///
/// // Fixed delay: always 3 seconds
/// let fixed = ThinkTime::Fixed(Duration::from_secs(3));
///
/// // Random delay: between 2 and 5 seconds
/// let random = ThinkTime::Random {
///     min: Duration::from_secs(2),
///     max: Duration::from_secs(5),
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ThinkTime {
    /// Fixed delay (always the same duration)
    Fixed(Duration),

    /// Random delay within a range (min to max, inclusive)
    Random { min: Duration, max: Duration },
}

impl ThinkTime {
    /// Calculate the actual delay to apply.
    pub fn calculate_delay(&self) -> Duration {
        match self {
            ThinkTime::Fixed(duration) => *duration,
            ThinkTime::Random { min, max } => {
                use rand::Rng;
                let min_ms = min.as_millis() as u64;
                let max_ms = max.as_millis() as u64;

                if min_ms >= max_ms {
                    return *min;
                }

                let random_ms = rand::thread_rng().gen_range(min_ms..=max_ms);
                Duration::from_millis(random_ms)
            }
        }
    }

    /// Parses `2s` (fixed) or `1s-3s` (random range).
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.split_once('-') {
            Some((min, max)) => Ok(ThinkTime::Random {
                min: parse_duration_string(min)?,
                max: parse_duration_string(max)?,
            }),
            None => Ok(ThinkTime::Fixed(parse_duration_string(s)?)),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            ThinkTime::Fixed(d) => d.is_zero(),
            ThinkTime::Random { min, max } => min.is_zero() && max.is_zero(),
        }
    }
}

/// The actors to walk and the walker that walks them.
pub struct Scenario {
    walker: Walker,
    actors: Arc<Vec<ActorDescriptor>>,
    sleep_time: Option<ThinkTime>,
}

impl Scenario {
    pub fn new(walker: Walker, actors: Vec<ActorDescriptor>, sleep_time: Option<ThinkTime>) -> Self {
        Self {
            walker,
            actors: Arc::new(actors),
            sleep_time: sleep_time.filter(|t| !t.is_zero()),
        }
    }

    pub fn walker(&self) -> &Walker {
        &self.walker
    }

    pub fn actors(&self) -> &[ActorDescriptor] {
        &self.actors
    }

    /// Runs one iteration over every actor.
    pub async fn slam(&self) {
        async {
            for actor in self.actors.iter() {
                if let Some(report) = self.walker.walk_actor(actor).await {
                    debug!(
                        actor = %report.actor_id,
                        requests = report.requests(),
                        all_passed = report.all_passed(),
                        "Actor walked"
                    );
                }

                if let Some(ref sleep_time) = self.sleep_time {
                    let delay = sleep_time.calculate_delay();
                    debug!(sleep_ms = delay.as_millis() as u64, "Applying end-of-iteration pause");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        .instrument(info_span!("actors"))
        .await;

        self.walker.aggregator().record_iteration();
    }
}
