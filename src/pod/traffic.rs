//! Traffic flag and ownership labels.

use std::fmt;
use std::str::FromStr;

use crate::pod::model::Pod;

/// Label read by the downstream load-balancing selector.
pub const LABEL_TRAFFIC: &str = "pod-breaker/traffic";

/// Label naming the breaker strategy that manages the pod.
pub const LABEL_STRATEGY: &str = "pod-breaker/strategy";

/// Participation of a pod in load balancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficState {
    /// Receiving traffic.
    Yes,
    /// Cut by a breaker.
    No,
    /// Cut and parked after exhausting its retries.
    Pause,
}

impl TrafficState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficState::Yes => "yes",
            TrafficState::No => "no",
            TrafficState::Pause => "pause",
        }
    }
}

impl fmt::Display for TrafficState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrafficState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes" => Ok(TrafficState::Yes),
            "no" => Ok(TrafficState::No),
            "pause" => Ok(TrafficState::Pause),
            other => Err(format!("unknown traffic value '{}'", other)),
        }
    }
}

impl Pod {
    /// Current traffic state; `None` for unmanaged pods or unreadable values.
    pub fn traffic(&self) -> Option<TrafficState> {
        self.label(LABEL_TRAFFIC).and_then(|v| v.parse().ok())
    }

    /// Name of the owning breaker strategy, if any.
    pub fn strategy(&self) -> Option<&str> {
        self.label(LABEL_STRATEGY)
    }
}
