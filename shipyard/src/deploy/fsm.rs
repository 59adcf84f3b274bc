//! Finite State Machine for deployment status

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ControlError;

/// Deployment status
///
/// `pending -> building -> deploying -> {success | failed}`. Steps may be
/// skipped forward but never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Building,
    Deploying,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }

    pub fn is_cancellable(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DeploymentStatus::Pending),
            "building" => Ok(DeploymentStatus::Building),
            "deploying" => Ok(DeploymentStatus::Deploying),
            "success" => Ok(DeploymentStatus::Success),
            "failed" => Ok(DeploymentStatus::Failed),
            other => Err(ControlError::ValidationError(format!(
                "Unknown deployment status: {}",
                other
            ))),
        }
    }
}

/// Deployment event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// Local image build started
    Build,

    /// Provider deploy invoked
    Deploy,

    /// Provider reported a live deployment
    Succeed,

    /// Pipeline failed
    Fail(String),

    /// Cancelled by an actor
    Cancel,
}

/// Compute the status reached from `from` on `event`
pub fn transition(
    from: DeploymentStatus,
    event: &DeploymentEvent,
) -> Result<DeploymentStatus, ControlError> {
    use DeploymentStatus::*;

    let next = match (from, event) {
        (Pending, DeploymentEvent::Build) => Building,
        (Pending | Building, DeploymentEvent::Deploy) => Deploying,
        (Deploying, DeploymentEvent::Succeed) => Success,
        (Pending | Building | Deploying, DeploymentEvent::Fail(_)) => Failed,
        (Pending | Building | Deploying, DeploymentEvent::Cancel) => Failed,

        (state, event) => {
            return Err(ControlError::InvalidState(format!(
                "Invalid transition: {} -> {:?}",
                state, event
            )));
        }
    };

    Ok(next)
}
