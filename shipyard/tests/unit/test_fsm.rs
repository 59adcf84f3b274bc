//! Deployment state machine unit tests

use shipyard::deploy::fsm::{transition, DeploymentEvent, DeploymentStatus};
use shipyard::errors::ControlError;

#[test]
fn test_status_names_round_trip() {
    for status in [
        DeploymentStatus::Pending,
        DeploymentStatus::Building,
        DeploymentStatus::Deploying,
        DeploymentStatus::Success,
        DeploymentStatus::Failed,
    ] {
        assert_eq!(status.as_str().parse::<DeploymentStatus>().unwrap(), status);
    }
    assert!(matches!(
        "queued".parse::<DeploymentStatus>(),
        Err(ControlError::ValidationError(_))
    ));
}

#[test]
fn test_terminal_states_accept_nothing() {
    let events = [
        DeploymentEvent::Build,
        DeploymentEvent::Deploy,
        DeploymentEvent::Succeed,
        DeploymentEvent::Fail("boom".into()),
        DeploymentEvent::Cancel,
    ];
    for status in [DeploymentStatus::Success, DeploymentStatus::Failed] {
        assert!(status.is_terminal());
        assert!(!status.is_cancellable());
        for event in &events {
            assert!(matches!(
                transition(status, event),
                Err(ControlError::InvalidState(_))
            ));
        }
    }
}

#[test]
fn test_no_backward_transitions() {
    assert!(transition(DeploymentStatus::Deploying, &DeploymentEvent::Build).is_err());
    assert!(transition(DeploymentStatus::Building, &DeploymentEvent::Build).is_err());
    assert!(transition(DeploymentStatus::Building, &DeploymentEvent::Succeed).is_err());
    assert_eq!(
        transition(DeploymentStatus::Building, &DeploymentEvent::Cancel).unwrap(),
        DeploymentStatus::Failed
    );
}
