//! Transitions and forwarding decisions.

use chrono::NaiveDate;
use mcrelay::event::{Event, EventKind};
use mcrelay::lifecycle::{forwarding_decision, Decision, LifecycleStateMachine, ServerState};

fn ts() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .expect("valid timestamp")
}

fn event(kind: EventKind) -> Event {
    Event::new(kind, "")
}

fn chat() -> Event {
    event(EventKind::Chat {
        player: "Bob".to_owned(),
        text: "hi".to_owned(),
        timestamp: ts(),
    })
}

fn stopped() -> Event {
    event(EventKind::ServerStopped { timestamp: ts() })
}

fn starting() -> Event {
    event(EventKind::ServerStarting { timestamp: ts() })
}

fn started() -> Event {
    event(EventKind::ServerStarted { timestamp: ts() })
}

#[test]
fn default_state_is_stopped() {
    assert_eq!(LifecycleStateMachine::default().state(), ServerState::Stopped);
}

#[test]
fn full_boot_sequence() {
    let mut machine = LifecycleStateMachine::default();
    assert_eq!(machine.apply(&starting()), (ServerState::Starting, Decision::Forward));
    assert_eq!(machine.apply(&chat()), (ServerState::Starting, Decision::Suppress));
    assert_eq!(machine.apply(&started()), (ServerState::Started, Decision::Forward));
    assert_eq!(machine.apply(&chat()), (ServerState::Started, Decision::Forward));
    assert_eq!(machine.apply(&stopped()), (ServerState::Stopped, Decision::Forward));
}

#[test]
fn started_is_accepted_from_stopped() {
    let mut machine = LifecycleStateMachine::new(ServerState::Stopped);
    assert_eq!(machine.apply(&started()), (ServerState::Started, Decision::Forward));
}

#[test]
fn repeated_markers_keep_state_and_are_forwarded() {
    let mut machine = LifecycleStateMachine::new(ServerState::Started);
    assert_eq!(machine.apply(&started()), (ServerState::Started, Decision::Forward));
    assert_eq!(machine.state(), ServerState::Started);
}

#[test]
fn unrecognized_is_never_forwarded() {
    for state in [ServerState::Stopped, ServerState::Starting, ServerState::Started] {
        assert_eq!(
            forwarding_decision(&event(EventKind::Unrecognized), state),
            Decision::Suppress
        );
    }
}

#[test]
fn player_events_are_forwarded_outside_startup() {
    let join = event(EventKind::PlayerJoin {
        player: "Bob".to_owned(),
        timestamp: ts(),
    });
    assert_eq!(forwarding_decision(&join, ServerState::Stopped), Decision::Forward);
    assert_eq!(forwarding_decision(&join, ServerState::Started), Decision::Forward);
    assert_eq!(forwarding_decision(&join, ServerState::Starting), Decision::Suppress);
}

#[test]
fn state_names_for_logs_and_config() {
    assert_eq!(ServerState::Starting.to_string(), "starting");
    let parsed: ServerState = serde_json::from_str("\"started\"").expect("state should parse");
    assert_eq!(parsed, ServerState::Started);
}
