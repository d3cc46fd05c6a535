// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::id::Nspace;

#[test]
fn names_are_namespaced() {
    let ev = Event::JobStateActivate {
        nspace: Nspace::from_string("dvm-a"),
        state: JobState::Running,
    };
    assert_eq!(ev.name(), "job:activate");
    assert!(ev.log_summary().contains("dvm-a"));
    assert!(ev.log_summary().contains("running"));
}

#[test]
fn rml_summary_includes_tag_and_length() {
    let ev = Event::RmlMessage {
        sender: ProcName::new(Nspace::from_string("dvm-a"), 2),
        tag: 10,
        payload: vec![0; 16],
    };
    let s = ev.log_summary();
    assert!(s.contains("tag=10"));
    assert!(s.contains("len=16"));
}

#[test]
fn events_round_trip_through_serde() {
    let ev = Event::TimerFired { id: TimerId::heartbeat_tick() };
    let json = serde_json::to_string(&ev).unwrap();
    let back: Event = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ev);
}
