// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    startup = { TimerId::startup(&Nspace::from_string("dvm-j1")) },
    execution = { TimerId::execution(&Nspace::from_string("dvm-j1")) },
    trace = { TimerId::stack_trace(&Nspace::from_string("dvm-j1")) },
    heartbeat = { TimerId::heartbeat_tick() },
)]
fn timer_ids_round_trip_through_kind(id: TimerId) {
    let kind = id.kind().expect("should parse");
    assert_eq!(kind.to_timer_id(), id);
}

#[test]
fn distinct_jobs_get_distinct_timers() {
    let a = TimerId::startup(&Nspace::from_string("dvm-a"));
    let b = TimerId::startup(&Nspace::from_string("dvm-b"));
    assert_ne!(a, b);
}

#[test]
fn unknown_formats_do_not_parse() {
    assert_eq!(TimerKind::parse("bogus:xyz"), None);
    assert_eq!(TimerKind::parse(""), None);
}

#[test]
fn kind_extracts_the_owning_nspace() {
    let id = TimerId::execution(&Nspace::from_string("dvm-j9"));
    match id.kind() {
        Some(TimerKind::Execution(ns)) => assert_eq!(ns, "dvm-j9"),
        other => panic!("unexpected kind: {:?}", other),
    }
}
