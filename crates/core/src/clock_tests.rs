// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn system_clock_is_monotonic() {
    let clock = SystemClock;
    let t1 = clock.now();
    let t2 = clock.now();
    assert!(t2 >= t1);
}

#[test]
fn fake_clock_only_moves_on_advance() {
    let clock = FakeClock::new();
    let t1 = clock.now();
    assert_eq!(clock.now(), t1);
    clock.advance(Duration::from_secs(5));
    assert_eq!(clock.now().duration_since(t1), Duration::from_secs(5));
}

#[test]
fn fake_clock_clones_share_time() {
    let a = FakeClock::new();
    let b = a.clone();
    let before = a.epoch_ms();
    b.advance(Duration::from_millis(250));
    assert_eq!(a.epoch_ms(), before + 250);
}
