// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn generated_nspaces_are_prefixed_and_bounded() {
    let ns = Nspace::generate();
    assert!(ns.as_str().starts_with(Nspace::PREFIX));
    assert_eq!(ns.as_str().len(), NSPACE_MAX_LEN);
}

#[test]
fn generated_nspaces_are_unique() {
    let a = Nspace::generate();
    let b = Nspace::generate();
    assert_ne!(a, b);
}

#[test]
fn nspace_round_trips_through_strings() {
    let ns = Nspace::from_string("dvm-abc");
    assert_eq!(ns, "dvm-abc");
    assert_eq!(ns.to_string(), "dvm-abc");
}

#[test]
fn proc_name_display_includes_rank() {
    let p = ProcName::new(Nspace::from_string("dvm-abc"), 3);
    assert_eq!(p.to_string(), "[dvm-abc.3]");
    assert!(!p.is_hnp());
    assert!(ProcName::new(Nspace::from_string("dvm-abc"), HNP_RANK).is_hnp());
}

#[test]
fn daemon_identity_shares_the_dvm_nspace() {
    let dvm = Nspace::generate();
    let d = ProcName::daemon(&dvm, 2);
    assert_eq!(d.nspace, dvm);
    assert_eq!(d.rank, 2);
}

#[test]
fn nspace_serde_is_transparent() {
    let ns = Nspace::from_string("dvm-xyz");
    let json = serde_json::to_string(&ns).unwrap();
    assert_eq!(json, "\"dvm-xyz\"");
    let back: Nspace = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ns);
}
