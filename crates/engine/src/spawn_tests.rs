// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn config() -> HeadConfig {
    HeadConfig {
        launch_agent: "dvmd".to_string(),
        head_uri: "tcp://10.0.0.1:7000".to_string(),
        ..HeadConfig::default()
    }
}

#[test]
fn single_word_agent_has_location_zero() {
    let (argv, loc) = setup_daemon_cmd("dvmd");
    assert_eq!(argv, vec!["dvmd"]);
    assert_eq!(loc, 0);
}

#[test]
fn multi_word_agent_finds_the_daemon_word() {
    let (argv, loc) = setup_daemon_cmd("ssh -q dvmd --leave-session-attached");
    assert_eq!(argv.len(), 4);
    assert_eq!(loc, 2);
    assert_eq!(argv[2], "dvmd");
}

#[test]
fn absolute_daemon_paths_are_recognized() {
    let (_argv, loc) = setup_daemon_cmd("/opt/dvm/bin/dvmd");
    assert_eq!(loc, 0);
}

#[test]
fn basic_args_carry_identity_and_sizing() {
    let mut argv = vec!["dvmd".to_string()];
    let ns = Nspace::from_string("dvm-x");
    let idx = append_basic_args(&mut argv, &config(), &ns, 4);

    let joined = argv.join(" ");
    assert!(joined.contains("--prtemca ess_base_nspace dvm-x"));
    assert!(joined.contains("--prtemca ess_base_num_procs 4"));
    assert!(joined.contains("--prtemca dvm_hnp_uri tcp://10.0.0.1:7000"));
    assert_eq!(argv[idx], "<template>");
}

#[test]
fn debug_flags_are_forwarded() {
    let mut cfg = config();
    cfg.debug_daemons = true;
    cfg.leave_session_attached = true;
    cfg.test_suicide = true;
    let mut argv = vec!["dvmd".to_string()];
    append_basic_args(&mut argv, &cfg, &Nspace::from_string("dvm-x"), 2);
    assert!(argv.contains(&"--debug-daemons".to_string()));
    assert!(argv.contains(&"--leave-session-attached".to_string()));
    assert!(argv.contains(&"--test-suicide".to_string()));
    assert!(!argv.contains(&"--debug".to_string()));
}

#[test]
fn pass_through_params_are_purged_and_deduped() {
    let mut cfg = config();
    cfg.prtemca = vec![
        ("oob_verbose".to_string(), "5".to_string()),
        ("bad_param".to_string(), "has spaces".to_string()),
        ("plm".to_string(), "ssh".to_string()),
        ("ess_base_nspace".to_string(), "override".to_string()),
    ];
    let mut argv = vec!["dvmd".to_string()];
    append_basic_args(&mut argv, &cfg, &Nspace::from_string("dvm-x"), 2);

    assert!(argv.contains(&"oob_verbose".to_string()));
    assert!(!argv.contains(&"bad_param".to_string()));
    assert!(!argv.contains(&"plm".to_string()));
    // The duplicate nspace directive is dropped, not doubled.
    assert_eq!(argv.iter().filter(|a| *a == "ess_base_nspace").count(), 1);
}

#[test]
fn specs_substitute_the_rank() {
    let specs = build_daemon_specs(
        &config(),
        &Nspace::from_string("dvm-x"),
        3,
        &[(1, "hB".to_string()), (2, "hC".to_string())],
    );
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].rank, 1);
    assert_eq!(specs[0].node, "hB");
    assert!(specs[0].argv.contains(&"1".to_string()));
    assert!(specs[1].argv.contains(&"2".to_string()));
    assert!(!specs[0].argv.contains(&"<template>".to_string()));
}
