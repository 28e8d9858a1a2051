// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn idbuf_round_trips_through_str() {
    let buf = IdBuf::new("prj-abc123");
    assert_eq!(buf.as_str(), "prj-abc123");
    assert!(!buf.is_empty());
}

#[test]
fn empty_idbuf_is_empty() {
    assert!(IdBuf::empty().is_empty());
}

#[test]
fn define_id_new_has_correct_prefix_and_length() {
    let id = ProjectId::new();
    assert!(id.as_str().starts_with("prj-"));
    assert_eq!(id.as_str().len(), 23);
}

#[test]
fn define_id_from_string_preserves_value() {
    let id = ProjectId::from_string("prj-fixedvalue000000");
    assert_eq!(id.as_str(), "prj-fixedvalue000000");
}

#[test]
fn define_id_two_new_calls_differ() {
    assert_ne!(ProjectId::new(), ProjectId::new());
}

#[test]
fn define_id_eq_str_works_both_ways() {
    let id = RunnerId::from_string("rnr-test");
    assert_eq!(id, "rnr-test");
    assert_eq!(id.as_ref(), "rnr-test");
}
