//! Ranking determinism regression test.
//!
//! For identical registry entries and query, ranking must produce the same
//! order regardless of input order or repetition, and the order must be
//! total: no two distinct entries ever compare equal.

use std::cmp::Ordering;

use serde_json::json;

use mrpd::registry::RegistryEntry;
use mrpd::scoring::{loss_reason, rank_entries};

fn fixture_entries() -> Vec<RegistryEntry> {
    let raw = json!([
        {"id": "svc-c", "name": "Gamma", "manifest_url": "https://c/m",
         "capabilities": ["summarize_url"], "policies": ["no_pii"], "trust": {"score": 0.5}},
        {"id": "svc-a", "name": "alpha", "manifest_url": "https://a/m",
         "capabilities": ["summarize_url"], "policies": [], "trust": {"score": 0.5}},
        {"id": "svc-b", "name": "Alpha", "manifest_url": "https://b/m",
         "capabilities": ["summarize_url"], "policies": [], "trust": {"score": 0.5}},
        {"id": "svc-d", "name": "Delta", "manifest_url": "https://d/m",
         "capabilities": ["summarize_url"], "policies": ["no_pii"], "trust": {"score": 0.5},
         "proofs": ["dns"]},
        {"id": "svc-e", "name": "Epsilon", "manifest_url": "https://e/m",
         "capabilities": ["translate"], "policies": ["no_pii"], "trust": {"score": 1.0}},
        {"id": "svc-f", "name": "Zeta", "manifest_url": "https://f/m",
         "capabilities": ["summarize_url"], "policies": ["no_pii"]}
    ]);
    serde_json::from_value(raw).unwrap()
}

fn ranked_ids(entries: &[RegistryEntry]) -> Vec<String> {
    rank_entries(entries, Some("summarize_url"), Some("no_pii"))
        .iter()
        .map(|r| r.entry.id.clone())
        .collect()
}

#[test]
fn ranking_is_identical_across_runs_and_input_orders() {
    let entries = fixture_entries();
    let baseline = ranked_ids(&entries);

    for _ in 0..5 {
        assert_eq!(ranked_ids(&entries), baseline, "repeated ranking diverged");
    }

    let mut reversed = entries.clone();
    reversed.reverse();
    assert_eq!(ranked_ids(&reversed), baseline, "reversed input changed the order");

    let mut rotated = entries.clone();
    rotated.rotate_left(2);
    assert_eq!(ranked_ids(&rotated), baseline, "rotated input changed the order");
}

#[test]
fn ranking_order_is_the_documented_key() {
    let entries = fixture_entries();
    assert_eq!(
        ranked_ids(&entries),
        vec![
            // 80 each; proofs break the tie
            "svc-d", "svc-c",
            // 75, no trust score
            "svc-f",
            // 55; names compare case-insensitively, then id decides
            "svc-a", "svc-b",
            // 30
            "svc-e",
        ]
    );
}

#[test]
fn ranking_is_a_total_order() {
    let entries = fixture_entries();
    let ranked = rank_entries(&entries, Some("summarize_url"), Some("no_pii"));

    for (i, a) in ranked.iter().enumerate() {
        for (j, b) in ranked.iter().enumerate() {
            let expected = i.cmp(&j);
            assert_eq!(a.rank_cmp(b), expected, "{} vs {}", a.entry.id, b.entry.id);
            if i != j {
                assert_ne!(a.rank_cmp(b), Ordering::Equal);
            }
        }
    }
}

#[test]
fn every_loss_reason_names_a_real_difference() {
    let entries = fixture_entries();
    let ranked = rank_entries(&entries, Some("summarize_url"), Some("no_pii"));
    let winner = &ranked[0];

    let reasons: Vec<String> = ranked[1..].iter().map(|r| loss_reason(winner, r)).collect();
    assert_eq!(
        reasons,
        vec![
            "fewer proofs",
            "lower trust score",
            "missing requirements: policy:no_pii",
            "missing requirements: policy:no_pii",
            "missing requirements: capability:summarize_url",
        ]
    );
}
