//! Deterministic, explainable ranking of registry entries.
//!
//! The same entries and query always produce the same order: there is no
//! randomness and no clock input, and the final `id` tiebreak makes the
//! order total.

use std::cmp::Ordering;

use serde::Serialize;

use crate::registry::RegistryEntry;

const CAPABILITY_WEIGHT: f64 = 50.0;
const POLICY_WEIGHT: f64 = 20.0;
const TRUST_WEIGHT: f64 = 10.0;
const BOTH_MATCH_BONUS: f64 = 5.0;

/// Score of one entry against a requested capability/policy.
///
/// Recomputed per query; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult<'a> {
    pub entry: &'a RegistryEntry,
    pub score: f64,
    /// Requested dimensions satisfied (0..=2).
    pub required_matches: u32,
    pub trust_score: f64,
    pub proofs_count: usize,
    pub reasons: Vec<String>,
    /// Unmet requirement tags, e.g. `capability:summarize_url`.
    pub missing: Vec<String>,
}

impl ScoreResult<'_> {
    pub fn satisfied(&self) -> bool {
        self.missing.is_empty()
    }

    /// Rank order: `Less` means `self` ranks above `other`.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.required_matches.cmp(&self.required_matches))
            .then_with(|| other.trust_score.total_cmp(&self.trust_score))
            .then_with(|| other.proofs_count.cmp(&self.proofs_count))
            .then_with(|| {
                self.entry
                    .name
                    .to_lowercase()
                    .cmp(&other.entry.name.to_lowercase())
            })
            .then_with(|| self.entry.id.cmp(&other.entry.id))
    }

    pub fn near_miss(&self) -> NearMiss {
        NearMiss {
            id: self.entry.id.clone(),
            name: self.entry.name.clone(),
            score: self.score,
            missing: self.missing.clone(),
            manifest_url: self.entry.manifest_url.clone(),
            repo: self.entry.repo.clone(),
        }
    }
}

/// Owned summary of a candidate that did not satisfy the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearMiss {
    pub id: String,
    pub name: String,
    pub score: f64,
    pub missing: Vec<String>,
    pub manifest_url: Option<String>,
    pub repo: Option<String>,
}

pub fn score_entry<'a>(
    entry: &'a RegistryEntry,
    capability: Option<&str>,
    policy: Option<&str>,
) -> ScoreResult<'a> {
    let mut score = 0.0;
    let mut required_matches = 0;
    let mut reasons = Vec::new();
    let mut missing = Vec::new();

    let capability_hit = capability.map(|c| entry.capabilities.iter().any(|x| x == c));
    let policy_hit = policy.map(|p| entry.policies.iter().any(|x| x == p));

    if let (Some(c), Some(hit)) = (capability, capability_hit) {
        if hit {
            score += CAPABILITY_WEIGHT;
            required_matches += 1;
            reasons.push(format!("capability match: {c}"));
        } else {
            missing.push(format!("capability:{c}"));
        }
    }

    if let (Some(p), Some(hit)) = (policy, policy_hit) {
        if hit {
            score += POLICY_WEIGHT;
            required_matches += 1;
            reasons.push(format!("policy match: {p}"));
        } else {
            missing.push(format!("policy:{p}"));
        }
    }

    let mut trust_score = 0.0;
    if let Some(ts) = entry.trust.as_ref().and_then(|t| t.score) {
        trust_score = ts;
        score += TRUST_WEIGHT * ts;
        reasons.push(format!("trust score: {ts:.2}"));
    }

    let proofs_count = entry.proofs.len();
    if proofs_count > 0 {
        reasons.push(format!("proofs: {proofs_count}"));
    }

    if capability_hit == Some(true) && policy_hit == Some(true) {
        score += BOTH_MATCH_BONUS;
        reasons.push("capability+policy bonus".to_string());
    }

    ScoreResult {
        entry,
        score,
        required_matches,
        trust_score,
        proofs_count,
        reasons,
        missing,
    }
}

/// Score and sort `entries`, best first.
pub fn rank_entries<'a>(
    entries: &'a [RegistryEntry],
    capability: Option<&str>,
    policy: Option<&str>,
) -> Vec<ScoreResult<'a>> {
    let mut scored: Vec<ScoreResult<'a>> = entries
        .iter()
        .map(|e| score_entry(e, capability, policy))
        .collect();
    scored.sort_by(|a, b| a.rank_cmp(b));
    scored
}

/// Separate routable entries from discovery leads, preserving order.
pub fn split_routable(entries: Vec<RegistryEntry>) -> (Vec<RegistryEntry>, Vec<RegistryEntry>) {
    entries.into_iter().partition(RegistryEntry::is_routable)
}

/// Why `candidate` ranked below `winner`, as a single reason.
///
/// Checked in rank-key order: missing requirements, score, required
/// matches, trust, proofs, name, id. A score gap is attributed to the
/// component behind it (required matches or trust) when one of those
/// differs; the bare score is named only when neither does.
pub fn loss_reason(winner: &ScoreResult<'_>, candidate: &ScoreResult<'_>) -> String {
    if !candidate.missing.is_empty() {
        return format!("missing requirements: {}", candidate.missing.join(", "));
    }
    let fewer_matches = candidate.required_matches != winner.required_matches;
    let lower_trust = candidate.trust_score != winner.trust_score;

    if candidate.score != winner.score {
        if fewer_matches {
            return "fewer required matches".to_string();
        }
        if lower_trust {
            return "lower trust score".to_string();
        }
        return format!(
            "lower score ({:.2} vs {:.2})",
            candidate.score, winner.score
        );
    }
    if fewer_matches {
        return "fewer required matches".to_string();
    }
    if lower_trust {
        return "lower trust score".to_string();
    }
    if candidate.proofs_count != winner.proofs_count {
        return "fewer proofs".to_string();
    }
    if candidate.entry.name.to_lowercase() != winner.entry.name.to_lowercase() {
        return "tiebreaker: name order".to_string();
    }
    "tiebreaker: id order".to_string()
}
