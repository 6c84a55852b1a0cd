//! `route`: rank registry candidates for an intent and explain the choice.

use std::fmt::Write as _;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::registry::{
    fetch_manifest, manifest_capability, RegistryClient, RegistryEntry, RegistryError,
    RegistryQuery, VerificationLevel,
};
use crate::scoring::{self, ScoreResult};

pub const MAX_ROUTE_LIMIT: u32 = 50;
const MAX_LEADS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub intent: String,
    pub capability: Option<String>,
    pub policy: Option<String>,
    /// Clamped to `[1, MAX_ROUTE_LIMIT]`.
    pub limit: u32,
}

impl RouteRequest {
    fn clamped_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_ROUTE_LIMIT)
    }
}

/// What fetching a candidate's manifest produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ManifestProbe {
    Fetched {
        capability: Option<String>,
        endpoints: Option<Value>,
    },
    Failed {
        error: String,
    },
}

/// One ranked, routable candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub score: f64,
    pub reasons: Vec<String>,
    pub missing: Vec<String>,
    pub manifest_url: Option<String>,
    pub repo: Option<String>,
    /// Why this candidate ranked below the winner; `None` for the winner
    /// and for near misses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestProbe>,
}

impl Candidate {
    fn from_score(result: &ScoreResult<'_>) -> Self {
        Self {
            id: result.entry.id.clone(),
            name: result.entry.name.clone(),
            score: result.score,
            reasons: result.reasons.clone(),
            missing: result.missing.clone(),
            manifest_url: result.entry.manifest_url.clone(),
            repo: result.entry.repo.clone(),
            loss_reason: None,
            manifest: None,
        }
    }
}

/// An indexed entry without a manifest: known, not yet routable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub canonical_id: Option<String>,
    pub trust_level: Option<VerificationLevel>,
    pub url: Option<String>,
}

impl From<&RegistryEntry> for Lead {
    fn from(entry: &RegistryEntry) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            canonical_id: entry.canonical_id.clone(),
            trust_level: entry.trust.as_ref().and_then(|t| t.level),
            url: entry
                .metadata
                .get("url")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteReport {
    pub intent: String,
    pub capability: Option<String>,
    pub policy: Option<String>,
    /// The filtered query came back empty and the report is built from an
    /// unfiltered one.
    pub requeried_unfiltered: bool,
    pub winner: Option<Candidate>,
    pub runners_up: Vec<Candidate>,
    /// Filled only when no candidate satisfied the request.
    pub near_misses: Vec<Candidate>,
    pub leads: Vec<Lead>,
}

impl RouteReport {
    pub fn has_winner(&self) -> bool {
        self.winner.is_some()
    }

    /// Human-readable report for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Intent: {}", self.intent);
        if let Some(c) = &self.capability {
            let _ = writeln!(out, "Filter capability: {c}");
        }
        if let Some(p) = &self.policy {
            let _ = writeln!(out, "Filter policy: {p}");
        }
        if self.requeried_unfiltered {
            let _ = writeln!(out, "(no filtered matches; showing unfiltered registry results)");
        }
        out.push('\n');

        if let Some(winner) = &self.winner {
            let _ = writeln!(
                out,
                "Winner: score={:.2} id={} name={}",
                winner.score, winner.id, winner.name
            );
            let why = if winner.reasons.is_empty() {
                "best tiebreaker".to_string()
            } else {
                winner.reasons.join(", ")
            };
            let _ = writeln!(out, "Why winner won: {why}");
            render_details(&mut out, winner, "");
            out.push('\n');

            for r in &self.runners_up {
                let _ = writeln!(out, "- score={:.2} id={} name={}", r.score, r.id, r.name);
                if let Some(reason) = &r.loss_reason {
                    let _ = writeln!(out, "  why lost: {reason}");
                }
                render_details(&mut out, r, "  ");
                out.push('\n');
            }
        } else if !self.near_misses.is_empty() {
            let _ = writeln!(
                out,
                "No candidates satisfied the requested requirements. Near-miss list:\n"
            );
            for r in &self.near_misses {
                let missing = if r.missing.is_empty() {
                    "none".to_string()
                } else {
                    r.missing.join(", ")
                };
                let _ = writeln!(out, "- score={:.2} id={} name={}", r.score, r.id, r.name);
                let _ = writeln!(out, "  missing: {missing}");
                render_details(&mut out, r, "  ");
                out.push('\n');
            }
        } else {
            let _ = writeln!(out, "No routable providers found (no entries with manifest_url).");
        }

        if !self.leads.is_empty() {
            let _ = writeln!(out, "Indexed leads (not MRP providers yet):");
            for lead in &self.leads {
                let _ = writeln!(
                    out,
                    "- id={} name={} canonical_id={}",
                    lead.id,
                    lead.name,
                    lead.canonical_id.as_deref().unwrap_or("-")
                );
                if let Some(level) = lead.trust_level {
                    let _ = writeln!(out, "  trust.level: {}", level.as_str());
                }
                if let Some(url) = &lead.url {
                    let _ = writeln!(out, "  url: {url}");
                }
            }
        }
        out
    }
}

fn render_details(out: &mut String, c: &Candidate, indent: &str) {
    if let Some(url) = &c.manifest_url {
        let _ = writeln!(out, "{indent}manifest: {url}");
    }
    if let Some(repo) = &c.repo {
        let _ = writeln!(out, "{indent}repo: {repo}");
    }
    match &c.manifest {
        Some(ManifestProbe::Fetched {
            capability,
            endpoints,
        }) => {
            let _ = writeln!(
                out,
                "{indent}manifest.capability: {}",
                capability.as_deref().unwrap_or("-")
            );
            if let Some(endpoints) = endpoints {
                let _ = writeln!(out, "{indent}endpoints: {endpoints}");
            }
        }
        Some(ManifestProbe::Failed { error }) => {
            let _ = writeln!(out, "{indent}manifest fetch FAILED: {error}");
        }
        None => {}
    }
}

/// Build a [`RouteReport`] for `request`.
///
/// Only the registry query can fail; manifest fetches for displayed
/// candidates are best-effort and recorded per candidate.
pub async fn route(
    registry: &RegistryClient,
    http: &Client,
    manifest_timeout: Duration,
    request: &RouteRequest,
) -> Result<RouteReport, RegistryError> {
    let limit = request.clamped_limit();
    let capability = request.capability.as_deref();
    let policy = request.policy.as_deref();

    let mut results = registry
        .query(&RegistryQuery::new(capability, policy, limit))
        .await?
        .results;

    let mut requeried_unfiltered = false;
    if results.is_empty() && (capability.is_some() || policy.is_some()) {
        tracing::info!("no filtered matches; re-querying without filters");
        results = registry
            .query(&RegistryQuery::new(None, None, limit))
            .await?
            .results;
        requeried_unfiltered = true;
    }

    let (routable, leads) = scoring::split_routable(results);
    let ranked = scoring::rank_entries(&routable, capability, policy);
    let (satisfying, unsatisfied): (Vec<_>, Vec<_>) =
        ranked.iter().partition(|r| r.satisfied());

    let mut report = RouteReport {
        intent: request.intent.clone(),
        capability: request.capability.clone(),
        policy: request.policy.clone(),
        requeried_unfiltered,
        winner: None,
        runners_up: Vec::new(),
        near_misses: Vec::new(),
        leads: leads
            .iter()
            .take((limit as usize).min(MAX_LEADS))
            .map(Lead::from)
            .collect(),
    };

    if let Some((best, rest)) = satisfying.split_first() {
        let mut winner = Candidate::from_score(best);
        winner.manifest = Some(probe_manifest(http, &winner, manifest_timeout).await);
        report.winner = Some(winner);

        for r in rest.iter().take(limit.saturating_sub(1) as usize) {
            let mut candidate = Candidate::from_score(r);
            candidate.loss_reason = Some(scoring::loss_reason(best, r));
            candidate.manifest = Some(probe_manifest(http, &candidate, manifest_timeout).await);
            report.runners_up.push(candidate);
        }
    } else {
        report.near_misses = unsatisfied
            .iter()
            .take(limit as usize)
            .map(|r| Candidate::from_score(r))
            .collect();
    }

    Ok(report)
}

async fn probe_manifest(http: &Client, candidate: &Candidate, timeout: Duration) -> ManifestProbe {
    let Some(url) = candidate.manifest_url.as_deref() else {
        return ManifestProbe::Failed {
            error: "no manifest_url".to_string(),
        };
    };
    match fetch_manifest(http, url, timeout).await {
        Ok(manifest) => ManifestProbe::Fetched {
            capability: manifest_capability(&manifest).map(str::to_string),
            endpoints: manifest.get("endpoints").cloned(),
        },
        Err(e) => {
            tracing::debug!(manifest_url = %url, error = %e, "manifest fetch failed");
            ManifestProbe::Failed {
                error: e.to_string(),
            }
        }
    }
}
