//! `run`: the DISCOVER → EXECUTE state machine against one provider.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::MrpConfig;
use crate::error::{MrpError, NotFoundError, TransportError};
use crate::http::{self, HttpReply};
use crate::protocol::{
    new_msg_id, utc_now_rfc3339, Constraints, DiscoverPayload, Envelope, EnvelopeMeta,
    EvidencePayload, ExecutePayload, InputItem, JobRef, MsgType, Offer, OutputItem, Payload,
    MRP_CONTENT_TYPE,
};
use crate::registry::{
    fetch_manifest, normalize_manifest_endpoints, ManifestEndpoints, RegistryClient, RegistryQuery,
};
use crate::scoring;
use crate::store::EvidenceStore;

const CANDIDATE_LIMIT: u32 = 25;
const OUTPUT_FORMAT: &str = "markdown";

/// Where a run was when it finished or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStep {
    SelectProvider,
    DiscoverSent,
    OfferReceived,
    ExecuteSent,
    EvidenceReceived,
}

impl RunStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelectProvider => "SELECT_PROVIDER",
            Self::DiscoverSent => "DISCOVER_SENT",
            Self::OfferReceived => "OFFER_RECEIVED",
            Self::ExecuteSent => "EXECUTE_SENT",
            Self::EvidenceReceived => "EVIDENCE_RECEIVED",
        }
    }
}

impl std::fmt::Display for RunStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a run: the step it happened in and why.
#[derive(Debug, thiserror::Error)]
#[error("run failed at {step}")]
pub struct RunError {
    pub step: RunStep,
    #[source]
    pub source: MrpError,
}

trait AtStep<T> {
    fn at(self, step: RunStep) -> Result<T, RunError>;
}

impl<T, E: Into<MrpError>> AtStep<T> for Result<T, E> {
    fn at(self, step: RunStep) -> Result<T, RunError> {
        self.map_err(|e| RunError {
            step,
            source: e.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub intent: String,
    pub url: String,
    pub capability: String,
    pub policy: Option<String>,
    /// Skip the registry and use this provider.
    pub manifest_url: Option<String>,
    pub max_tokens: Option<u64>,
    pub max_cost: Option<f64>,
}

/// One request/response round trip, headers only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub endpoint: String,
    pub request: EnvelopeMeta,
    pub response: EnvelopeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub intent: String,
    pub capability: String,
    pub policy: Option<String>,
    pub discover: Exchange,
    pub execute: Exchange,
}

/// Audit record of one successful run, written once under its job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub job_id: String,
    pub created_at: String,
    pub transcript: Transcript,
    pub artifact_refs: Vec<OutputItem>,
    pub evidence_envelope: Envelope,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub job_id: String,
    pub manifest_url: String,
    pub offer: Offer,
    pub evidence: Envelope,
    pub bundle_path: PathBuf,
}

/// Drives runs against providers chosen from the registry.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: RegistryClient,
    http: Client,
    evidence: EvidenceStore,
    sender_id: String,
    manifest_timeout: Duration,
    discover_timeout: Duration,
    execute_timeout: Duration,
}

impl Orchestrator {
    pub fn new(config: &MrpConfig, registry: RegistryClient) -> Result<Self, TransportError> {
        Ok(Self {
            registry,
            http: http::protocol_client()?,
            evidence: EvidenceStore::new(config.evidence_dir.clone()),
            sender_id: config.sender_id.clone(),
            manifest_timeout: config.manifest_timeout,
            discover_timeout: config.discover_timeout,
            execute_timeout: config.execute_timeout,
        })
    }

    /// Run `request` to completion. Evidence is written only on success.
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutcome, RunError> {
        let (manifest_url, endpoints) = self.select_provider(request).await?;
        tracing::info!(%manifest_url, discover = %endpoints.discover, "provider selected");

        let inputs = vec![InputItem::url(&request.url)];

        let discover = Envelope::request(
            Payload::Discover(DiscoverPayload {
                intent: request.intent.clone(),
                inputs: inputs.clone(),
                constraints: Constraints {
                    max_cost: request.max_cost,
                    policy: request.policy.iter().cloned().collect(),
                    max_context_tokens: request.max_tokens,
                    extra: Default::default(),
                },
                extra: Default::default(),
            }),
            &self.sender_id,
        );
        let offer_env = self
            .exchange(&endpoints.discover, &discover, MsgType::Offer, self.discover_timeout)
            .await
            .at(RunStep::DiscoverSent)?;

        let offer = first_offer(&offer_env).at(RunStep::OfferReceived)?;
        let Some(route_id) = offer.route_id.clone().filter(|r| !r.is_empty()) else {
            return Err(MrpError::Execution("offer is missing route_id".into()))
                .at(RunStep::OfferReceived);
        };
        tracing::info!(%route_id, "offer accepted");

        let local_job_id = new_msg_id();
        let execute = Envelope::request(
            Payload::Execute(ExecutePayload {
                route_id,
                inputs,
                output_format: Some(OUTPUT_FORMAT.to_string()),
                job: Some(JobRef {
                    id: local_job_id.clone(),
                    intent: Some(request.intent.clone()),
                }),
                extra: Default::default(),
            }),
            &self.sender_id,
        );
        let evidence_env = self
            .exchange(&endpoints.execute, &execute, MsgType::Evidence, self.execute_timeout)
            .await
            .at(RunStep::ExecuteSent)?;

        let Payload::Evidence(payload) = &evidence_env.body else {
            return Err(MrpError::Validation(format!(
                "expected EVIDENCE, got {}",
                evidence_env.msg_type()
            )))
            .at(RunStep::EvidenceReceived);
        };
        let job_id = resolved_job_id(payload, &local_job_id);

        let bundle = EvidenceBundle {
            job_id: job_id.clone(),
            created_at: utc_now_rfc3339(),
            transcript: Transcript {
                intent: request.intent.clone(),
                capability: request.capability.clone(),
                policy: request.policy.clone(),
                discover: Exchange {
                    endpoint: endpoints.discover.clone(),
                    request: discover.meta(),
                    response: offer_env.meta(),
                },
                execute: Exchange {
                    endpoint: endpoints.execute.clone(),
                    request: execute.meta(),
                    response: evidence_env.meta(),
                },
            },
            artifact_refs: payload
                .outputs
                .iter()
                .filter(|o| o.is_artifact())
                .cloned()
                .collect(),
            evidence_envelope: evidence_env.clone(),
        };
        let bundle_path = self
            .evidence
            .write_bundle(&job_id, &bundle)
            .await
            .at(RunStep::EvidenceReceived)?;
        tracing::info!(%job_id, path = %bundle_path.display(), "evidence bundle written");

        Ok(RunOutcome {
            job_id,
            manifest_url,
            offer,
            evidence: evidence_env,
            bundle_path,
        })
    }

    async fn select_provider(
        &self,
        request: &RunRequest,
    ) -> Result<(String, ManifestEndpoints), RunError> {
        let step = RunStep::SelectProvider;

        let manifest_url = match &request.manifest_url {
            Some(url) => url.clone(),
            None => self.best_candidate(request).await.at(step)?,
        };

        let manifest = fetch_manifest(&self.http, &manifest_url, self.manifest_timeout)
            .await
            .at(step)?;
        let manifest = normalize_manifest_endpoints(manifest, &manifest_url).at(step)?;
        let endpoints = ManifestEndpoints::from_manifest(&manifest)
            .map_err(MrpError::Configuration)
            .at(step)?;

        Ok((manifest_url, endpoints))
    }

    /// Manifest URL of the top-ranked satisfying registry entry.
    async fn best_candidate(&self, request: &RunRequest) -> Result<String, MrpError> {
        let query = RegistryQuery::new(
            Some(&request.capability),
            request.policy.as_deref(),
            CANDIDATE_LIMIT,
        );
        let results = self.registry.query(&query).await?.results;

        let (routable, leads) = scoring::split_routable(results);
        if !leads.is_empty() {
            tracing::debug!(leads = leads.len(), "ignoring entries without manifest_url");
        }

        let ranked = scoring::rank_entries(
            &routable,
            Some(&request.capability),
            request.policy.as_deref(),
        );
        if ranked.is_empty() {
            return Err(NotFoundError::NoCandidates.into());
        }

        match ranked.iter().find(|r| r.satisfied()) {
            Some(best) => {
                tracing::info!(id = %best.entry.id, score = best.score, "top candidate");
                best.entry
                    .manifest_url
                    .clone()
                    .ok_or_else(|| NotFoundError::NoCandidates.into())
            }
            None => Err(NotFoundError::NoneSatisfied {
                near_misses: ranked.iter().map(|r| r.near_miss()).collect(),
            }
            .into()),
        }
    }

    /// POST `request` to `endpoint` and decode a reply of type `expected`.
    async fn exchange(
        &self,
        endpoint: &str,
        request: &Envelope,
        expected: MsgType,
        timeout: Duration,
    ) -> Result<Envelope, MrpError> {
        tracing::info!(%endpoint, msg_type = %request.msg_type(), msg_id = %request.msg_id, "sending");
        let reply = http::post_json(&self.http, endpoint, request, MRP_CONTENT_TYPE, timeout).await?;
        let envelope = read_reply(reply, expected)?;

        if envelope.in_reply_to.as_deref() != Some(request.msg_id.as_str()) {
            tracing::warn!(
                expected = %request.msg_id,
                got = ?envelope.in_reply_to,
                "reply is not correlated to the request"
            );
        }
        Ok(envelope)
    }
}

/// Decode a provider reply.
///
/// An ERROR envelope, whatever the HTTP status, becomes
/// [`MrpError::Provider`] carrying the payload untouched. Any other
/// non-2xx reply is a transport failure.
pub fn read_reply(reply: HttpReply, expected: MsgType) -> Result<Envelope, MrpError> {
    let value: Value = match reply.json() {
        Ok(v) => v,
        Err(e) => {
            reply.clone().ensure_success()?;
            return Err(e.into());
        }
    };

    if value.get("msg_type").and_then(Value::as_str) == Some(MsgType::Error.as_str()) {
        let payload = value.get("payload").cloned().unwrap_or(Value::Null);
        return Err(MrpError::provider(payload));
    }

    let reply = reply.ensure_success()?;

    let envelope: Envelope = serde_json::from_value(value)
        .map_err(|e| MrpError::Validation(format!("reply from {}: {e}", reply.url)))?;
    if envelope.msg_type() != expected {
        return Err(MrpError::Validation(format!(
            "expected {expected} from {}, got {}",
            reply.url,
            envelope.msg_type()
        )));
    }
    Ok(envelope)
}

fn first_offer(envelope: &Envelope) -> Result<Offer, MrpError> {
    match &envelope.body {
        Payload::Offer(p) => p
            .offers
            .first()
            .cloned()
            .ok_or_else(|| MrpError::Execution("provider returned no offers".into())),
        other => Err(MrpError::Validation(format!(
            "expected OFFER, got {}",
            other.msg_type()
        ))),
    }
}

fn resolved_job_id(payload: &EvidencePayload, local: &str) -> String {
    payload
        .job_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| local.to_string())
}
