//! End-to-end `run` tests: registry selection, DISCOVER → EXECUTE against a
//! provider, and the evidence bundle left behind.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use mrpd::config::MrpConfig;
use mrpd::error::{MrpError, NotFoundError};
use mrpd::handlers::ProviderState;
use mrpd::protocol::{
    Declared, Envelope, EvidencePayload, MsgType, Offer, OfferPayload, Payload, MRP_CONTENT_TYPE,
};
use mrpd::registry::RegistryClient;
use mrpd::router::{EvidenceBundle, Orchestrator, RunRequest, RunStep};
use mrpd::server;
use mrpd::store::ArtifactStore;

fn test_config(home: &Path, registry: &str) -> MrpConfig {
    let mut config = MrpConfig::with_home(home).with_uniform_timeout(Duration::from_secs(10));
    config.registry_base = registry.to_string();
    config.bootstrap_raw = None;
    config
}

fn orchestrator(config: &MrpConfig) -> Orchestrator {
    let registry = RegistryClient::from_config(config).unwrap();
    Orchestrator::new(config, registry).unwrap()
}

fn run_request(url: &str, manifest_url: Option<String>) -> RunRequest {
    RunRequest {
        intent: "summarize this page".into(),
        url: url.to_string(),
        capability: "summarize_url".into(),
        policy: Some("no_pii".into()),
        manifest_url,
        max_tokens: Some(800),
        max_cost: None,
    }
}

fn evidence_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

async fn spawn_server(state: ProviderState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve_listener(listener, state, std::future::pending()));
    addr
}

/// Answers envelope requests with a correlated reply built from the request.
struct EnvelopeReply(fn(&Envelope) -> Payload);

impl Respond for EnvelopeReply {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let env: Envelope = serde_json::from_slice(&request.body).unwrap();
        let reply = Envelope::reply_to(&env, (self.0)(&env), "service:mock");
        ResponseTemplate::new(200)
            .set_body_raw(serde_json::to_vec(&reply).unwrap(), MRP_CONTENT_TYPE)
    }
}

/// Answers with a hand-written payload of type `msg_type`, correlated to
/// the request but never passed through the crate's own types.
struct RawReply {
    msg_type: &'static str,
    payload: Value,
}

impl Respond for RawReply {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let env: Value = serde_json::from_slice(&request.body).unwrap();
        let reply = json!({
            "mrp_version": "0.1",
            "msg_id": format!("reply-{}", env["msg_id"].as_str().unwrap()),
            "msg_type": self.msg_type,
            "timestamp": "2025-01-01T00:00:00Z",
            "sender": {"id": "service:raw"},
            "in_reply_to": env["msg_id"],
            "payload": self.payload.clone()
        });
        ResponseTemplate::new(200)
            .set_body_raw(serde_json::to_vec(&reply).unwrap(), MRP_CONTENT_TYPE)
    }
}

fn mock_offer(_: &Envelope) -> Payload {
    Payload::Offer(OfferPayload {
        offers: vec![Offer {
            route_id: Some("route:mock/summarize@1".into()),
            capability: Some("summarize_url".into()),
            confidence: Some(0.5),
            cost: None,
            latency: None,
            proofs: Vec::new(),
            policy: vec!["no_pii".into()],
            risk: None,
            endpoint: None,
            extra: Default::default(),
        }],
        extra: Default::default(),
    })
}

fn empty_evidence(_: &Envelope) -> Payload {
    Payload::Evidence(EvidencePayload::default())
}

/// Provider whose manifest publishes root-relative endpoints.
async fn mock_provider() -> MockServer {
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mrp/manifest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "capability": "summarize_url",
            "endpoints": {"discover": "/mrp/discover", "execute": "/mrp/execute"}
        })))
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/mrp/discover"))
        .respond_with(EnvelopeReply(mock_offer))
        .mount(&provider)
        .await;
    provider
}

#[tokio::test]
async fn run_against_builtin_server_writes_evidence() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/post"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                "<html><body><p>Routing   with <b>evidence</b></p></body></html>",
                "text/html; charset=utf-8",
            ),
        )
        .mount(&site)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), "http://127.0.0.1:9");
    let addr = spawn_server(ProviderState {
        fetch_client: reqwest::Client::new(),
        artifacts: ArtifactStore::new(tmp.path().join("served")),
        fetch_timeout: Duration::from_secs(5),
    })
    .await;

    let page = format!("{}/post", site.uri());
    let manifest_url = format!("http://{addr}/mrp/manifest");
    let outcome = orchestrator(&config)
        .run(&run_request(&page, Some(manifest_url.clone())))
        .await
        .expect("run should succeed");

    assert_eq!(outcome.manifest_url, manifest_url);
    assert_eq!(outcome.offer.route_id.as_deref(), Some(mrpd::provider::ROUTE_ID));
    assert_eq!(outcome.evidence.msg_type(), MsgType::Evidence);
    assert_eq!(outcome.bundle_path, config.evidence_dir.join(format!("{}.json", outcome.job_id)));

    let bundle: EvidenceBundle =
        serde_json::from_str(&std::fs::read_to_string(&outcome.bundle_path).unwrap()).unwrap();
    assert_eq!(bundle.job_id, outcome.job_id);
    assert_eq!(bundle.transcript.intent, "summarize this page");
    assert_eq!(bundle.transcript.policy.as_deref(), Some("no_pii"));

    let discover = &bundle.transcript.discover;
    assert_eq!(discover.endpoint, format!("http://{addr}/mrp/discover"));
    assert_eq!(discover.request.msg_type, MsgType::Discover);
    assert_eq!(discover.response.msg_type, MsgType::Offer);
    assert_eq!(discover.response.in_reply_to.as_deref(), Some(discover.request.msg_id.as_str()));

    let execute = &bundle.transcript.execute;
    assert_eq!(execute.request.msg_type, MsgType::Execute);
    assert_eq!(execute.response.in_reply_to.as_deref(), Some(execute.request.msg_id.as_str()));
    assert!(execute.request.in_reply_to.is_none());

    assert_eq!(bundle.artifact_refs.len(), 1);
    assert!(bundle.artifact_refs[0].is_artifact());
    assert_eq!(bundle.evidence_envelope, outcome.evidence);

    let Payload::Evidence(evidence) = &outcome.evidence.body else {
        panic!("expected EVIDENCE, got {}", outcome.evidence.msg_type());
    };
    assert_eq!(
        evidence.outputs[0].fields["value"],
        "## Summary\n\nRouting with evidence\n"
    );
}

#[tokio::test]
async fn provider_declaring_other_shapes_still_completes() {
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mrp/manifest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "endpoints": {"discover": "/mrp/discover", "execute": "/mrp/execute"}
        })))
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/mrp/discover"))
        .respond_with(RawReply {
            msg_type: "OFFER",
            payload: json!({
                "offers": [{"route_id": "route:p/x@1", "cost": 0, "latency": {"p50": 200}}]
            }),
        })
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/mrp/execute"))
        .respond_with(RawReply {
            msg_type: "EVIDENCE",
            payload: json!({
                "job_id": "job-raw",
                "outputs": [{"type": "markdown", "value": "done"}],
                "usage": {"tokens_in_est": 10},
                "provenance": {"citations": ["u"]}
            }),
        })
        .mount(&provider)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), "http://127.0.0.1:9");
    let outcome = orchestrator(&config)
        .run(&run_request(
            "https://example.com",
            Some(format!("{}/mrp/manifest", provider.uri())),
        ))
        .await
        .expect("run should succeed");

    assert_eq!(outcome.job_id, "job-raw");
    assert_eq!(outcome.offer.route_id.as_deref(), Some("route:p/x@1"));
    assert_eq!(outcome.offer.cost, Some(Declared::Raw(json!(0))));

    let bundle: Value =
        serde_json::from_str(&std::fs::read_to_string(&outcome.bundle_path).unwrap()).unwrap();
    let payload = &bundle["evidence_envelope"]["payload"];
    assert_eq!(payload["usage"], json!({"tokens_in_est": 10}));
    assert_eq!(payload["provenance"], json!({"citations": ["u"]}));
}

#[tokio::test]
async fn well_known_document_points_at_the_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let addr = spawn_server(ProviderState {
        fetch_client: reqwest::Client::new(),
        artifacts: ArtifactStore::new(tmp.path()),
        fetch_timeout: Duration::from_secs(5),
    })
    .await;

    let doc: Value = reqwest::get(format!("http://{addr}/.well-known/mrp.json"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(doc["mrp_version"], "0.1");
    assert_eq!(doc["manifest_url"], "/mrp/manifest");
    assert_eq!(doc["capabilities"], json!(["registry_query", "route", "validate"]));
}

#[tokio::test]
async fn empty_outputs_still_write_a_bundle() {
    let provider = mock_provider().await;
    Mock::given(method("POST"))
        .and(path("/mrp/execute"))
        .respond_with(EnvelopeReply(empty_evidence))
        .mount(&provider)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), "http://127.0.0.1:9");
    let outcome = orchestrator(&config)
        .run(&run_request(
            "https://example.com",
            Some(format!("{}/mrp/manifest", provider.uri())),
        ))
        .await
        .expect("run should succeed");

    let bundle: EvidenceBundle =
        serde_json::from_str(&std::fs::read_to_string(&outcome.bundle_path).unwrap()).unwrap();
    assert!(bundle.artifact_refs.is_empty());

    // No job_id in the reply: the locally generated id from the EXECUTE request is used.
    let sent: Vec<Value> = provider
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/mrp/execute")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["payload"]["job"]["id"], outcome.job_id.as_str());
    assert_eq!(sent[0]["payload"]["route_id"], "route:mock/summarize@1");
    assert_eq!(sent[0]["payload"]["output_format"], "markdown");
}

#[tokio::test]
async fn provider_error_is_preserved_and_nothing_is_written() {
    let provider = mock_provider().await;
    let error_payload = json!({
        "code": "MRP_INTERNAL_ERROR",
        "message": "upstream timed out",
        "retryable": true,
        "retry_after_ms": 2000
    });
    Mock::given(method("POST"))
        .and(path("/mrp/execute"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "mrp_version": "0.1",
            "msg_id": "err-1",
            "msg_type": "ERROR",
            "timestamp": "2025-01-01T00:00:00Z",
            "sender": {"id": "service:mock"},
            "payload": error_payload.clone()
        })))
        .mount(&provider)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), "http://127.0.0.1:9");
    let err = orchestrator(&config)
        .run(&run_request(
            "https://example.com",
            Some(format!("{}/mrp/manifest", provider.uri())),
        ))
        .await
        .unwrap_err();

    assert_eq!(err.step, RunStep::ExecuteSent);
    match err.source {
        MrpError::Provider { code, payload, .. } => {
            assert_eq!(code, "MRP_INTERNAL_ERROR");
            assert_eq!(payload, error_payload);
        }
        other => panic!("expected provider error, got {other:?}"),
    }
    assert_eq!(evidence_files(&config.evidence_dir), 0);
}

#[tokio::test]
async fn offer_without_route_id_fails_at_offer_received() {
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mrp/manifest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "endpoints": {"discover": "/mrp/discover", "execute": "/mrp/execute"}
        })))
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/mrp/discover"))
        .respond_with(EnvelopeReply(|_| {
            Payload::Offer(OfferPayload {
                offers: vec![Offer {
                    route_id: None,
                    capability: None,
                    confidence: None,
                    cost: None,
                    latency: None,
                    proofs: Vec::new(),
                    policy: Vec::new(),
                    risk: None,
                    endpoint: None,
                    extra: Default::default(),
                }],
                extra: Default::default(),
            })
        }))
        .mount(&provider)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), "http://127.0.0.1:9");
    let err = orchestrator(&config)
        .run(&run_request(
            "https://example.com",
            Some(format!("{}/mrp/manifest", provider.uri())),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.step, RunStep::OfferReceived);
    assert!(matches!(err.source, MrpError::Execution(_)));
}

#[tokio::test]
async fn file_manifest_with_root_relative_endpoints_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest_path = tmp.path().join("manifest.json");
    std::fs::write(
        &manifest_path,
        json!({"endpoints": {"discover": "/mrp/discover", "execute": "/mrp/execute"}}).to_string(),
    )
    .unwrap();
    let manifest_url = url::Url::from_file_path(&manifest_path).unwrap().to_string();

    let config = test_config(tmp.path(), "http://127.0.0.1:9");
    let err = orchestrator(&config)
        .run(&run_request("https://example.com", Some(manifest_url)))
        .await
        .unwrap_err();

    assert_eq!(err.step, RunStep::SelectProvider);
    assert!(matches!(err.source, MrpError::Configuration(_)), "{:?}", err.source);
}

#[tokio::test]
async fn manifest_without_execute_endpoint_is_a_configuration_error() {
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mrp/manifest"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"endpoints": {"discover": "/d"}})),
        )
        .mount(&provider)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), "http://127.0.0.1:9");
    let err = orchestrator(&config)
        .run(&run_request(
            "https://example.com",
            Some(format!("{}/mrp/manifest", provider.uri())),
        ))
        .await
        .unwrap_err();

    assert_eq!(err.step, RunStep::SelectProvider);
    match err.source {
        MrpError::Configuration(msg) => assert!(msg.contains("endpoints.execute")),
        other => panic!("expected configuration error, got {other:?}"),
    }
}

#[tokio::test]
async fn registry_selection_routes_to_top_satisfied_entry() {
    let provider = mock_provider().await;
    Mock::given(method("POST"))
        .and(path("/mrp/execute"))
        .respond_with(EnvelopeReply(empty_evidence))
        .mount(&provider)
        .await;

    let registry = MockServer::start().await;
    let good_manifest = format!("{}/mrp/manifest", provider.uri());
    Mock::given(method("GET"))
        .and(path("/mrp/registry/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mrp_version": "0.1",
            "results": [
                {"id": "lead", "name": "Indexed lead", "capabilities": ["summarize_url"],
                 "policies": ["no_pii"], "trust": {"score": 1.0}},
                {"id": "weak", "name": "Weak", "manifest_url": "http://127.0.0.1:9/mrp/manifest",
                 "capabilities": ["summarize_url"], "policies": ["no_pii"], "trust": {"score": 0.1}},
                {"id": "strong", "name": "Strong", "manifest_url": good_manifest,
                 "capabilities": ["summarize_url"], "policies": ["no_pii"], "trust": {"score": 0.9}}
            ]
        })))
        .mount(&registry)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), &registry.uri());
    let outcome = orchestrator(&config)
        .run(&run_request("https://example.com", None))
        .await
        .expect("run should succeed");

    assert_eq!(outcome.manifest_url, good_manifest);
}

#[tokio::test]
async fn unsatisfied_registry_candidates_are_reported_as_near_misses() {
    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mrp/registry/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": "translator", "name": "Translator", "manifest_url": "https://t/m",
                 "capabilities": ["translate"], "policies": ["no_pii"]}
            ]
        })))
        .mount(&registry)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), &registry.uri());
    let err = orchestrator(&config)
        .run(&run_request("https://example.com", None))
        .await
        .unwrap_err();

    assert_eq!(err.step, RunStep::SelectProvider);
    match err.source {
        MrpError::NotFound(NotFoundError::NoneSatisfied { near_misses }) => {
            assert_eq!(near_misses.len(), 1);
            assert_eq!(near_misses[0].id, "translator");
            assert_eq!(near_misses[0].missing, vec!["capability:summarize_url".to_string()]);
        }
        other => panic!("expected near misses, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_registry_is_no_candidates() {
    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mrp/registry/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .mount(&registry)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path(), &registry.uri());
    let err = orchestrator(&config)
        .run(&run_request("https://example.com", None))
        .await
        .unwrap_err();

    assert!(matches!(
        err.source,
        MrpError::NotFound(NotFoundError::NoCandidates)
    ));
}
