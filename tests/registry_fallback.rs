//! Registry query fallback and the `route` report built on top of it.

use std::path::Path;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mrpd::registry::{RegistryClient, RegistryQuery};
use mrpd::router::{self, ManifestProbe, RouteRequest};

const TIMEOUT: Duration = Duration::from_secs(5);

fn write_bootstrap(dir: &Path) -> String {
    let file = dir.join("registry.json");
    std::fs::write(
        &file,
        json!([
            {"id": "sum-a", "name": "Summarizer A", "manifest_url": "https://a.example/mrp/manifest",
             "capabilities": ["summarize_url"], "policies": ["no_pii"]},
            {"id": "lead", "name": "Indexed", "capabilities": ["summarize_url"]},
            {"id": "tr", "name": "Translator", "manifest_url": "https://t.example/mrp/manifest",
             "capabilities": ["translate"]},
            {"id": "sum-a", "name": "Duplicate", "manifest_url": "https://dup.example/mrp/manifest",
             "capabilities": ["summarize_url"]}
        ])
        .to_string(),
    )
    .unwrap();
    url::Url::from_file_path(&file).unwrap().to_string()
}

#[tokio::test]
async fn failing_registry_falls_back_to_bootstrap_file() {
    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mrp/registry/query"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&registry)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let client =
        RegistryClient::new(&registry.uri(), Some(write_bootstrap(tmp.path())), TIMEOUT).unwrap();

    let resp = client
        .query(&RegistryQuery::new(Some("summarize_url"), None, 10))
        .await
        .unwrap();
    let ids: Vec<&str> = resp.results.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["sum-a"]);
    assert_eq!(resp.results[0].name, "Summarizer A");

    let all = client.query(&RegistryQuery::new(None, None, 10)).await.unwrap();
    let ids: Vec<&str> = all.results.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["sum-a", "tr"]);

    let limited = client.query(&RegistryQuery::new(None, None, 1)).await.unwrap();
    assert_eq!(limited.results.len(), 1);
}

#[tokio::test]
async fn failing_registry_without_bootstrap_is_empty() {
    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&registry)
        .await;

    let client = RegistryClient::new(&registry.uri(), None, TIMEOUT).unwrap();
    let resp = client.query(&RegistryQuery::default()).await.unwrap();
    assert!(resp.results.is_empty());
}

#[tokio::test]
async fn primary_registry_receives_query_parameters() {
    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mrp/registry/query"))
        .and(query_param("capability", "summarize_url"))
        .and(query_param("policy", "no_pii"))
        .and(query_param("limit", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "mrp_version": "0.1",
            "next_page": "cursor-2",
            "results": [{"id": "x", "name": "X", "manifest_url": "https://x/m"}]
        })))
        .expect(1)
        .mount(&registry)
        .await;

    let client = RegistryClient::new(&registry.uri(), None, TIMEOUT).unwrap();
    let resp = client
        .query(&RegistryQuery::new(Some("summarize_url"), Some("no_pii"), 7))
        .await
        .unwrap();
    assert_eq!(resp.next_page.as_deref(), Some("cursor-2"));
    assert_eq!(resp.results.len(), 1);
}

#[tokio::test]
async fn route_report_explains_winner_runners_up_and_leads() {
    let providers = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a/mrp/manifest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "capability": "summarize_url",
            "endpoints": {"discover": "/mrp/discover", "execute": "/mrp/execute"}
        })))
        .mount(&providers)
        .await;
    Mock::given(method("GET"))
        .and(path("/b/mrp/manifest"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&providers)
        .await;

    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mrp/registry/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": "b", "name": "B", "manifest_url": format!("{}/b/mrp/manifest", providers.uri()),
                 "capabilities": ["summarize_url"], "trust": {"score": 0.1}},
                {"id": "a", "name": "A", "manifest_url": format!("{}/a/mrp/manifest", providers.uri()),
                 "capabilities": ["summarize_url"], "trust": {"score": 0.9}},
                {"id": "lead", "name": "Lead", "canonical_id": "canon:lead",
                 "capabilities": ["summarize_url"],
                 "trust": {"level": "third_party_indexed"},
                 "metadata": {"url": "https://lead.example"}}
            ]
        })))
        .mount(&registry)
        .await;

    let client = RegistryClient::new(&registry.uri(), None, TIMEOUT).unwrap();
    let request = RouteRequest {
        intent: "summarize".into(),
        capability: Some("summarize_url".into()),
        policy: None,
        limit: 10,
    };
    let report = router::route(&client, &reqwest::Client::new(), TIMEOUT, &request)
        .await
        .unwrap();

    let winner = report.winner.as_ref().expect("a winner");
    assert_eq!(winner.id, "a");
    assert!(matches!(
        &winner.manifest,
        Some(ManifestProbe::Fetched { capability: Some(c), .. }) if c == "summarize_url"
    ));

    assert_eq!(report.runners_up.len(), 1);
    assert_eq!(report.runners_up[0].id, "b");
    assert_eq!(report.runners_up[0].loss_reason.as_deref(), Some("lower trust score"));
    assert!(matches!(report.runners_up[0].manifest, Some(ManifestProbe::Failed { .. })));

    assert_eq!(report.leads.len(), 1);
    assert_eq!(report.leads[0].canonical_id.as_deref(), Some("canon:lead"));
    assert_eq!(report.leads[0].url.as_deref(), Some("https://lead.example"));

    let text = report.render();
    assert!(text.contains("Winner: score=59.00 id=a name=A"));
    assert!(text.contains("why lost: lower trust score"));
    assert!(text.contains("manifest fetch FAILED"));
    assert!(text.contains("trust.level: third_party_indexed"));
}

#[tokio::test]
async fn route_requeries_unfiltered_when_filters_match_nothing() {
    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mrp/registry/query"))
        .and(query_param("capability", "nothing_has_this"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/mrp/registry/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": "t", "name": "T", "manifest_url": "http://127.0.0.1:9/m",
                         "capabilities": ["translate"]}]
        })))
        .mount(&registry)
        .await;

    let client = RegistryClient::new(&registry.uri(), None, TIMEOUT).unwrap();
    let request = RouteRequest {
        intent: "anything".into(),
        capability: Some("nothing_has_this".into()),
        policy: None,
        limit: 5,
    };
    let report = router::route(&client, &reqwest::Client::new(), TIMEOUT, &request)
        .await
        .unwrap();

    assert!(report.requeried_unfiltered);
    assert!(!report.has_winner());
    assert_eq!(report.near_misses.len(), 1);
    assert_eq!(report.near_misses[0].missing, vec!["capability:nothing_has_this".to_string()]);
}
