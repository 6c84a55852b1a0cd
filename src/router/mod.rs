//! Client-side routing: ranking reports and end-to-end runs.

pub mod route;
pub mod run;

pub use route::{route, Candidate, Lead, ManifestProbe, RouteReport, RouteRequest, MAX_ROUTE_LIMIT};
pub use run::{
    read_reply, EvidenceBundle, Exchange, Orchestrator, RunError, RunOutcome, RunRequest, RunStep,
    Transcript,
};
