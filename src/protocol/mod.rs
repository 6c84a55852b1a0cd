pub mod envelope;
pub mod request;
pub mod response;

pub use envelope::{
    new_envelope, new_msg_id, utc_now_rfc3339, Envelope, EnvelopeMeta, MsgType, Party, Payload,
    MRP_CONTENT_TYPE, MRP_VERSION,
};
pub use request::{
    find_url_input, Constraints, DiscoverPayload, ExecutePayload, HelloPayload, InputItem, JobRef,
    NegotiatePayload,
};
pub use response::{
    new_error_envelope, ArtifactRef, Cost, Declared, ErrorPayload, EvidencePayload, Latency, MrpErrorCode,
    Offer, OfferPayload, OutputItem, Provenance, RiskDisclosure, Usage, SERVICE_ID,
};
