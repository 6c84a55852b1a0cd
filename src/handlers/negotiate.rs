use crate::protocol::{Envelope, ErrorPayload, MrpErrorCode};

use super::error_reply;

/// Handle a `NEGOTIATE`: recognized, not supported in this version.
pub async fn handle(request: &Envelope) -> Envelope {
    error_reply(
        request,
        ErrorPayload::new(
            MrpErrorCode::MrpNotImplemented,
            "negotiation is not implemented; take an offer from DISCOVER as-is",
        ),
    )
}
