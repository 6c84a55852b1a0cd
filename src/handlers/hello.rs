use crate::protocol::{Envelope, HelloPayload, Payload, SERVICE_ID};

/// Handle a `HELLO`: advertise the supported schema versions.
pub async fn handle(request: &Envelope) -> Envelope {
    Envelope::reply_to(request, Payload::Hello(HelloPayload::ok()), SERVICE_ID)
}
