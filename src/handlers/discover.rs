use crate::protocol::{DiscoverPayload, Envelope, OfferPayload, Payload, SERVICE_ID};
use crate::provider;

/// Handle a `DISCOVER` with the built-in provider's offers.
pub async fn handle(request: &Envelope, payload: &DiscoverPayload) -> Envelope {
    let offers = provider::offers_for_discover(payload);
    tracing::debug!(intent = %payload.intent, offers = offers.len(), "answering discover");

    Envelope::reply_to(
        request,
        Payload::Offer(OfferPayload {
            offers,
            extra: Default::default(),
        }),
        SERVICE_ID,
    )
}
