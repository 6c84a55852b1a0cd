use crate::protocol::{
    new_msg_id, Envelope, ErrorPayload, EvidencePayload, ExecutePayload, MrpErrorCode, Payload,
    SERVICE_ID,
};
use crate::provider::{self, ProviderError};

use super::{error_reply, ProviderState};

/// Handle an `EXECUTE` for the built-in route.
pub async fn handle(request: &Envelope, payload: &ExecutePayload, state: &ProviderState) -> Envelope {
    if payload.route_id != provider::ROUTE_ID {
        return error_reply(
            request,
            ErrorPayload::new(
                MrpErrorCode::MrpInvalidRequest,
                format!("unknown route_id: {}", payload.route_id),
            ),
        );
    }

    let job_id = payload
        .job
        .as_ref()
        .map(|job| job.id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(new_msg_id);

    let execution = match provider::execute_summarize_url(
        &payload.inputs,
        &state.fetch_client,
        &state.artifacts,
        state.fetch_timeout,
    )
    .await
    {
        Ok(execution) => execution,
        Err(ProviderError::MissingInput) => {
            return error_reply(
                request,
                ErrorPayload::new(MrpErrorCode::MrpInvalidRequest, "missing url input"),
            );
        }
        Err(e) => {
            tracing::warn!(%job_id, error = %e, "execution failed");
            return error_reply(
                request,
                ErrorPayload::new(MrpErrorCode::MrpInternalError, e.to_string()),
            );
        }
    };

    tracing::info!(%job_id, outputs = execution.outputs.len(), "execution complete");

    Envelope::reply_to(
        request,
        Payload::Evidence(EvidencePayload {
            job_id: Some(job_id),
            outputs: execution.outputs,
            provenance: Some(execution.provenance.into()),
            usage: Some(execution.usage.into()),
            extra: Default::default(),
        }),
        SERVICE_ID,
    )
}
