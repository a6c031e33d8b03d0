//! Job decoder: raw message body -> validated [`JobRequest`].

use crate::domain::{DecodeError, JobRequest};

/// Parse and validate one message body.
///
/// Failure here is a handled outcome, never a crash: the consumer rejects the
/// delivery without requeue and moves on to the next one.
pub fn decode(body: &[u8]) -> Result<JobRequest, DecodeError> {
    let request: JobRequest = serde_json::from_slice(body)?;

    if request.input_data.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    // JSON cannot encode NaN or infinity, and serde_json rejects out-of-range
    // literals like 1e999 with "number out of range", so parsed features are
    // always finite.
    Ok(request)
}
