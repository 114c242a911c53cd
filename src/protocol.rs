//! Wire details of the metadata protocol.

use crate::error::{MetadataError, TransportError};
use crate::retry::Attempt;
use crate::token::TOKEN_HEADER;
use crate::transport::{Method, TransportRequest};

/// User agent sent with every data request.
pub const USER_AGENT: &str = concat!("instance-metadata/", env!("CARGO_PKG_VERSION"));

/// Build the `GET` for `path`, attaching `token` when one was issued.
pub(crate) fn data_request(endpoint: &str, path: &str, token: Option<&str>) -> TransportRequest {
    let request = TransportRequest::new(Method::GET, format!("{endpoint}{path}"))
        .header("User-Agent", USER_AGENT)
        .header("Accept", "*/*")
        .header("Connection", "keep-alive");

    match token {
        Some(token) => request.header(TOKEN_HEADER, token),
        None => request,
    }
}

/// Map one data exchange to a retry decision. `404` means the value is
/// absent, which is an answer rather than a failure.
pub(crate) fn classify_data(outcome: Result<String, TransportError>) -> Attempt<Option<String>> {
    match outcome {
        Ok(body) => Attempt::Success(Some(body)),
        Err(e) if e.is_not_found() => Attempt::Success(None),
        Err(e) if e.is_fatal() => Attempt::Abort(MetadataError::Transport(e)),
        Err(e) => Attempt::Retry(e),
    }
}

/// Turn a response body into items: the whole body when `slurp`, otherwise
/// one item per line in order, empty segments included.
pub(crate) fn split_body(body: String, slurp: bool) -> Vec<String> {
    if slurp {
        vec![body]
    } else {
        body.split('\n').map(str::to_string).collect()
    }
}
