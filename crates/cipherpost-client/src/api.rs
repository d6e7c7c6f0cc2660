//! The seam between the session and whatever carries requests to the relay.

use std::sync::Arc;

use async_trait::async_trait;
use cipherpost_proto::{Request, RequestKind, Response};

use crate::error::ClientError;

/// One request, one response.
///
/// Implementations report connection problems as
/// [`ClientError::Transport`]. An error *response* from the relay is a
/// successful call; [`expect_ok`] turns it into an error.
#[async_trait]
pub trait RelayApi: Send + Sync {
    /// Send `request` and wait for its response.
    async fn call(&self, request: Request) -> Result<Response, ClientError>;
}

#[async_trait]
impl<T: RelayApi + ?Sized> RelayApi for Arc<T> {
    async fn call(&self, request: Request) -> Result<Response, ClientError> {
        (**self).call(request).await
    }
}

/// Map an error response to [`ClientError::Relay`].
pub fn expect_ok(kind: RequestKind, response: Response) -> Result<Response, ClientError> {
    match response.error_reason() {
        None => Ok(response),
        Some(reason) => Err(ClientError::Relay { request: kind.as_str(), reason: reason.to_string() }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn error_response_becomes_relay_error() {
        let result = expect_ok(RequestKind::GetKey, Response::error("not found"));

        assert!(matches!(
            result,
            Err(ClientError::Relay { request: "get_key", reason }) if reason == "not found"
        ));
    }

    #[test]
    fn ok_response_passes_through() {
        let response = expect_ok(RequestKind::SendBlob, Response::ack("stored")).unwrap();
        assert_eq!(response.message.as_deref(), Some("stored"));
    }
}
