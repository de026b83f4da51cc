//! Interception hook forwarded to the HTTP/1.1 transports.

use bytes::Bytes;

use crate::response::Response;

/// Man-in-the-middle collaborator.
///
/// The negotiator never looks at it. The plaintext and fallback HTTP/1.1
/// transports call the hooks around every exchange, which lets an external
/// component inspect or rewrite traffic without owning the connection.
pub trait Interceptor: Send + Sync {
    /// Called before the request is written to the connection.
    fn on_request(&self, _request: &mut http::Request<Bytes>) {}

    /// Called once the response body has been read.
    fn on_response(&self, _response: &Response) {}
}
