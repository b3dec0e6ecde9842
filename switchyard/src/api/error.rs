//! Errors raised while building an API.

use super::EndpointRef;

/// Misuse of the build-phase API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// An endpoint was requested before any version was opened.
    #[error("no version is open; call version() before endpoint()")]
    NoOpenVersion,

    /// Endpoint names must be non-empty.
    #[error("endpoint name must not be empty")]
    EmptyEndpointName,

    /// The referenced endpoint was never created.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(EndpointRef),

    /// The path is already taken by a route of a different kind or target.
    #[error("route {0} collides with an existing route")]
    RouteCollision(String),
}
