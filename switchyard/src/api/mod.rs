//! Versioned, aliasable HTTP API routing.
//!
//! The API is assembled with an [`ApiBuilder`]: versions group endpoints,
//! endpoints hold one [`Handler`] per [`Method`], and paths are attached with
//! [`mount`](ApiBuilder::mount) or [`alias`](ApiBuilder::alias). Freezing the
//! builder yields a [`Router`] that is shared between request tasks and
//! served by [`ApiServer`].
//!
//! # Path conventions
//!
//! | Binding | Path | Resolves through |
//! |---------|------|------------------|
//! | direct  | `/<version>/<path>` | live endpoint |
//! | alias   | `/<base>/<path>` or `/<path>` | method snapshot |

mod access;
mod alias;
mod builder;
mod endpoint;
mod error;
mod handler;
mod http;
mod method;
mod router;

pub use access::{AccessLevel, AccessPolicy, PublicOnly, RemoteAddrPolicy};
pub use alias::{Alias, AliasTable};
pub use builder::{ApiBuilder, EndpointBuilder};
pub use endpoint::{Endpoint, EndpointRef, Version};
pub use error::BuildError;
pub use handler::{Handler, Reply, RequestContext, SharedHandler};
pub use http::ApiServer;
pub use method::{Method, UnknownMethod};
pub use router::Router;
