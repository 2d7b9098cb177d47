//! Non-blocking cross-partition requests.
//!
//! A caller creates a request through [`RemoteEndpoint::request`] and
//! gets back an unresolved [`Promise`]. Requests are never answered
//! inline: they wait for the collective
//! [`maintain()`](RemoteEndpoint::maintain) phase at the end of the
//! tick, where every rank dispatches the requests addressed to it and
//! ships the answers back. A promise created during tick `T` is
//! therefore unready for the rest of tick `T` and ready from `T + 1`.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod endpoint;
pub mod error;
pub mod promise;

pub use endpoint::{
    MaintainReport, NoFields, RemoteEndpoint, RemoteObject, Responder, Routed, Target,
};
pub use error::{PromiseError, RemoteError};
pub use promise::{Promise, PromiseId};
