//! Session and token service for TokMesh
//!
//! The stateless façade the HTTP surface calls into. It validates inputs,
//! mints tokens, drives the storage engine, and converts storage errors
//! into the domain taxonomy. The wire envelope and API-key store live here
//! too; binding them to a network is the HTTP collaborator's concern.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod apikeys;
mod envelope;
mod sessions;

pub use apikeys::{ApiKeyStore, CreatedApiKey, MemoryApiKeyStore};
pub use envelope::{new_request_id, Envelope};
pub use sessions::{
    CreateSessionRequest, CreateSessionResponse, SessionService, TokenValidation,
};
