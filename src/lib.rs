//! Media storage subsystem for the fitness app: a storage gateway that
//! authenticates callers against an external identity provider, enforces
//! per-user ownership of object keys, streams blobs in and out of local
//! storage, and keeps a SQLite index of what each user owns — plus the
//! client-side upload orchestrator that delivers files to it reliably.

pub mod client;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod policy;
pub mod routes;
pub mod services;
