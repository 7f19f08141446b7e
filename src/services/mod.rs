pub mod identity;
pub mod media_service;
pub mod reconcile;
