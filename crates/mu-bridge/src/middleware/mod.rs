//! HTTP middleware for the bridge.
//!
//! Layer order: Request → CORS → Trace → Handler

pub mod cors;

pub use cors::create_cors_layer;
