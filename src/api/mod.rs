//! Client-facing HTTP API

pub mod meta_http;

pub use meta_http::create_meta_router;
