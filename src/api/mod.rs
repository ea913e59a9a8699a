//! API Module
//!
//! HTTP gateway exposing the data-access facade to dashboard clients.
//!
//! # Endpoints
//! - `GET /datasets/:dataset` - Read one page through the cache
//! - `POST /datasets/:dataset/refetch` - Force a fresh read
//! - `POST|PATCH|DELETE /datasets/:dataset/records[/:id]` - Writes
//! - `GET /counts` - Monthly counters
//! - `POST /session/logout`, `POST /cache/clear` - Purges
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
