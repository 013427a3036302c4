//! HTTP adapters: routers, handlers, DTOs, and middleware.

pub mod middleware;
pub mod subscription;
