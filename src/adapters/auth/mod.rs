//! Authentication adapters for the `SessionValidator` port.

pub mod jwt;
pub mod mock;

pub use jwt::{JwtConfig, JwtSessionValidator};
pub use mock::MockSessionValidator;
