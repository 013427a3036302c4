//! User profile domain.

mod profile;

pub use profile::UserProfile;
