pub mod identity;

pub use identity::{Claims, Identity, IdentityResolver};
