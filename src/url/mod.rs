//! URL handling module
//!
//! Canonicalization for deduplication and resolution of page links against
//! the page they were found on.

mod canonicalize;
mod resolve;

pub use canonicalize::{canonicalize, canonicalize_url, parse_canonical};
pub use resolve::resolve_link;
