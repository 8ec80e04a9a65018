//! Output naming: title sanitization and placeholder-based path reservation.

mod allocator;
mod sanitize;

pub use allocator::NameAllocator;
pub use sanitize::{sanitize_title, FALLBACK_STEM, MAX_STEM_BYTES};
