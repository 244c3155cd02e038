// ROM source abstraction: where image bytes come from when the cache misses.

pub mod http_source;
pub mod traits;
