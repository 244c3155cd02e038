// HTTP hosting for page assets and ROM images.

pub mod handler;
