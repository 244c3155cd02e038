// Content sniffing: sanity checks applied before bytes are trusted as a ROM.

pub mod rom;
