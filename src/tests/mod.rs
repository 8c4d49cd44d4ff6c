//! Cross-module scenario tests exercising whole chainsetups end to end,
//! one concern per submodule (spec §0.5). Unit tests for a single module's
//! internals live next to that module instead.

mod fan_in;
mod fan_out;
mod multitrack_latency;
mod single_chain;
