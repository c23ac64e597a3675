//! This mod is meant to hold the library's client-facing configuration.
mod options;

pub use options::ConsensusOptions;

pub(crate) use options::ConsensusOptionsValidated;
