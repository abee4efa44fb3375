//! Authentication mechanisms

mod scram;

pub use scram::{ScramClient, ScramError, ScramState, SCRAM_SHA_256};
