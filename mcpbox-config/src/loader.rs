//! Environment lookup abstraction
//!
//! Config domains read from an [`EnvLookup`] rather than `std::env`
//! directly, so tests can inject maps instead of mutating process state.

use std::collections::HashMap;

/// Source of environment variables.
pub trait EnvLookup {
    fn get(&self, key: &str) -> Option<String>;
}

/// The real process environment.
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Lookup against the process environment.
pub fn env_lookup() -> ProcessEnv {
    ProcessEnv
}
