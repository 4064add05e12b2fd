use serde::{Deserialize, Serialize};

/// Runtime limits and search paths. Deserialisable so hosts can keep it in
/// their own configuration files; missing fields take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of Lua call frames on one thread.
    pub max_call_depth: usize,
    /// Maximum nesting of Rust-level re-entries (metamethods, `pcall`,
    /// `resume`, `require` loaders).
    pub max_native_depth: usize,
    /// `;`-separated templates used by the source searcher; `?` is replaced
    /// by the module name with dots turned into `/`.
    pub package_path: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 200_000,
            max_native_depth: 200,
            package_path: "?.lua;?/init.lua".to_owned(),
        }
    }
}
