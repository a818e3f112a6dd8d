/// Environment variable naming the module address.
///
/// Read at build time for the default and again by [`BridgeConfig::from_env`].
pub const MODULE_URL_ENV: &str = "TEJX_COMPILER_WASM_URL";

/// Module address used when nothing else is configured.
pub const DEFAULT_MODULE_URL: &str = match option_env!("TEJX_COMPILER_WASM_URL") {
    Some(url) => url,
    None => "http://127.0.0.1:8080/tejxc_wasm.wasm",
};

/// Bridge configuration. The module address is the only recognized option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub module_url: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            module_url: DEFAULT_MODULE_URL.to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn new(module_url: impl Into<String>) -> Self {
        Self {
            module_url: module_url.into(),
        }
    }

    /// Build-time default, overridden by `TEJX_COMPILER_WASM_URL` when set
    /// to a non-empty value.
    pub fn from_env() -> Self {
        match std::env::var(MODULE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        }
    }
}
