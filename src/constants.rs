//! Central Configuration Constants
//!
//! Single source of truth for defaults that come from the environment.
//! Thresholds and scheduler sizes live in `logic::config` instead, because
//! those are hot-reloadable.

use std::path::PathBuf;

/// Default ONNX classifier location (relative to the working directory)
pub const DEFAULT_MODEL_PATH: &str = "models/garment_classifier.onnx";

/// Config file name inside the per-user config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Directory name used under the platform config dir
pub const APP_DIR_NAME: &str = "image-risk";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "Image Risk Core";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get ONNX model path from environment or use default
pub fn get_model_path() -> String {
    std::env::var("IMAGE_RISK_MODEL")
        .unwrap_or_else(|_| DEFAULT_MODEL_PATH.to_string())
}

/// Get runtime config path from environment or use the per-user default
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("IMAGE_RISK_CONFIG") {
        return PathBuf::from(path);
    }

    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

/// Diagnostics gate. The moderation bypass flag is ignored unless this is set.
pub fn is_diagnostics_enabled() -> bool {
    std::env::var("IMAGE_RISK_DIAGNOSTICS")
        .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
