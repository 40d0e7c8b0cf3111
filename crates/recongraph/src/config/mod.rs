pub mod loader;
pub mod schema;

pub use loader::{load_settings, load_settings_from_str, load_settings_or_default, SettingsFormat};
pub use schema::{LogFormat, LoggingConfig, ReplayPolicy, ScanSettings, Settings, ToolSettings};
