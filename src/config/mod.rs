// Configuration module
// Public interface for configuration loading

mod loader;
mod settings;
pub mod templates;

pub use loader::{apply_env, config_path, load_config, load_config_from};
pub use settings::{
    Config, ConfirmationConfig, ConfluenceConfig, ConfluenceCredentials, JiraConfig, RequirementsConfig,
    SearchConfig,
};
pub use templates::ResponseTemplates;
