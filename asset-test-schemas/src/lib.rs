pub mod cli_models;
pub mod settings;
pub mod state;

/// Name used for the project prefix when the state document does not carry one
pub const DEFAULT_PROJECT_NAME: &str = "project";

/// File name of the project state inside a test case folder
pub const PROJECT_STATE_FILE_NAME: &str = "project-state.json";
