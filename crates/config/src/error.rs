/// Errors raised while loading or validating `Settings`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The configuration file couldn't be opened.
    #[error("Failed to open configuration file: {0}")]
    ConfigOpen(#[from] std::io::Error),
    /// The configuration file's TOML failed to parse into `Settings`.
    #[error("Failed to parse configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),
    /// A `{{ env.VAR }}` placeholder referenced an environment variable that isn't set.
    #[error("At {path} failed substituting environment variable: {reason}")]
    EnvVarSubstitution { path: String, reason: String },
}
