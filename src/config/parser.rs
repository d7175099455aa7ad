//! Declaration file parser.
//!
//! This module loads stack declarations from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result, SkyformError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::StackFile;

/// Parser for stack declaration files.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads declarations from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackFile> {
        let path = path.as_ref();
        info!("Loading declarations from: {}", path.display());

        if !path.exists() {
            return Err(SkyformError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::parse_at(format!("Failed to read file: {e}"), path.display().to_string())
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses declarations from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackFile> {
        debug!("Parsing YAML declarations");

        let stack: StackFile = serde_yaml::from_str(content).map_err(|e| {
            let file = source.map_or_else(|| String::from("<input>"), |p| p.display().to_string());
            let location = match e.location() {
                Some(at) => format!("{file}:{}:{}", at.line(), at.column()),
                None => file,
            };
            ConfigError::parse_at(format!("YAML parse error: {e}"), location)
        })?;

        debug!(
            "Parsed stack '{}' with {} resources",
            stack.stack.name,
            stack.resources.len()
        );
        Ok(stack)
    }

    /// Loads declarations with environment variable overrides.
    ///
    /// Environment variables use the form `SKYFORM_<SECTION>_<KEY>`
    /// (e.g., `SKYFORM_STACK_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// is malformed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StackFile> {
        let mut stack = self.load_file(path)?;
        apply_overrides(&mut stack, |name| std::env::var(name).ok())?;
        Ok(stack)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ConfigError::parse_at(
                    format!("Failed to load .env file: {e}"),
                    env_path.display().to_string(),
                )
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Applies `SKYFORM_*` overrides read through `lookup`.
///
/// # Errors
///
/// Returns `InvalidEnvVar` if `SKYFORM_PARALLELISM` is not a number.
pub fn apply_overrides<F>(stack: &mut StackFile, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(name) = lookup("SKYFORM_STACK_NAME") {
        debug!("Overriding stack.name from environment");
        stack.stack.name = name;
    }

    if let Some(env) = lookup("SKYFORM_STACK_ENVIRONMENT") {
        debug!("Overriding stack.environment from environment");
        stack.stack.environment = env;
    }

    if let Some(bucket) = lookup("SKYFORM_STATE_BUCKET") {
        debug!("Overriding state.bucket from environment");
        stack.state.bucket = Some(bucket);
    }

    if let Some(prefix) = lookup("SKYFORM_STATE_PREFIX") {
        debug!("Overriding state.prefix from environment");
        stack.state.prefix = Some(prefix);
    }

    if let Some(raw) = lookup("SKYFORM_PARALLELISM") {
        debug!("Overriding execution.parallelism from environment");
        stack.execution.parallelism = raw.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
            name: String::from("SKYFORM_PARALLELISM"),
        })?;
    }

    Ok(())
}

/// Default declaration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["skyform.stack.yaml", "skyform.yaml", "stack.yaml"];

/// Finds the declaration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no declaration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found declaration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(SkyformError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderType, StateBackend};
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_file() {
        let yaml = r"
stack:
  name: site
";
        let stack = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(stack.stack.name, "site");
        assert_eq!(stack.stack.environment, "dev");
        assert_eq!(stack.state.backend, StateBackend::Local);
        assert_eq!(stack.provider.provider_type, ProviderType::Simulated);
        assert_eq!(stack.execution.parallelism, 4);
        assert!(stack.resources.is_empty());
    }

    #[test]
    fn test_parse_full_file() {
        let yaml = r#"
stack:
  name: cognito-example
  environment: prod
state:
  backend: s3
  bucket: skyform-state
  prefix: cognito/prod
provider:
  type: command
  program: ./provider.sh
  args: [--region, eu-west-1]
execution:
  parallelism: 2
resources:
  - id: bucket
    kind: storage.bucket
    inputs:
      encryption: s3_managed
      versioned: true
    outputs: [arn]
  - id: pool
    kind: identity.user_pool
    removal_policy: retain
    inputs:
      email_body: "Verify at https://${cdn.domain_name}/verify"
"#;
        let stack = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(stack.state.bucket.as_deref(), Some("skyform-state"));
        assert_eq!(stack.provider.args, vec!["--region", "eu-west-1"]);
        assert_eq!(stack.execution.parallelism, 2);
        assert_eq!(stack.resource_ids(), vec!["bucket", "pool"]);
        assert_eq!(stack.resources[1].removal_policy.to_string(), "retain");
    }

    #[test]
    fn test_parse_error_has_location() {
        let yaml = "stack:\n  name: [unclosed\n";
        let err = ConfigParser::new()
            .parse_yaml(yaml, Some(Path::new("skyform.yaml")))
            .unwrap_err();
        match err {
            SkyformError::Config(ConfigError::ParseError { location, .. }) => {
                assert!(location.unwrap().starts_with("skyform.yaml:"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut stack = ConfigParser::new()
            .parse_yaml("stack:\n  name: site\n", None)
            .unwrap();
        let vars = HashMap::from([
            ("SKYFORM_STACK_ENVIRONMENT", "staging"),
            ("SKYFORM_STATE_BUCKET", "override-bucket"),
            ("SKYFORM_PARALLELISM", "8"),
        ]);

        apply_overrides(&mut stack, |name| vars.get(name).map(ToString::to_string)).unwrap();
        assert_eq!(stack.stack.name, "site");
        assert_eq!(stack.stack.environment, "staging");
        assert_eq!(stack.state.bucket.as_deref(), Some("override-bucket"));
        assert_eq!(stack.execution.parallelism, 8);
    }

    #[test]
    fn test_bad_parallelism_override() {
        let mut stack = ConfigParser::new()
            .parse_yaml("stack:\n  name: site\n", None)
            .unwrap();
        let err = apply_overrides(&mut stack, |name| {
            (name == "SKYFORM_PARALLELISM").then(|| String::from("many"))
        })
        .unwrap_err();
        assert!(matches!(
            err,
            SkyformError::Config(ConfigError::InvalidEnvVar { .. })
        ));
    }

    #[test]
    fn test_find_config_file_searches_parents() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("skyform.yaml"), "stack:\n  name: site\n").unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, temp.path().join("skyform.yaml"));
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigParser::new().load_file("/nonexistent/skyform.yaml").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
