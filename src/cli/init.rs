//! `mediator init`: writes a commented default configuration.

use crate::cli::output::Output;
use crate::utils::toml_config::{MediatorConfig, DEFAULT_CONFIG_FILE};
use std::fs;
use std::path::{Path, PathBuf};

/// Result of the init command
pub enum InitResult {
    Success,
    AlreadyExists,
    Error(String),
}

const HEADER: &str = "# mediator configuration\n\
# Every key is optional; removing a line restores its default.\n\
# API keys are read from the environment variable named by api_key_env.\n\n";

/// Default configuration rendered as TOML, with a short header.
pub fn default_config_toml() -> Result<String, toml::ser::Error> {
    let body = toml::to_string_pretty(&MediatorConfig::default())?;
    Ok(format!("{}{}", HEADER, body))
}

/// Run the init command
pub fn run(path: &Path, force: bool, output: &Output) -> InitResult {
    let config_path: PathBuf = path.join(DEFAULT_CONFIG_FILE);
    if config_path.exists() && !force {
        output.warning(&format!(
            "{} already exists. Use --force to overwrite.",
            config_path.display()
        ));
        return InitResult::AlreadyExists;
    }

    if let Err(e) = fs::create_dir_all(path) {
        output.error(&format!("Failed to create {}: {}", path.display(), e));
        return InitResult::Error(e.to_string());
    }

    let content = match default_config_toml() {
        Ok(content) => content,
        Err(e) => {
            output.error(&format!("Failed to render configuration: {}", e));
            return InitResult::Error(e.to_string());
        }
    };

    if let Err(e) = write_file(&config_path, &content, force) {
        output.error(&format!("Failed to create {}: {}", DEFAULT_CONFIG_FILE, e));
        return InitResult::Error(e.to_string());
    }
    output.created("config", DEFAULT_CONFIG_FILE);
    output.hint("Set OPENAI_API_KEY (or switch [llm.provider] to ollama) before running analyze");

    InitResult::Success
}

fn write_file(path: &Path, content: &str, force: bool) -> std::io::Result<()> {
    if path.exists() && !force {
        return Ok(()); // Skip existing files unless force is true
    }
    fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_round_trips() {
        let content = default_config_toml().expect("default config renders");
        let parsed = MediatorConfig::parse(&content).expect("rendered config parses");
        assert_eq!(parsed.agents.enabled, MediatorConfig::default().agents.enabled);
        assert!(content.starts_with("# mediator configuration"));
    }

    #[test]
    fn test_write_file_skips_existing_without_force() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, "original").expect("Failed to write");

        write_file(&file_path, "new content", false).expect("write succeeds");
        let content = fs::read_to_string(&file_path).expect("Failed to read file");
        assert_eq!(content, "original");

        write_file(&file_path, "new content", true).expect("write succeeds");
        let content = fs::read_to_string(&file_path).expect("Failed to read file");
        assert_eq!(content, "new content");
    }

    #[test]
    fn test_run_creates_config() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let result = run(temp_dir.path(), false, &Output::no_color());

        assert!(matches!(result, InitResult::Success));
        assert!(temp_dir.path().join(DEFAULT_CONFIG_FILE).exists());
    }

    #[test]
    fn test_run_already_exists_without_force() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join(DEFAULT_CONFIG_FILE), "existing").expect("Failed to write");

        let result = run(temp_dir.path(), false, &Output::no_color());
        assert!(matches!(result, InitResult::AlreadyExists));

        let result = run(temp_dir.path(), true, &Output::no_color());
        assert!(matches!(result, InitResult::Success));
        let content = fs::read_to_string(temp_dir.path().join(DEFAULT_CONFIG_FILE))
            .expect("Failed to read");
        assert!(content.contains("[llm]"));
    }
}
