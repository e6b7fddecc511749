use crate::config::types::Config;
use crate::config::validation::validate;
use crate::{ConfigError, ConfigResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Loads, parses and validates a TOML configuration file
///
/// Sections and keys left out of the file keep their defaults.
///
/// # Errors
///
/// * `ConfigError::Io` - The file could not be read
/// * `ConfigError::Parse` - The file is not valid TOML for `Config`
/// * `ConfigError::Validation`, `InvalidPattern`, `InvalidSelector` - A value was rejected
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use dealer_crawler::config::load_config;
///
/// let config = load_config(Path::new("crawler.toml")).unwrap();
/// println!("Concurrency: {}", config.crawler.concurrency);
/// ```
pub fn load_config(path: &Path) -> ConfigResult<Config> {
    parse_config(&fs::read_to_string(path)?)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> ConfigResult<Config> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Hex-encoded SHA-256 of a configuration file's content
///
/// Logged at start-up so that two crawl runs can be matched to the exact
/// heuristics they used.
pub fn compute_config_hash(path: &Path) -> ConfigResult<String> {
    Ok(content_hash(&fs::read_to_string(path)?))
}

/// Loads a configuration together with the hash of the text it was parsed from
///
/// The file is read once, so the hash always describes the loaded config.
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, content_hash(&content)))
}

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[crawler]
max-pages = 20
max-vehicles = 100
concurrency = 4
rate-limit-ms = 250
max-retries = 2
retry-delay-ms = 500

[session]
user-agent = "Mozilla/5.0 (X11; Linux x86_64)"
timeout-ms = 10000

[session.headers]
Referer = "https://dealer.example.com/"

[render]
mode = "never"

[discovery]
card-threshold = 4
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.max_pages, 20);
        assert_eq!(config.crawler.concurrency, 4);
        assert_eq!(config.crawler.retry_delay_ms, 500);
        assert_eq!(config.session.timeout_ms, 10000);
        assert_eq!(
            config.session.headers.get("Referer").map(String::as_str),
            Some("https://dealer.example.com/")
        );
        assert_eq!(config.render.mode, RenderMode::Never);
        assert_eq!(config.discovery.card_threshold, 4);
        // Untouched keys keep their defaults
        assert_eq!(config.discovery.link_threshold, 3);
    }

    #[test]
    fn test_load_empty_config() {
        let file = create_temp_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.crawler.max_pages, 50);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/crawler.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let file = create_temp_config("[crawler]\nconcurrency = 0\n");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_load_config_with_bad_selector() {
        let file = create_temp_config("[discovery]\ndetail-link-selectors = [\"a[[\"]\n");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::InvalidSelector(_))));
    }

    #[test]
    fn test_hash_matches_loaded_content() {
        let file = create_temp_config("[crawler]\nmax-pages = 5\n");

        let (config, hash) = load_config_with_hash(file.path()).unwrap();
        assert_eq!(config.crawler.max_pages, 5);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_config_hash(file.path()).unwrap());
    }

    #[test]
    fn test_hash_tracks_content() {
        let small = create_temp_config("[crawler]\nmax-pages = 5\n");
        let large = create_temp_config("[crawler]\nmax-pages = 500\n");

        assert_ne!(
            compute_config_hash(small.path()).unwrap(),
            compute_config_hash(large.path()).unwrap()
        );
    }

    #[test]
    fn test_parse_config_from_text() {
        let config = parse_config("[render]\nmode = \"always\"\n").unwrap();
        assert_eq!(config.render.mode, RenderMode::Always);
        assert!(parse_config("[render]\nmode = \"sometimes\"\n").is_err());
    }
}
