use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{Credentials, RegisterRequest};

/// Upper bound for HTTP_MAX_RETRIES
pub const MAX_HTTP_RETRIES: u32 = 10;

/// E-learning session engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Backend base URL
    #[arg(short = 'u', long, env = "BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Path to the SQLite database holding the session tokens
    #[arg(short = 'd', long, env = "SESSION_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Route guard debounce in milliseconds
    #[arg(long, env = "GUARD_DEBOUNCE_MS", default_value = "100")]
    pub guard_debounce_ms: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub http_connect_timeout: u64,

    /// HTTP max retries for API requests
    #[arg(long, env = "HTTP_MAX_RETRIES", default_value = "2")]
    pub http_retries: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Check the persisted session and print its status
    Status,

    /// Sign in (prompts for missing values)
    Login {
        #[arg(long)]
        username: Option<String>,
        #[arg(long, env = "ELEARN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Sign out and forget the stored tokens
    Logout,

    /// Create an account interactively
    Register,

    /// Authorized GET against the backend, printing the JSON answer
    Request {
        /// Path such as /api/course
        path: String,
    },

    /// Run the route guard from a location and print where it lands
    Guard {
        /// Starting location, e.g. /course or /login
        path: String,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub base_url: String,

    // Persistence
    pub session_db_file: PathBuf,

    // Route guard
    pub guard_debounce: Duration,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub http_max_retries: u32,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Build configuration from parsed arguments (CLI > ENV > defaults)
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let session_db_file = match args.db_file.as_deref() {
            Some(path) => expand_tilde(path),
            None => default_db_path().context(
                "Could not determine a data directory (use -d or set SESSION_DB_FILE)",
            )?,
        };

        Ok(Config {
            base_url: args.base_url.trim_end_matches('/').to_string(),
            session_db_file,
            guard_debounce: Duration::from_millis(args.guard_debounce_ms),
            http_connect_timeout: args.http_connect_timeout,
            http_request_timeout: args.http_timeout,
            http_max_retries: args.http_retries,
            log_level: args.log_level.clone(),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            anyhow::bail!("BASE_URL must be an http(s) URL: {}", self.base_url);
        }

        if self.guard_debounce.is_zero() {
            anyhow::bail!("GUARD_DEBOUNCE_MS must be greater than zero");
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        if self.http_max_retries > MAX_HTTP_RETRIES {
            anyhow::bail!(
                "HTTP_MAX_RETRIES must be at most {} (got {})",
                MAX_HTTP_RETRIES,
                self.http_max_retries
            );
        }

        Ok(())
    }
}

/// Default location of the session database
fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("elearn-session").join("session.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// === Interactive Prompts ===

/// Fill in whatever the user did not pass on the command line
pub fn prompt_credentials(
    username: Option<String>,
    password: Option<String>,
) -> Result<Credentials> {
    let username = match username {
        Some(u) => u,
        None => Input::<String>::new()
            .with_prompt("Username")
            .interact_text()
            .context("Failed to read username")?,
    };

    let password = match password {
        Some(p) => p,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?,
    };

    Ok(Credentials::new(username, password))
}

/// Collect the registration form
pub fn prompt_registration() -> Result<RegisterRequest> {
    let username: String = Input::new()
        .with_prompt("Username")
        .interact_text()
        .context("Failed to read username")?;

    let password = Password::new()
        .with_prompt("Password")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()
        .context("Failed to read password")?;

    let fullname: String = Input::new()
        .with_prompt("Full name")
        .interact_text()
        .context("Failed to read full name")?;

    let phone: String = Input::new()
        .with_prompt("Phone")
        .interact_text()
        .context("Failed to read phone")?;

    let email: String = Input::new()
        .with_prompt("Email")
        .validate_with(|input: &String| -> std::result::Result<(), &str> {
            if input.contains('@') {
                Ok(())
            } else {
                Err("Not an email address")
            }
        })
        .interact_text()
        .context("Failed to read email")?;

    let address: String = Input::new()
        .with_prompt("Address")
        .allow_empty(true)
        .interact_text()
        .context("Failed to read address")?;

    Ok(RegisterRequest {
        username,
        password,
        fullname,
        phone,
        email,
        address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["elearn-session"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        let path = expand_tilde("~");
        assert_eq!(path, PathBuf::from("~"));
    }

    #[test]
    fn test_subcommands_parse() {
        assert_eq!(args(&["-d", "/tmp/s.db", "status"]).command, Command::Status);
        assert_eq!(
            args(&["-d", "/tmp/s.db", "login", "--username", "alice"]).command,
            Command::Login {
                username: Some("alice".to_string()),
                password: None
            }
        );
        assert_eq!(
            args(&["-d", "/tmp/s.db", "guard", "/course"]).command,
            Command::Guard {
                path: "/course".to_string()
            }
        );
    }

    #[test]
    fn test_config_from_args() {
        let config = Config::from_args(&args(&[
            "--base-url",
            "https://api.example.com/",
            "-d",
            "/tmp/session.db",
            "--guard-debounce-ms",
            "250",
            "logout",
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.session_db_file, PathBuf::from("/tmp/session.db"));
        assert_eq!(config.guard_debounce, Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::from_args(&args(&["-d", "/tmp/s.db", "status"])).unwrap();
        assert!(config.validate().is_ok());

        config.base_url = "localhost:8080".to_string();
        assert!(config.validate().is_err());

        config.base_url = "http://localhost:8080".to_string();
        config.guard_debounce = Duration::ZERO;
        assert!(config.validate().is_err());

        config.guard_debounce = Duration::from_millis(100);
        config.http_max_retries = MAX_HTTP_RETRIES;
        assert!(config.validate().is_ok());
        config.http_max_retries = 64;
        assert!(config.validate().is_err());
    }
}
