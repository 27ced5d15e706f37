use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use elearn_session::auth::{self, HttpAuthorityClient, SessionManager, SessionStatus, SqliteTokenStore};
use elearn_session::config::{self, CliArgs, Command, Config};
use elearn_session::guard::RouteGuard;
use elearn_session::http_client::{ApiClient, RequestAuthorizer};
use elearn_session::navigation::{InMemoryRouter, NavigationLocation};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    // Load configuration first (for log level)
    let args = CliArgs::parse();
    let config = Config::from_args(&args)?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Backend: {}", config.base_url);
    tracing::debug!("Session database: {}", config.session_db_file.display());

    let store = Arc::new(SqliteTokenStore::open(&config.session_db_file)?);
    let authority = Arc::new(HttpAuthorityClient::new(
        &config.base_url,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);
    let session = Arc::new(SessionManager::new(store, authority.clone()));

    match args.command {
        Command::Status => {
            let status = session.initialize().await?;
            let snapshot = session.snapshot();
            println!("Session:     {}", status);
            if let Some(token) = snapshot.access_token.as_deref() {
                println!("Token:       {}", auth::token_preview(token));
            }
            println!("Checked at:  {}", snapshot.changed_at.to_rfc3339());
        }

        Command::Login { username, password } => {
            session.initialize().await?;
            if session.status() == SessionStatus::Authenticated {
                println!("Already signed in; signing in again replaces the stored session.");
            }

            let credentials = config::prompt_credentials(username, password)?;
            session
                .login(&credentials)
                .await
                .context("Login failed")?;
            println!("✅ Signed in as {}", credentials.username);
        }

        Command::Logout => {
            session.logout().await.context("Logout failed")?;
            println!("Signed out");
        }

        Command::Register => {
            let request = config::prompt_registration()?;
            let message = authority
                .register(&request)
                .await
                .context("Registration failed")?;
            println!("✅ {}", message);
        }

        Command::Request { path } => {
            session.initialize().await?;
            let api = ApiClient::new(
                &config.base_url,
                RequestAuthorizer::new(session.clone()),
                config.http_connect_timeout,
                config.http_request_timeout,
                config.http_max_retries,
            )?;

            let body: serde_json::Value = api
                .get_json(&path)
                .await
                .with_context(|| format!("GET {} failed", path))?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Command::Guard { path } => {
            run_guard(&config, session, NavigationLocation::from_path(&path)).await?;
        }
    }

    Ok(())
}

/// Drive the route guard from a starting location until it settles
async fn run_guard(
    config: &Config,
    session: Arc<SessionManager>,
    start: NavigationLocation,
) -> Result<()> {
    let router = Arc::new(InMemoryRouter::new(start.clone()));
    let guard = RouteGuard::spawn(
        session.subscribe(),
        router.subscribe(),
        router.clone(),
        config.guard_debounce,
    );

    let status = session.initialize().await?;

    // One debounce for the decision, one more for the location it produced
    tokio::time::sleep(config.guard_debounce * 3).await;
    let loading = guard.loading();
    guard.shutdown();

    println!("Session:     {}", status);
    println!("Started at:  {}", start);
    println!("Landed on:   {}", router.current());
    println!("Redirects:   {}", router.replaced().len());
    if loading {
        println!("(still loading)");
    }

    Ok(())
}
