use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use craftadmin::session::{guard, token, GuardDecision, LoginOutcome, Navigator};
use craftadmin::{open_session, Config, SessionController};

/// Command-line shell for the craft shop admin console.
#[derive(Parser, Debug)]
#[command(name = "craftadmin", version, about)]
struct Cli {
    /// Path to config.toml (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the admin API base URL.
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session.
    Login {
        #[arg(long)]
        email: Option<String>,
        /// Prompted for when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign out and wipe stored session data.
    Logout,
    /// Show the signed-in admin.
    Status,
    /// Check the stored token, ending the session if it has expired.
    Validate,
    /// Authenticated GET against the admin API, printing the JSON reply.
    Get {
        /// API path, e.g. /api/admin/products
        path: String,
    },
}

/// Prints the redirect notice where a browser would show the login page.
struct CliNavigator;

impl Navigator for CliNavigator {
    fn to_login(&self, notice: Option<&str>) {
        if let Some(notice) = notice {
            eprintln!("{notice}");
        }
        eprintln!("Run `craftadmin login` to sign in.");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "craftadmin=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }

    let session = open_session(&config, Arc::new(CliNavigator))?;
    session.initialize();

    match cli.command {
        Command::Login { email, password } => login(&session, email, password).await,
        Command::Logout => {
            session.logout();
            println!("Signed out.");
            Ok(())
        }
        Command::Status => {
            status(&session);
            Ok(())
        }
        Command::Validate => {
            if session.validate_token() {
                println!("Session is valid.");
                Ok(())
            } else {
                bail!("No valid session.")
            }
        }
        Command::Get { path } => get(&session, &path).await,
    }
}

async fn login(
    session: &SessionController,
    email: Option<String>,
    password: Option<String>,
) -> Result<()> {
    if guard::guest_only(&session.state()) == GuardDecision::RedirectToDashboard {
        if let Some(profile) = session.state().profile {
            println!("Already signed in as {}. Run `craftadmin logout` first.", profile.email);
        }
        return Ok(());
    }

    let email = match email {
        Some(email) => email,
        None => dialoguer::Input::<String>::new()
            .with_prompt("Email")
            .interact_text()?,
    };
    let password = match password {
        Some(password) => password,
        None => dialoguer::Password::new()
            .with_prompt("Password")
            .interact()?,
    };

    match session.login(email.trim(), &password).await {
        LoginOutcome::Success(profile) => {
            println!("Signed in as {} ({}).", profile.name, profile.role);
            Ok(())
        }
        LoginOutcome::Failure(failure) => bail!("{}", failure.message),
    }
}

fn status(session: &SessionController) {
    let state = session.state();
    if guard::protected(&state) != GuardDecision::Proceed {
        println!("Not signed in.");
        return;
    }

    if let Some(profile) = state.profile {
        println!("Name:   {}", profile.name);
        println!("Email:  {}", profile.email);
        println!("Role:   {}", profile.role);
        if let Some(url) = profile
            .avatar
            .as_deref()
            .and_then(|a| session.api().asset_url(a))
        {
            println!("Avatar: {url}");
        }
    }

    let expiry = state
        .token
        .as_deref()
        .and_then(|t| token::decode_claims(t).ok())
        .and_then(|claims| chrono::DateTime::<chrono::Utc>::from_timestamp(claims.exp, 0));
    if let Some(expiry) = expiry {
        println!("Expires: {}", expiry.to_rfc3339());
    }
}

async fn get(session: &SessionController, path: &str) -> Result<()> {
    if guard::protected(&session.state()) == GuardDecision::RedirectToLogin {
        bail!("Not signed in. Run `craftadmin login` first.");
    }

    let body: serde_json::Value = session.api().get_json(path).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
