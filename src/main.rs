use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use postpulse::api::{LoginCredentials, RegisterData, DEFAULT_LIMIT, DEFAULT_SKIP};
use postpulse::config::Config;
use postpulse::dashboard::{Dashboard, DashboardError};
use postpulse::render::Renderer;
use postpulse::storage::{Database, DatabaseError};
use postpulse::theme::{Palette, SystemColorScheme, ThemePreference};
use postpulse::util::SubmissionForm;

/// Get the config directory path (~/.config/postpulse/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("postpulse"))
}

#[derive(Parser, Debug)]
#[command(name = "postpulse", about = "Sentiment analysis of post comments, from the terminal")]
struct Args {
    /// Config file (default: ~/.config/postpulse/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session token
    Login {
        #[arg(long)]
        email: String,
    },
    /// Create an account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Submit a post URL for analysis (prompts when omitted)
    Analyze { url: Option<String> },
    /// List past analyses
    History {
        #[arg(long, default_value_t = DEFAULT_SKIP)]
        skip: u32,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show one analysis
    Show {
        id: i64,
        /// Include per-comment results
        #[arg(long)]
        comments: bool,
    },
    /// Totals and the most recent analyses
    Dashboard,
    /// Show or change the theme: light, dark, system or toggle
    Theme { choice: Option<String> },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // User-only access: the state database holds the session token.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config_dir.join("state.db");
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another postpulse process is using the state database. Try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let dashboard = Dashboard::open(&config, &db, SystemColorScheme::detect())
        .await
        .context("Failed to start")?;
    let _theme_watch = dashboard.theme().watch_system();

    let result = run(&dashboard, &config, args.command).await;
    db.close().await;
    if let Err(e) = result {
        let code = report(&dashboard, e)?;
        std::process::exit(code);
    }
    Ok(())
}

fn renderer(dashboard: &Dashboard) -> Renderer<io::Stdout> {
    let stdout = io::stdout();
    let color = stdout.is_terminal() && std::env::var_os("NO_COLOR").is_none();
    let width = crossterm::terminal::size()
        .map(|(w, _)| w as usize)
        .unwrap_or(100);
    let dark = *dashboard.theme().applied().borrow();
    Renderer::new(stdout, Palette::for_dark(dark), color, width)
}

async fn run(dashboard: &Dashboard, config: &Config, command: Command) -> Result<()> {
    let mut out = renderer(dashboard);
    match command {
        Command::Login { email } => {
            let password = read_password("Password: ").await?;
            dashboard
                .login(&LoginCredentials { email, password })
                .await?;
            out.success("Signed in.")?;
        }
        Command::Register { email, name } => {
            let password = read_password("Choose a password: ").await?;
            let user = dashboard
                .register(&RegisterData {
                    email,
                    password,
                    full_name: name,
                })
                .await?;
            out.success(&format!(
                "Account created for {}. Sign in with `postpulse login --email {}`.",
                user.email, user.email
            ))?;
        }
        Command::Logout => {
            dashboard.logout().await?;
            out.success("Signed out.")?;
        }
        Command::Whoami => {
            let user = dashboard.current_user().await?;
            out.user(&user)?;
        }
        Command::Analyze { url } => {
            let mut form = SubmissionForm::new();
            match url {
                Some(url) => form.edit(url),
                None => prompt_post_url(&mut form, &mut out).await?,
            }
            out.info("Analyzing comments, this can take a minute...")?;
            let analysis = dashboard.submit_form(&mut form).await?;
            out.success(&format!(
                "Analysis #{} finished: {} comments.",
                analysis.id, analysis.total_comments
            ))?;
            let page = dashboard.analysis(analysis.id).await?;
            out.analysis(&page, false)?;
        }
        Command::History { skip, limit } => {
            let limit = limit.unwrap_or(config.page_size);
            let page = dashboard.analyses(skip, limit).await?;
            out.history(&page)?;
        }
        Command::Show { id, comments } => {
            let page = dashboard.analysis(id).await?;
            out.analysis(&page, comments)?;
        }
        Command::Dashboard => {
            let stats = dashboard.stats().await?;
            out.stats(&stats)?;
            out.info("")?;
            let recent = dashboard
                .analyses(DEFAULT_SKIP, DEFAULT_LIMIT)
                .await?;
            out.history(&recent)?;
        }
        Command::Theme { choice } => {
            let theme = dashboard.theme();
            match choice.as_deref() {
                None => {}
                Some("toggle") => {
                    theme.toggle().await?;
                }
                Some(name) => {
                    let preference = ThemePreference::from_str_name(name).ok_or_else(|| {
                        anyhow::anyhow!("unknown theme '{name}' (light, dark, system, toggle)")
                    })?;
                    theme.set_preference(preference).await?;
                }
            }
            let effective = if theme.is_effectively_dark() { "dark" } else { "light" };
            out.info(&format!(
                "Theme: {} (showing {effective})",
                theme.preference().name()
            ))?;
        }
    }
    Ok(())
}

/// Print a failure and pick the exit code.
fn report(dashboard: &Dashboard, err: anyhow::Error) -> Result<i32> {
    let mut out = renderer(dashboard);
    let err = match err.downcast::<DashboardError>() {
        Ok(err) => err,
        Err(other) => {
            out.error(&format!("{other:#}"))?;
            return Ok(1);
        }
    };
    match &err {
        DashboardError::SignInRequired { redirect } => {
            tracing::debug!(redirect = %redirect, "Redirecting to sign-in");
            out.error("You are not signed in. Run `postpulse login --email <address>`.")?;
            Ok(2)
        }
        DashboardError::Invalid(reason) => {
            out.error(&format!("Cannot analyze this URL: {reason}"))?;
            Ok(1)
        }
        DashboardError::Gateway(e) => {
            out.error(&e.to_string())?;
            Ok(1)
        }
        DashboardError::Storage(e) => {
            out.error(&format!("{e:#}"))?;
            Ok(1)
        }
    }
}

/// Ask for a post URL until it passes validation.
async fn prompt_post_url(form: &mut SubmissionForm, out: &mut Renderer<io::Stdout>) -> Result<()> {
    loop {
        let line = tokio::task::spawn_blocking(|| -> anyhow::Result<Option<String>> {
            eprint!("Post URL: ");
            io::stderr().flush()?;
            let mut line = String::new();
            let read = io::stdin().lock().read_line(&mut line)?;
            Ok((read > 0).then_some(line))
        })
        .await
        .context("URL prompt failed")??;

        let Some(line) = line else {
            anyhow::bail!("No URL entered");
        };
        form.edit(line.trim_end_matches(['\r', '\n']));
        match form.warning() {
            None => return Ok(()),
            Some(reason) => out.error(&format!("Cannot analyze this URL: {reason}"))?,
        }
    }
}

/// Read a password without echo on a terminal, or one line from piped stdin.
async fn read_password(prompt: &'static str) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            let mut line = String::new();
            stdin.lock().read_line(&mut line)?;
            return Ok(line.trim_end_matches(['\r', '\n']).to_string());
        }

        eprint!("{prompt}");
        io::stderr().flush()?;
        enable_raw_mode()?;
        let result = read_hidden_line();
        let _ = disable_raw_mode();
        eprintln!();
        result
    })
    .await
    .context("Password prompt failed")?
}

fn read_hidden_line() -> anyhow::Result<String> {
    let mut password = String::new();
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Enter => return Ok(password),
            KeyCode::Backspace => {
                password.pop();
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                anyhow::bail!("Cancelled");
            }
            KeyCode::Char(c) => password.push(c),
            KeyCode::Esc => anyhow::bail!("Cancelled"),
            _ => {}
        }
    }
}
