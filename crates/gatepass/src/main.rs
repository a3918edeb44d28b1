use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{error, info, warn};

use gatepass::{escort_requested, http, initialize, GateState, RootConfig, RootError};
use gatepass_core::{CardId, IdentityId, IdentityRecord, PersonRole};
use gatepass_policy::Verdict;

/// Gatepass: exit authorization for a school gate
///
/// Scan a card, get a verdict: authorized, escorted minor or denied.
#[derive(Parser, Debug)]
#[command(name = "gatepass", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and write the default configuration
    Init {
        /// SQLite database path
        #[arg(long)]
        database_path: Option<PathBuf>,
    },

    /// Start the HTTP server (directory bridge and gate terminal)
    Serve {
        /// Bind address, overrides the config file
        #[arg(long)]
        bind: Option<String>,

        /// Port, overrides the config file
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run the gate terminal on the console: one card id per line
    Scan,

    /// Enroll a person
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        surname: Option<String>,

        /// student or staff
        #[arg(long, default_value = "student")]
        role: String,

        /// Course (students) or role label (staff)
        #[arg(long)]
        course: Option<String>,

        /// YYYY-MM-DD
        #[arg(long)]
        birth_date: Option<String>,

        /// Eligible for school transport
        #[arg(long)]
        transport: bool,

        #[arg(long)]
        email: Option<String>,

        /// Bind a card right away
        #[arg(long)]
        card: Option<String>,
    },

    /// List people still waiting for a card
    Pending,

    /// Bind a card to a person
    Bind {
        identity_id: String,
        card_id: String,
    },

    /// Show recent registrations
    Audit {
        /// Maximum number of entries to display
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new(
            "gatepass=debug,gatepass_policy=debug,gatepass_directory=debug,gatepass_session=debug",
        )
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gatepass=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<RootConfig, RootError> {
    match path {
        Some(p) => RootConfig::load(p),
        None => RootConfig::load(&RootConfig::default_config_path()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), RootError> {
    let config_path = cli.config.as_ref();
    match cli.command {
        Commands::Init { database_path } => cmd_init(config_path, database_path),
        Commands::Serve { bind, port } => cmd_serve(config_path, bind, port).await,
        Commands::Scan => cmd_scan(config_path).await,
        Commands::Add {
            name,
            surname,
            role,
            course,
            birth_date,
            transport,
            email,
            card,
        } => {
            let role = PersonRole::parse(&role)
                .ok_or_else(|| RootError::Config(format!("unknown role '{}'", role)))?;
            let mut identity = IdentityRecord::new(name, role).with_transport(transport);
            if let Some(surname) = surname {
                identity = identity.with_surname(surname);
            }
            if let Some(course) = course {
                identity = identity.with_course(&course);
            }
            if let Some(raw) = birth_date {
                let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
                    RootError::Config(format!("invalid birth date '{}': {}", raw, e))
                })?;
                identity = identity.with_birth_date(date);
            }
            if let Some(card) = card {
                identity = identity.with_card(card);
            }
            cmd_add(config_path, identity, email.as_deref())
        }
        Commands::Pending => cmd_pending(config_path),
        Commands::Bind {
            identity_id,
            card_id,
        } => cmd_bind(config_path, &identity_id, &card_id),
        Commands::Audit { limit } => cmd_audit(config_path, limit),
    }
}

fn cmd_init(config_path: Option<&PathBuf>, database_path: Option<PathBuf>) -> Result<(), RootError> {
    let mut config = load_config(config_path)?;
    if let Some(path) = database_path {
        config.database_path = path;
    }

    let state = initialize(config.clone())?;

    let save_path = config_path
        .cloned()
        .unwrap_or_else(RootConfig::default_config_path);
    config.save(&save_path)?;

    println!("Gatepass initialized.");
    println!("  Directory: {:?}", state.mode());
    println!("  Database:  {}", state.config.database_path.display());
    println!("  Config:    {}", save_path.display());
    Ok(())
}

async fn cmd_serve(
    config_path: Option<&PathBuf>,
    bind: Option<String>,
    port: Option<u16>,
) -> Result<(), RootError> {
    let mut config = load_config(config_path)?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let state = std::sync::Arc::new(initialize(config)?);
    let addr = format!("{}:{}", state.config.server.bind, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, mode = ?state.mode(), "gatepass server listening");

    axum::serve(listener, http::build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Console terminal
// ---------------------------------------------------------------------------

fn print_verdict(verdict: &Verdict) {
    println!("  [{}] {}", verdict.status_label(), verdict.subject.display_name());
    println!("  {}", verdict.subject.detail_line());
    println!("  reason: {}", verdict.reason);
}

async fn read_line(lines: &mut Lines<BufReader<Stdin>>) -> Option<String> {
    match lines.next_line().await {
        Ok(line) => line.map(|l| l.trim().to_string()),
        Err(e) => {
            warn!(error = %e, "failed to read stdin");
            None
        }
    }
}

async fn cmd_scan(config_path: Option<&PathBuf>) -> Result<(), RootError> {
    let config = load_config(config_path)?;
    let state = initialize(config)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Gate ready. Scan a card (one id per line, Ctrl-D to quit).");
    while let Some(card) = read_line(&mut lines).await {
        if card.is_empty() {
            continue;
        }
        scan_one(&state, CardId::new(card), &mut lines).await;
        state.session.reset()?;
        println!();
        println!("Gate ready.");
    }
    Ok(())
}

async fn scan_one(state: &GateState, card_id: CardId, lines: &mut Lines<BufReader<Stdin>>) {
    let mut status = state.session.subscribe();
    let after = status.borrow_and_update().cycle;

    let session = state.session.clone();
    let mut handle = tokio::spawn(async move { session.scan(card_id).await });

    let joined = tokio::select! {
        joined = &mut handle => Some(joined),
        _ = escort_requested(&mut status, after) => None,
    };

    let joined = match joined {
        Some(joined) => joined,
        None => {
            if let Ok(Some(minor)) = state.session.snapshot().map(|s| s.awaiting) {
                println!("  Minor: {} ({})", minor.display_name(), minor.course_or_role);
            }
            println!("Is the minor accompanied by an adult? [y/N]");
            let reply = read_line(lines).await.unwrap_or_default().to_lowercase();
            let _ = tokio::time::timeout(Duration::from_secs(2), state.prompt.question_parked()).await;
            if let Err(e) = state.prompt.answer(matches!(reply.as_str(), "y" | "yes")) {
                warn!(error = %e, "escort answer not delivered");
            }
            handle.await
        }
    };

    match joined {
        Ok(Ok(verdict)) => print_verdict(&verdict),
        Ok(Err(e)) => println!("  {}", e),
        Err(e) => error!(error = %e, "session task failed"),
    }
}

// ---------------------------------------------------------------------------
// Directory administration
// ---------------------------------------------------------------------------

fn cmd_add(
    config_path: Option<&PathBuf>,
    identity: IdentityRecord,
    email: Option<&str>,
) -> Result<(), RootError> {
    let state = initialize(load_config(config_path)?)?;
    let id = state.local_store()?.insert_identity(&identity, email)?;
    println!("Enrolled {} as {}", identity.display_name(), id);
    Ok(())
}

fn cmd_pending(config_path: Option<&PathBuf>) -> Result<(), RootError> {
    let state = initialize(load_config(config_path)?)?;
    let pending = state.local_store()?.pending_binding()?;

    println!("Waiting for a card ({}):", pending.len());
    if pending.is_empty() {
        println!("  (none)");
    }
    for identity in pending {
        let id = identity.id.as_ref().map(IdentityId::as_str).unwrap_or("-");
        println!(
            "  {}  {}  {}",
            id,
            identity.display_name(),
            identity.course_or_role
        );
    }
    Ok(())
}

fn cmd_bind(config_path: Option<&PathBuf>, identity_id: &str, card_id: &str) -> Result<(), RootError> {
    let state = initialize(load_config(config_path)?)?;
    let identity = state
        .local_store()?
        .bind_card(&IdentityId::new(identity_id), &CardId::new(card_id))?;
    println!("Card {} bound to {}", card_id, identity.display_name());
    Ok(())
}

fn cmd_audit(config_path: Option<&PathBuf>, limit: usize) -> Result<(), RootError> {
    let state = initialize(load_config(config_path)?)?;
    let events = state.local_store()?.registrations(limit)?;

    println!("Registrations ({} shown):", events.len());
    if events.is_empty() {
        println!("  (no entries)");
    }
    for event in events {
        let card = event.card_id.as_ref().map(CardId::as_str).unwrap_or("-");
        let role = event.role.map(PersonRole::as_str).unwrap_or("unknown");
        println!(
            "  {}  {:<8} {:<24} {:<7} {}",
            event.recorded_at.to_rfc3339(),
            role,
            event.subject_name,
            card,
            event.status
        );
    }
    Ok(())
}
