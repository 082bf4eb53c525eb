//! VMess Auth Daemon - keeps the time-windowed token index for VMess users.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use vmess_authd::auth::{token_for, Clock, HashKind, SystemClock, TimedUserValidator};
use vmess_authd::config::Settings;
use vmess_authd::error::{AuthErrorKind, DaemonError};
use vmess_authd::protocol::{derive_alternates, SecretKey, Timestamp, Token, TOKEN_LEN};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

const DEFAULT_CONFIG_PATH: &str = "/etc/vmess-authd/config.toml";

/// Options followed by a separate value argument.
const VALUE_OPTIONS: &[&str] = &[
    "--config", "-c", "--id", "-i", "--alter", "-a", "--at", "-t", "--hash", "-H",
];

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{} {}", NAME, VERSION);
        return ExitCode::SUCCESS;
    }

    let config_path = get_option(&args, "--config", "-c")
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    match get_command(&args).as_deref() {
        None | Some("run") => run(&config_path),
        Some("token") => match print_token(&args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
        Some("verify") => verify(&args, &config_path),
        Some(other) => {
            eprintln!("Unknown command '{}'. Try --help.", other);
            ExitCode::FAILURE
        }
    }
}

/// Run the daemon until SIGINT/SIGTERM.
fn run(config_path: &str) -> ExitCode {
    let settings = match Settings::load(config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&settings) {
        eprintln!("Error initializing logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting {} v{}", NAME, VERSION);
    info!("Configuration loaded from: {}", config_path);
    info!(
        cache_duration_secs = settings.validator.cache_duration_seconds,
        update_interval_secs = settings.validator.update_interval_seconds,
        hash = ?settings.validator.hash,
        "Validator settings"
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(async_main(settings)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Daemon failed");
            ExitCode::FAILURE
        }
    }
}

async fn async_main(settings: Settings) -> Result<(), DaemonError> {
    let cancel = CancellationToken::new();
    let validator = Arc::new(TimedUserValidator::with_clock(
        settings.validator.hash,
        Arc::new(SystemClock),
        &settings.validator,
    )?);

    for user in &settings.users {
        validator.add(user.to_user())?;
    }

    let refresher = validator.start_refresh_task(cancel.clone());

    let mut stats_timer = tokio::time::interval(validator.update_interval());
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping refresher...");
                break;
            }
            _ = stats_timer.tick() => {
                let stats = validator.stats();
                info!(
                    users = stats.users,
                    keys = stats.entries,
                    tokens = stats.tokens,
                    "Token index"
                );
            }
        }
    }

    cancel.cancel();
    if let Err(e) = refresher.await {
        error!(error = %e, "Token refresher panicked");
    }

    info!("Daemon stopped");
    Ok(())
}

/// Print the token a client would send: `token --id UUID [--alter N] [--at SECS] [--hash NAME]`.
fn print_token(args: &[String]) -> Result<(), String> {
    let id = get_option(args, "--id", "-i").ok_or("Missing --id")?;
    let id = Uuid::parse_str(&id).map_err(|e| format!("Invalid id '{}': {}", id, e))?;

    let primary = SecretKey::from(id);
    let key = match get_option(args, "--alter", "-a") {
        None => primary,
        Some(n) => {
            let n: u16 = n.parse().map_err(|_| format!("Invalid --alter '{}'", n))?;
            if n == 0 {
                return Err("--alter is 1-based".to_string());
            }
            derive_alternates(&primary, n)[usize::from(n) - 1]
        }
    };

    let at = match get_option(args, "--at", "-t") {
        Some(secs) => Timestamp(
            secs.parse()
                .map_err(|_| format!("Invalid --at '{}'", secs))?,
        ),
        None => SystemClock.now(),
    };

    let hash: HashKind = match get_option(args, "--hash", "-H") {
        Some(name) => name.parse()?,
        None => HashKind::default(),
    };

    println!("{}", hex::encode(token_for(&hash, &key, at)));
    Ok(())
}

/// Resolve a hex token against the configured users: `verify HEX`.
fn verify(args: &[String], config_path: &str) -> ExitCode {
    let result = Settings::load(config_path).and_then(|settings| {
        let token = parse_token(args)?;
        let validator = TimedUserValidator::with_clock(
            settings.validator.hash,
            Arc::new(SystemClock),
            &settings.validator,
        )?;
        for user in &settings.users {
            validator.add(user.to_user())?;
        }
        Ok(validator.get(&token))
    });

    match result {
        Ok(Some((user, ts))) => {
            let when = chrono::DateTime::from_timestamp(ts.as_secs() as i64, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| ts.to_string());
            println!("{} (level {}) at {}", user.email, user.level, when);
            ExitCode::SUCCESS
        }
        Ok(None) => {
            println!("not found");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn parse_token(args: &[String]) -> Result<Token, DaemonError> {
    let invalid = |message: String| DaemonError::Auth {
        kind: AuthErrorKind::InvalidToken { message },
    };

    let position = args.iter().position(|a| a == "verify");
    let hex_token = position
        .and_then(|i| args.get(i + 1))
        .ok_or_else(|| invalid("missing token argument".to_string()))?;
    let bytes = hex::decode(hex_token).map_err(|e| invalid(e.to_string()))?;
    Token::try_from(bytes.as_slice()).map_err(|_| {
        invalid(format!(
            "expected {} bytes, got {}",
            TOKEN_LEN,
            bytes.len()
        ))
    })
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print help message.
fn print_help() {
    println!(
        r#"{} {}
Time-windowed VMess user validator.

USAGE:
    {} [OPTIONS] [COMMAND]

COMMANDS:
    run                    Keep the token index refreshed (default)
    token                  Print the current token for an id
                           --id <UUID> [--alter <N>] [--at <SECS>] [--hash <NAME>]
    verify <HEX>           Resolve a token against the configured users

OPTIONS:
    -c, --config <PATH>    Path to configuration file
                           [default: {}]
    -h, --help             Print help information
    -V, --version          Print version information
"#,
        NAME, VERSION, NAME, DEFAULT_CONFIG_PATH
    );
}

/// First positional argument that is not an option value.
fn get_command(args: &[String]) -> Option<String> {
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg.starts_with('-') {
            if VALUE_OPTIONS.contains(&arg.as_str()) {
                iter.next();
            }
            continue;
        }
        return Some(arg.clone());
    }
    None
}

/// Value of `--long <value>`, `-s <value>` or `--long=<value>`.
fn get_option(args: &[String], long: &str, short: &str) -> Option<String> {
    let prefix = format!("{}=", long);
    for (i, arg) in args.iter().enumerate() {
        if (arg == long || arg == short) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        if let Some(value) = arg.strip_prefix(&prefix) {
            return Some(value.to_string());
        }
    }
    None
}

/// Initialize logging based on settings.
fn init_logging(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    match settings.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
