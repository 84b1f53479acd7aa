use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 18] = [
        "RUST_LOG",
        "FDS_HOST",
        "FDS_PORT",
        "FDS_DATABASE_URL",
        "FDS_TRUST_IDENTITY_HEADERS",
        "FDS_CURRENCY",
        "FDS_TAX_RATE_BPS",
        "FDS_UNPAID_ORDER_TIMEOUT",
        "FDS_PAYMENT_GRACE_PERIOD",
        "FDS_PAYMENT_POLL_INTERVAL",
        "FDS_AUTO_CANCEL_INTERVAL",
        "FDS_JOB_WORKERS",
        "FDS_JOB_MAX_ATTEMPTS",
        "FDS_JOB_BACKOFF_MS",
        "FDS_JOB_TIMEOUT",
        "FDS_JOB_SOFT_TIMEOUT",
        "FDS_STRIPE_API_URL",
        "FDS_WEBHOOK_TOLERANCE",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
