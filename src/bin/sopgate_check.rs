//! sopgate startup check
//!
//! Run with: cargo run --features cli --bin sopgate-check [-- --user <uuid>]
//!
//! Validates the role hierarchy and feature map, prints the button matrix
//! per level, and with `--user` prints that user's departments, roles and
//! features from the LMDB store at `SOPGATE_DB_PATH`.

use std::process::ExitCode;
use std::sync::Arc;

use sopgate::engine::available_features;
use sopgate::feature::features_to_names;
use sopgate::{selftest, MembershipStore, telemetry, GateConfig, LmdbStore, Session, SessionStatus, UserId};
use tracing::{error, info};
use uuid::Uuid;

// ============================================================================
// Args
// ============================================================================

fn user_arg() -> Result<Option<UserId>, String> {
    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        match a.as_str() {
            "--user" => {
                let raw = args.next().ok_or("--user needs a uuid")?;
                let id = Uuid::parse_str(&raw).map_err(|e| format!("bad user id {raw}: {e}"))?;
                return Ok(Some(UserId(id)));
            }
            other => return Err(format!("unknown argument {other}")),
        }
    }
    Ok(None)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let config = match GateConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    telemetry::init_tracing(&config.log_level);

    let user = match user_arg() {
        Ok(u) => u,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = selftest::validate() {
        error!(error = %e, "self-test failed");
        return ExitCode::FAILURE;
    }

    let rows = selftest::permission_matrix();
    println!("{:<12} {:<6} buttons", "level", "ok");
    for row in &rows {
        let names: Vec<&str> = row.visible.iter().map(|b| b.as_str()).collect();
        println!("{:<12} {:<6} {}", row.level.as_str(), row.passed, names.join(", "));
    }
    if rows.iter().any(|r| !r.passed) {
        error!("permission matrix mismatch");
        return ExitCode::FAILURE;
    }

    if let Some(user) = user {
        if let Err(e) = print_user(&config, user).await {
            error!(error = %e, "user lookup failed");
            return ExitCode::FAILURE;
        }
    }
    info!("all checks passed");
    ExitCode::SUCCESS
}

async fn print_user(config: &GateConfig, user: UserId) -> sopgate::Result<()> {
    let store = Arc::new(LmdbStore::open(&config.db_path, config.map_size)?);
    // Loading a session would create a default profile; this tool only reads
    let Some(profile) = store.fetch_user_profile(user).await? else {
        println!("\nuser {user} has no profile");
        return Ok(());
    };
    let session = Session::new(store, user, &profile.email).with_config(config);
    let status = session.load().await;
    if let SessionStatus::Error(m) = &status {
        return Err(sopgate::GateError::Storage(m.clone()));
    }
    println!();
    println!("user {user} ({:?}) superadmin={}", status, session.is_superadmin());
    for dept in session.departments().await? {
        session.select_department(dept.department_id).await?;
        let level = session.effective_role();
        let features = features_to_names(&available_features(Some(level)));
        println!("  {:<24} {:<10} {}", dept.name, level.as_str(), features.join(", "));
    }
    Ok(())
}
