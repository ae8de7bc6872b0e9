//! CLI tool to manage API keys.
//!
//! Usage:
//!   cargo run --bin manage-api-keys -- list --workspace <workspace-id>
//!   cargo run --bin manage-api-keys -- revoke --id <key-id> --by <user-id>
//!   cargo run --bin manage-api-keys -- expire --id <key-id>

use std::env;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use workspace_authz::config::{Config, StoreBackend};
use workspace_authz::db::DbPool;
use workspace_authz::models::ApiKeyListItem;
use workspace_authz::services::{ApiKeyManager, Services};
use workspace_authz::store::PostgresStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Audit events go through tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let command = &args[1];
    if matches!(command.as_str(), "help" | "--help" | "-h") {
        print_usage();
        return;
    }

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };
    if config.store != StoreBackend::Postgres {
        eprintln!("Error: manage-api-keys needs AUTHZ_STORE=postgres (the memory store is per process)");
        std::process::exit(1);
    }

    let pool = match DbPool::new(&config).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error connecting to database: {}", e);
            std::process::exit(1);
        }
    };
    let services = Services::with_defaults(Arc::new(PostgresStore::new(pool)), &config.auth);
    let api_keys = services.api_keys.as_ref();

    match command.as_str() {
        "list" | "ls" => {
            let workspace_id = parse_uuid_arg(&args, &["--workspace", "-w"], "--workspace");
            list_keys(api_keys, workspace_id).await;
        }
        "revoke" => {
            let id = parse_uuid_arg(&args, &["--id", "-i"], "--id");
            let by = parse_uuid_arg(&args, &["--by"], "--by");
            revoke_key(api_keys, id, by).await;
        }
        "expire" => {
            let id = parse_uuid_arg(&args, &["--id", "-i"], "--id");
            expire_key(api_keys, id).await;
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            std::process::exit(1);
        }
    }
}

fn find_arg(args: &[String], names: &[&str]) -> Option<String> {
    let mut i = 2;
    while i < args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn required_uuid(args: &[String], names: &[&str], flag: &str) -> Result<Uuid, String> {
    let raw = find_arg(args, names).ok_or_else(|| format!("{} is required", flag))?;
    Uuid::parse_str(&raw).map_err(|e| format!("{} is not a valid UUID: {}", flag, e))
}

fn parse_uuid_arg(args: &[String], names: &[&str], flag: &str) -> Uuid {
    match required_uuid(args, names, flag) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn list_keys(api_keys: &ApiKeyManager, workspace_id: Uuid) {
    let keys = match api_keys.list_for_workspace(workspace_id).await {
        Ok(k) => k,
        Err(e) => {
            eprintln!("Error listing keys: {}", e);
            std::process::exit(1);
        }
    };

    if keys.is_empty() {
        println!("No API keys found.");
        return;
    }

    println!();
    println!(
        "{:<36} {:<14} {:<20} {:<10} {:<30}",
        "ID", "PREFIX", "NAME", "STATUS", "SCOPES"
    );
    println!("{}", "-".repeat(110));

    for key in keys {
        let item = ApiKeyListItem::from(key);

        // Truncate name if too long
        let name = if item.name.chars().count() > 18 {
            format!("{}...", item.name.chars().take(15).collect::<String>())
        } else {
            item.name.clone()
        };

        println!(
            "{:<36} {:<14} {:<20} {:<10} {:<30}",
            item.id,
            item.key_prefix,
            name,
            item.status,
            item.scopes.join(",")
        );
    }
    println!();
}

async fn revoke_key(api_keys: &ApiKeyManager, id: Uuid, by: Uuid) {
    match api_keys.revoke(id, by).await {
        Ok(key) => {
            println!("API key {} ({}) revoked.", id, key.key_prefix);
        }
        Err(e) => {
            eprintln!("Error revoking key: {}", e);
            std::process::exit(1);
        }
    }
}

async fn expire_key(api_keys: &ApiKeyManager, id: Uuid) {
    match api_keys.expire_now(id).await {
        Ok(key) => {
            println!("API key {} ({}) is now {}.", id, key.key_prefix, key.status);
        }
        Err(e) => {
            eprintln!("Error expiring key: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!();
    eprintln!("Usage: manage-api-keys <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  list, ls --workspace <id>      List the API keys of a workspace");
    eprintln!("  revoke --id <id> --by <id>     Revoke an API key on behalf of a user");
    eprintln!("  expire --id <id>               Expire an API key now");
    eprintln!("  help                           Show this help");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  manage-api-keys list --workspace 01928f3e-5c2a-7b44-9a1d-2f3e4d5c6b7a");
    eprintln!("  manage-api-keys revoke --id 550e8400-e29b-41d4-a716-446655440000 --by 01928f3e-5c2a-7b44-9a1d-2f3e4d5c6b7a");
    eprintln!("  manage-api-keys expire --id 550e8400-e29b-41d4-a716-446655440000");
    eprintln!();
}
