//! CLI entry point for the user record service.
//!
//! # Responsibility
//! - Bootstrap config, logging and storage from the environment.
//! - Dispatch one request per invocation and print status plus JSON body.

use clap::{Parser, Subcommand};
use log::error;
use std::process::ExitCode;
use usercrud_api::{ApiResponse, UserApi};
use usercrud_core::{
    init_logging, AppConfig, CancellationToken, ConnectionPool, SqliteUserRepository,
};

const ENV_FILE: &str = ".env";

#[derive(Parser, Debug)]
#[command(name = "usercrud")]
#[command(about = "Manage user records", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List all users ordered by id
    List,

    /// Create a user from a JSON body
    Create {
        #[arg(value_name = "JSON")]
        body: String,
    },

    /// Replace every field of user ID with a JSON body
    Update {
        #[arg(value_name = "ID")]
        id: String,
        #[arg(value_name = "JSON")]
        body: String,
    },

    /// Permanently delete user ID
    Delete {
        #[arg(value_name = "ID")]
        id: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(ENV_FILE) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = init_logging(&config.log_level, &config.log_dir) {
        eprintln!("logging error: {err}");
        return ExitCode::FAILURE;
    }

    let pool = match ConnectionPool::open(&config.db_path, config.pool_options()) {
        Ok(pool) => pool,
        Err(err) => {
            error!(
                "event=storage_open module=cli status=error error_code=storage_open_failed error={}",
                err
            );
            eprintln!("storage error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let api = UserApi::new(SqliteUserRepository::new(pool));
    let cancel = CancellationToken::new();
    let response = match &cli.command {
        Commands::List => api.list(&cancel),
        Commands::Create { body } => api.create(body, &cancel),
        Commands::Update { id, body } => api.update(id, body, &cancel),
        Commands::Delete { id } => api.delete(id, &cancel),
    };

    print_response(&response);
    if response.status < 400 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_response(response: &ApiResponse) {
    println!("{}", response.status);
    if !response.body.is_null() {
        match serde_json::to_string_pretty(&response.body) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{}", response.body),
        }
    }
}
