use clap::Parser;
use scrypt::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Scrypt,
};
use std::{env::VarError, error::Error};

use pimbin::conf::{self, PimbinConfig};
use pimbin::repo::Repository;

/// Manage pimbin users and their upload tokens.
#[derive(Debug, Parser)]
#[clap(version, author, about)]
struct Opts {
    /// defaults to DATABASE_URL env variable, then to the configured database
    #[clap(short, long, global = true)]
    database_url: Option<String>,

    #[clap(subcommand)]
    cmd: SubCommand,
}

#[derive(Debug, Parser)]
enum SubCommand {
    /// Create a user and print its first token
    CreateUser {
        username: String,
        /// prompted for when omitted
        password: Option<String>,
    },
    ChangePassword {
        username: String,
        /// prompted for when omitted
        password: Option<String>,
    },
    /// Issue a new token, the previous one stops working.
    /// A running server only sees it after a restart.
    RefreshToken { username: String },
    ListUsers,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let opts = Opts::parse();
    let db_url = get_db_url(opts.database_url)?;
    let repo = Repository::open(&db_url)?;

    match opts.cmd {
        SubCommand::CreateUser { username, password } => {
            let prompt = format!("Password for new user {}: ", username);
            let password = password_or_prompt(password, &prompt)?;
            let user = repo
                .create_user(username, hash_password(&password)?)
                .await?;
            let token = repo.refresh_token(user.username).await?;
            println!("{}", token);
        }
        SubCommand::ChangePassword { username, password } => {
            // fail on an unknown user before asking for anything
            let user = repo.get_user(username).await?;
            let prompt = format!("New password for user {}: ", user.username);
            let password = password_or_prompt(password, &prompt)?;
            repo.update_password(user.username, hash_password(&password)?)
                .await?;
        }
        SubCommand::RefreshToken { username } => {
            let token = repo.refresh_token(username).await?;
            println!("{}", token);
        }
        SubCommand::ListUsers => {
            for user in repo.list_users().await? {
                match user.token {
                    Some(token) => println!("{}\t{}", user.username, token),
                    None => println!("{}\t-", user.username),
                }
            }
        }
    }
    Ok(())
}

/// Passwords given on the command line end up in the shell history, reading
/// them from the terminal is the default.
fn password_or_prompt(password: Option<String>, prompt: &str) -> std::io::Result<String> {
    match password {
        Some(p) => Ok(p),
        None => rpassword::prompt_password(prompt),
    }
}

fn hash_password(password: &str) -> Result<String, Box<dyn Error>> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Scrypt
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| format!("cannot hash password: {}", err))?;
    Ok(hash.to_string())
}

fn get_db_url(database_url: Option<String>) -> Result<String, Box<dyn Error>> {
    match database_url {
        Some(x) => Ok(x),
        None => match std::env::var("DATABASE_URL") {
            Ok(x) => Ok(x),
            Err(VarError::NotPresent) => {
                let config = PimbinConfig::from_figment(&conf::figment())?;
                Ok(config.database_url)
            }
            Err(VarError::NotUnicode(_)) => Err("DATABASE_URL env var not valid unicode".into()),
        },
    }
}
