//! Doubt Control - CLI client for the doubt solver
//!
//! Talks to doubtd over HTTP. `normalize` runs locally.

use anyhow::Result;
use clap::{Parser, Subcommand};
use doubt_common::{Config, Strategy};
use doubtctl::api_client::ApiClient;
use doubtctl::{commands, DEFAULT_SERVER};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "doubtctl")]
#[command(about = "Exam doubt solver - ask questions, read solutions", long_about = None)]
#[command(version)]
struct Cli {
    /// doubtd base URL
    #[arg(long, global = true, env = "DOUBT_SERVER", default_value = DEFAULT_SERVER)]
    server: String,

    /// Session token printed by `login`
    #[arg(long, global = true, env = "DOUBT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon health
    Status,

    /// Fix math delimiters in a file (or stdin) for display
    Normalize {
        /// preserve | commands (defaults to the configured strategy)
        #[arg(long)]
        strategy: Option<Strategy>,

        file: Option<PathBuf>,
    },

    /// Create an account
    Signup {
        username: String,

        #[arg(long, env = "DOUBT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Log in and print a session token
    Login {
        username: String,

        #[arg(long, env = "DOUBT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// End the current session
    Logout,

    /// Ask a new question
    Ask {
        text: Option<String>,

        /// JPEG or PNG photo of the question
        #[arg(long)]
        image: Option<PathBuf>,

        #[arg(long)]
        subject: Option<String>,

        #[arg(long = "type")]
        question_type: Option<String>,
    },

    /// Continue an existing question thread
    FollowUp { id: String, text: String },

    /// Show a question thread
    Show { id: String },

    /// List your questions
    List,

    /// Leave feedback on a solution
    Feedback {
        id: String,
        text: String,

        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        rating: Option<u8>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (server, token) = (cli.server, cli.token);
    let client = || ApiClient::new(&server, token.clone());

    match cli.command {
        Commands::Normalize { strategy, file } => {
            let strategy = strategy.unwrap_or_else(|| {
                Config::load()
                    .map(|c| c.solver.strategy)
                    .unwrap_or_default()
            });
            commands::normalize(file.as_deref(), strategy)
        }
        Commands::Status => commands::status(&client()?),
        Commands::Signup { username, password } => commands::signup(&client()?, &username, &password),
        Commands::Login { username, password } => commands::login(&client()?, &username, &password),
        Commands::Logout => commands::logout(&client()?),
        Commands::Ask {
            text,
            image,
            subject,
            question_type,
        } => commands::ask(&client()?, text, image.as_deref(), subject, question_type),
        Commands::FollowUp { id, text } => commands::follow_up(&client()?, &id, &text),
        Commands::Show { id } => commands::show(&client()?, &id),
        Commands::List => commands::list(&client()?),
        Commands::Feedback { id, text, rating } => commands::feedback(&client()?, &id, &text, rating),
    }
}
