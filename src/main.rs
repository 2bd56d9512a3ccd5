use clap::{Parser, Subcommand};
use jarvis::auth::{self, FileStore};
use jarvis::client::ApiClient;
use jarvis::protocol::{LoginRequest, RegisterRequest};
use jarvis::ui;
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

type MainResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Parser)]
#[command(name = "jarvis", version, about = "Terminal client for the JARVIS assistant")]
struct Cli {
    #[arg(
        long,
        env = "JARVIS_BASE_URL",
        default_value = "http://localhost:8000/api"
    )]
    base_url: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Login,
    Register,
    Logout,
    Sessions,
    Chat {
        #[arg(long)]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() -> MainResult {
    dotenvy::dotenv().ok();
    init_logging()?;

    let cli = Cli::parse();
    let store = Box::new(FileStore::new(FileStore::default_path()));
    let client = ApiClient::new(&cli.base_url, store);

    match cli.command.unwrap_or(Commands::Chat { session: None }) {
        Commands::Login => {
            let email = prompt("Email: ")?;
            let password = prompt("Password: ")?;
            let user = client.login(&LoginRequest { email, password }).await?;
            println!("Logged in as {}.", user.full_name);
        }
        Commands::Register => {
            let full_name = prompt("Full name: ")?;
            let email = prompt("Email: ")?;
            let password = prompt("Password: ")?;
            let student_id = prompt("Student id (optional): ")?;
            let user = client
                .register(&RegisterRequest {
                    full_name,
                    email,
                    password,
                    student_id: if student_id.is_empty() {
                        None
                    } else {
                        Some(student_id)
                    },
                })
                .await?;
            println!("Registered and logged in as {}.", user.full_name);
        }
        Commands::Logout => {
            client.logout();
            println!("Logged out.");
        }
        Commands::Sessions => {
            require_login(&client)?;
            let sessions = client.sessions().await?;
            if sessions.is_empty() {
                println!("No chat sessions yet.");
            }
            for session in sessions {
                println!(
                    "{}  {}  ({} messages, updated {})",
                    session.id,
                    session.title.as_deref().unwrap_or("(untitled)"),
                    session.message_count,
                    session.updated_at
                );
            }
        }
        Commands::Chat { session } => {
            require_login(&client)?;
            let history = match &session {
                Some(id) => client.session_messages(id).await?,
                None => Vec::new(),
            };
            ui::run_tui(client, session, history)?;
        }
    }

    Ok(())
}

fn require_login(client: &ApiClient) -> MainResult {
    if client.current_user().is_none() {
        return Err("Not logged in; run `jarvis login` first.".into());
    }
    Ok(())
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut value = String::new();
    io::stdin().read_line(&mut value)?;
    Ok(value.trim().to_string())
}

// Logs go to a file so tracing output never fights the raw-mode terminal.
fn init_logging() -> io::Result<()> {
    let dir = auth::data_dir();
    std::fs::create_dir_all(&dir)?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("jarvis.log"))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    Ok(())
}
