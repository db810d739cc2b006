use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the session proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:3000")]
    url: String,

    /// Admin API key (required for admin commands).
    #[arg(short, long, env = "PROXY_ADMIN_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a session from the directory
    Create {
        /// Backend key ("stand")
        #[arg(long)]
        backend: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        role: String,
    },
    /// Create a session for an explicit origin and credential
    CreateDirect {
        #[arg(long)]
        target: String,
        #[arg(long)]
        credential: String,
    },
    /// Check proxy system status
    Status,
    /// List live sessions
    Sessions,
    /// Delete expired sessions
    Purge,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    if !cli.key.is_empty() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
        );
    }

    let res = match cli.command {
        Commands::Create { backend, user, role } => {
            client
                .post(format!("{}/create-session", base))
                .json(&json!({ "backendKey": backend, "userId": user, "roleId": role }))
                .send()
                .await?
        }
        Commands::CreateDirect { target, credential } => {
            client
                .post(format!("{}/create-session", base))
                .json(&json!({ "url": target, "credential": credential }))
                .send()
                .await?
        }
        Commands::Status => {
            client
                .get(format!("{}/admin/status", base))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Sessions => {
            client
                .get(format!("{}/admin/sessions", base))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Purge => {
            client
                .post(format!("{}/admin/sessions/purge", base))
                .headers(headers)
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: proxy returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
