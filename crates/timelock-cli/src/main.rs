use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use timelock_core::message::{MessageStatus, MessageType};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "timelock-cli")]
#[command(about = "CLI client for a timelock ledger node")]
struct Cli {
    /// Node base URL
    #[arg(long, global = true, env = "TIMELOCK_NODE", default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Commit a message that opens at a future time
    #[command(group(ArgGroup::new("when").required(true).args(["unlock_at", "unlock_in"])))]
    #[command(group(ArgGroup::new("body").required(true).args(["text", "file"])))]
    Submit {
        #[arg(long)]
        sender: String,
        #[arg(long)]
        receiver: String,
        /// RFC 3339 unlock time, e.g. 2027-01-01T00:00:00Z
        #[arg(long)]
        unlock_at: Option<DateTime<Utc>>,
        /// Seconds from now
        #[arg(long)]
        unlock_in: Option<i64>,
        #[arg(long)]
        text: Option<String>,
        /// Send a file instead of text
        #[arg(long)]
        file: Option<PathBuf>,
        /// text, image, document or file
        #[arg(long = "type")]
        message_type: Option<MessageType>,
        /// Mine the block right away
        #[arg(long)]
        mine: bool,
    },
    /// Reveal a message whose unlock time has passed
    Reveal {
        id: u64,
        #[arg(long)]
        requester: String,
        /// Write the content here instead of printing it
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List messages sent or received by a participant
    Messages {
        #[arg(long)]
        participant: String,
    },
    /// Tag a message as locked, unlocked or revealed
    Status {
        id: u64,
        #[arg(long)]
        requester: String,
        /// locked, unlocked or revealed
        #[arg(long)]
        status: MessageStatus,
    },
    /// Remove a message record (its ledger entry stays)
    Delete {
        id: u64,
        #[arg(long)]
        requester: String,
    },
    /// Seal pending transactions into a block
    Mine,
    /// Show the chain tip
    Head,
    /// Register peers with the node
    Peers {
        #[arg(required = true)]
        nodes: Vec<String>,
    },
    /// Adopt the longest valid peer chain
    Resolve,
}

async fn print_response(res: reqwest::Response) -> Result<Option<Value>> {
    let status = res.status();
    let body = res.text().await?;
    println!("status: {status}");
    if body.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(&body) {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(status.is_success().then_some(value))
        }
        Err(_) => {
            println!("{body}");
            Ok(None)
        }
    }
}

fn submit_body(
    sender: String,
    receiver: String,
    unlock_time: DateTime<Utc>,
    text: Option<String>,
    file: Option<PathBuf>,
    message_type: Option<MessageType>,
    mine: bool,
) -> Result<Value> {
    let mut body = json!({
        "sender": sender,
        "receiver": receiver,
        "unlock_time": unlock_time,
        "mine": mine,
    });
    match (text, file) {
        (Some(text), _) => {
            body["content"] = json!(text);
            body["message_type"] = json!(message_type.unwrap_or(MessageType::Text));
        }
        (None, Some(path)) => {
            let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            body["content"] = json!(base64::encode(bytes));
            body["encoding"] = json!("base64");
            body["message_type"] = json!(message_type.unwrap_or(MessageType::File));
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                body["file_name"] = json!(name);
            }
        }
        (None, None) => bail!("either --text or --file is required"),
    }
    Ok(body)
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    match cli.cmd {
        Command::Submit {
            sender,
            receiver,
            unlock_at,
            unlock_in,
            text,
            file,
            message_type,
            mine,
        } => {
            let unlock_time = match (unlock_at, unlock_in) {
                (Some(at), _) => at,
                (None, Some(secs)) => Utc::now() + Duration::seconds(secs),
                (None, None) => bail!("either --unlock-at or --unlock-in is required"),
            };
            let body = submit_body(sender, receiver, unlock_time, text, file, message_type, mine)?;
            debug!(%unlock_time, "submitting message");
            let res = client.post(format!("{node}/messages")).json(&body).send().await?;
            print_response(res).await?;
        }
        Command::Reveal { id, requester, out } => {
            let res = client
                .post(format!("{node}/messages/{id}/reveal"))
                .json(&json!({ "requester": requester }))
                .send()
                .await?;
            let Some(body) = print_response(res).await? else {
                return Ok(());
            };
            if let Some(out) = out {
                let content = body["content"].as_str().unwrap_or_default();
                let bytes = if body["encoding"] == "base64" {
                    base64::decode(content).context("decoding content")?
                } else {
                    content.as_bytes().to_vec()
                };
                std::fs::write(&out, bytes).with_context(|| format!("writing {}", out.display()))?;
                println!("content written to {}", out.display());
            }
        }
        Command::Messages { participant } => {
            let res = client
                .get(format!("{node}/messages"))
                .query(&[("participant", participant)])
                .send()
                .await?;
            print_response(res).await?;
        }
        Command::Status {
            id,
            requester,
            status,
        } => {
            let res = client
                .put(format!("{node}/messages/{id}/status"))
                .json(&json!({ "requester": requester, "status": status }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Command::Delete { id, requester } => {
            let res = client
                .delete(format!("{node}/messages/{id}"))
                .query(&[("requester", requester)])
                .send()
                .await?;
            print_response(res).await?;
        }
        Command::Mine => {
            let res = client.post(format!("{node}/mine")).send().await?;
            print_response(res).await?;
        }
        Command::Head => {
            let res = client.get(format!("{node}/chain/head")).send().await?;
            print_response(res).await?;
        }
        Command::Peers { nodes } => {
            let res = client
                .post(format!("{node}/nodes"))
                .json(&json!({ "nodes": nodes }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Command::Resolve => {
            let res = client.post(format!("{node}/nodes/resolve")).send().await?;
            print_response(res).await?;
        }
    }
    Ok(())
}
