//! parley-cli — terminal client for a Parley server
//!
//! Talks to the same HTTP endpoints the browser widget and the dashboard use.
//!
//! # Subcommands
//! - `chat [MESSAGE] --api-key <key>` — send one message, or start an
//!   interactive session when no message is given
//! - `agents list --token <jwt> [--json]` — list the caller's agents
//! - `status`                               — show server health

use std::io::{BufRead, Write};

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:3000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "parley-cli", version, about = "Parley chat agent client")]
struct Cli {
    /// Parley HTTP server URL (overrides PARLEY_HTTP_URL env var)
    #[arg(long, env = "PARLEY_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Chat with an agent through the widget endpoint
    Chat {
        /// Message to send; omit for an interactive session
        message: Option<String>,

        /// Agent credential (the value the widget sends as x-agent-api-key)
        #[arg(long, env = "PARLEY_AGENT_API_KEY")]
        api_key: String,

        /// Session identifier; a fresh one is generated when omitted
        #[arg(long)]
        session: Option<String>,

        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Manage agents with an owner token
    Agents {
        #[command(subcommand)]
        command: AgentCommands,
    },

    /// Show Parley server status
    Status,
}

#[derive(Debug, Subcommand)]
enum AgentCommands {
    /// List your agents
    List {
        /// Owner access token (sent as a bearer token)
        #[arg(long, env = "PARLEY_TOKEN")]
        token: String,

        /// Print the raw JSON array
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

/// Successful reply from POST /api/widget/chat
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub message: String,
    pub conversation_id: String,
    pub message_id: String,
}

/// The subset of an agent record the CLI prints
#[derive(Debug, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub role: String,
    pub model: String,
    pub is_active: bool,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
struct AgentList {
    agents: Vec<AgentSummary>,
}

// ============================================================================
// Formatting helpers
// ============================================================================

/// Request body for one widget chat turn.
pub fn chat_body(message: &str, session_id: &str, conversation_id: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "message": message,
        "sessionId": session_id,
    });
    if let Some(id) = conversation_id {
        body["conversationId"] = serde_json::json!(id);
    }
    body
}

/// Pull the `error` field out of a Parley error body, falling back to the raw text.
pub fn error_text(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// One line per agent: short id, state, model, name and role.
pub fn format_agent(agent: &AgentSummary) -> String {
    let short_id: String = agent.id.chars().take(8).collect();
    let state = if agent.is_active { "active" } else { "paused" };
    format!(
        "{}  {:<6}  {:<20}  {} ({})",
        short_id, state, agent.model, agent.name, agent.role
    )
}

/// Hide all but the prefix and the last four characters of a credential.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 10 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("agent_…{}", tail)
}

fn new_session_id() -> String {
    format!("cli_{}", uuid::Uuid::new_v4().simple())
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

fn send_chat(
    client: &reqwest::blocking::Client,
    server: &str,
    api_key: &str,
    body: &serde_json::Value,
) -> anyhow::Result<ChatReply> {
    let url = format!("{}/api/widget/chat", server);
    let resp = client
        .post(&url)
        .header("x-agent-api-key", api_key)
        .json(body)
        .send()
        .map_err(|e| anyhow::anyhow!("connection failed to {}: {}", url, e))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().unwrap_or_default();
        anyhow::bail!("server returned {}: {}", status, error_text(&text));
    }

    Ok(resp.json()?)
}

/// Send one message, or loop over stdin lines keeping the conversation.
fn do_chat(
    server: &str,
    api_key: &str,
    message: Option<String>,
    session: Option<String>,
    mut conversation: Option<String>,
) -> anyhow::Result<()> {
    let client = client(90)?;
    let session_id = session.unwrap_or_else(new_session_id);

    if let Some(message) = message {
        let reply = send_chat(
            &client,
            server,
            api_key,
            &chat_body(&message, &session_id, conversation.as_deref()),
        )?;
        println!("{}", reply.message);
        eprintln!("conversation: {}", reply.conversation_id);
        return Ok(());
    }

    eprintln!("Chatting as session {} (Ctrl+D to quit)", session_id);
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        match send_chat(
            &client,
            server,
            api_key,
            &chat_body(text, &session_id, conversation.as_deref()),
        ) {
            Ok(reply) => {
                conversation = Some(reply.conversation_id);
                println!("{}\n", reply.message);
            }
            Err(e) => eprintln!("parley-cli: {}", e),
        }
    }

    Ok(())
}

/// List agents by calling GET /api/agents.
fn do_agents_list(server: &str, token: &str, json_output: bool) -> anyhow::Result<()> {
    let client = client(30)?;
    let url = format!("{}/api/agents", server);

    let resp = client
        .get(&url)
        .bearer_auth(token)
        .send()
        .map_err(|e| anyhow::anyhow!("connection failed to {}: {}", url, e))?;

    let status = resp.status();
    let text = resp.text()?;
    if !status.is_success() {
        anyhow::bail!("server returned {}: {}", status, error_text(&text));
    }

    if json_output {
        let value: serde_json::Value = serde_json::from_str(&text)?;
        println!("{}", serde_json::to_string_pretty(&value["agents"])?);
        return Ok(());
    }

    let list: AgentList = serde_json::from_str(&text)?;
    if list.agents.is_empty() {
        eprintln!("No agents yet.");
        return Ok(());
    }
    for agent in &list.agents {
        println!("{}  key {}", format_agent(agent), mask_key(&agent.api_key));
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = client(10)?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Parley server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:       {}", body["version"].as_str().unwrap_or("?"));
            println!("Store:         {}", body["store"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("parley-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("parley-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Chat {
            message,
            api_key,
            session,
            conversation,
        } => do_chat(&server, &api_key, message, session, conversation),
        Commands::Agents {
            command: AgentCommands::List { token, json },
        } => do_agents_list(&server, &token, json),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("parley-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(active: bool) -> AgentSummary {
        AgentSummary {
            id: "7b5c24ab-1234-5678-9abc-def012345678".to_string(),
            name: "Helper".to_string(),
            role: "support".to_string(),
            model: "mistral-small-2402".to_string(),
            is_active: active,
            api_key: "agent_ABCDEFGHIJKLMNOPQRSTUVWXYZ123456".to_string(),
        }
    }

    #[test]
    fn test_chat_body_without_conversation() {
        let body = chat_body("Hi", "sess-1", None);
        assert_eq!(body["message"], "Hi");
        assert_eq!(body["sessionId"], "sess-1");
        assert!(body.get("conversationId").is_none());
    }

    #[test]
    fn test_chat_body_with_conversation() {
        let body = chat_body("Again", "sess-1", Some("c0ffee"));
        assert_eq!(body["conversationId"], "c0ffee");
    }

    #[test]
    fn test_chat_reply_parses_camel_case() {
        let reply: ChatReply = serde_json::from_str(
            r#"{"message":"Hello","conversationId":"c-1","messageId":"m-1"}"#,
        )
        .unwrap();
        assert_eq!(reply.message, "Hello");
        assert_eq!(reply.conversation_id, "c-1");
        assert_eq!(reply.message_id, "m-1");
    }

    #[test]
    fn test_error_text_prefers_error_field() {
        assert_eq!(
            error_text(r#"{"error":"API key is required","status":"error"}"#),
            "API key is required"
        );
        assert_eq!(error_text("  Bad Gateway \n"), "Bad Gateway");
    }

    #[test]
    fn test_format_agent_line() {
        let line = format_agent(&agent(true));
        assert!(line.starts_with("7b5c24ab  active"));
        assert!(line.contains("mistral-small-2402"));
        assert!(line.ends_with("Helper (support)"));

        assert!(format_agent(&agent(false)).contains("paused"));
    }

    #[test]
    fn test_mask_key_keeps_tail_only() {
        let masked = mask_key("agent_ABCDEFGHIJKLMNOPQRSTUVWXYZ123456");
        assert_eq!(masked, "agent_…3456");
        assert_eq!(mask_key("short"), "*****");
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = new_session_id();
        let b = new_session_id();
        assert!(a.starts_with("cli_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_cli_parses_agents_list() {
        let cli = Cli::try_parse_from([
            "parley-cli",
            "--server",
            "http://example:3000",
            "agents",
            "list",
            "--token",
            "jwt",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.server, "http://example:3000");
        match cli.command {
            Commands::Agents {
                command: AgentCommands::List { token, json },
            } => {
                assert_eq!(token, "jwt");
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
