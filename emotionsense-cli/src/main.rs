//! emotionsense-cli: command-line client for the EmotionSense HTTP API
//!
//! Talks to `emotionsense-server` the way the auth gateway does: every
//! request carries `X-User-Id`, plus the service bearer token when one is set.
//!
//! # Subcommands
//! - `status`                                  : server health
//! - `detect <file> [--voice] [--session <id>]` : detect an emotion from an image or clip
//! - `chat <message> [--emotion <label>]`       : send a chatbot message
//! - `recommend [--emotion <label>] [--type <t>]`: fetch recommendations
//! - `session end [<id>]`                      : close a session (the active one by default)

use std::path::Path;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "emotionsense-cli", version, about = "EmotionSense command-line client")]
struct Cli {
    /// EmotionSense HTTP server URL
    #[arg(long, env = "EMOTIONSENSE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// User id to act as
    #[arg(long, env = "EMOTIONSENSE_USER_ID", default_value_t = 1)]
    user: i64,

    /// Service token presented as a bearer token
    #[arg(long, env = "EMOTIONSENSE_SERVICE_TOKEN")]
    token: Option<String>,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server status
    Status,

    /// Detect the emotion in an image (or audio clip with --voice)
    Detect {
        file: String,

        /// Treat the file as audio for voice detection
        #[arg(long)]
        voice: bool,

        /// Attach the reading to this session instead of the active one
        #[arg(long)]
        session: Option<String>,
    },

    /// Send a message to the chatbot
    Chat {
        message: String,

        /// Emotion detected alongside the message
        #[arg(long)]
        emotion: Option<String>,

        #[arg(long, requires = "emotion")]
        confidence: Option<f64>,
    },

    /// Fetch recommendations for an emotion
    Recommend {
        /// Defaults to neutral on the server
        #[arg(long)]
        emotion: Option<String>,

        /// text, music, activity or quote
        #[arg(long = "type")]
        content_type: Option<String>,
    },

    /// Manage emotion sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Debug, Subcommand)]
enum SessionAction {
    /// Close a session and print its statistics
    End {
        /// Session id; the active session when omitted
        id: Option<String>,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Detected {
    pub detected: bool,
    pub emotion: String,
    pub confidence: f64,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecommendationItem {
    pub title: String,
    pub content_type: String,
    pub content: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ClosedSession {
    pub id: String,
    pub dominant_emotion: Option<String>,
    pub average_confidence: Option<f64>,
    pub total_emotions_detected: i64,
}

// ============================================================================
// Formatting
// ============================================================================

pub fn format_detection(d: &Detected) -> String {
    if !d.detected {
        return "No face detected".to_string();
    }
    let mut line = format!("{} ({:.0}%)", d.emotion, d.confidence * 100.0);
    if let Some(session) = &d.session_id {
        line.push_str(&format!("  session {}", session));
    }
    line
}

pub fn format_recommendation(r: &RecommendationItem) -> String {
    let mut heading = format!("[{}] {}", r.content_type, r.title);
    if !r.artist.is_empty() {
        heading.push_str(&format!(" by {}", r.artist));
    }
    if let Some(minutes) = r.duration_minutes {
        heading.push_str(&format!(" ({} min)", minutes));
    }
    let preview: String = r.content.chars().take(200).collect();
    format!("{}\n  {}", heading, preview)
}

pub fn format_session(s: &ClosedSession) -> String {
    match (&s.dominant_emotion, s.average_confidence) {
        (Some(emotion), Some(avg)) => format!(
            "Session {} closed: {} readings, mostly {}, average confidence {:.0}%",
            s.id,
            s.total_emotions_detected,
            emotion,
            avg * 100.0
        ),
        _ => format!("Session {} closed with no readings", s.id),
    }
}

/// Multipart field name for a detection upload.
pub fn upload_field(voice: bool) -> (&'static str, &'static str) {
    if voice {
        ("voice", "audio")
    } else {
        ("face", "image")
    }
}

// ============================================================================
// HTTP Client
// ============================================================================

struct Api {
    client: Client,
    server: String,
    user: i64,
    token: Option<String>,
}

impl Api {
    fn new(server: &str, user: i64, token: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_string(),
            user,
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.header("X-User-Id", self.user.to_string());
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send and turn non-2xx responses into the server's error message.
    fn send(&self, req: RequestBuilder) -> anyhow::Result<Response> {
        let resp = self.authed(req).send()?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body: Value = resp.json().unwrap_or_default();
        let message = body["error"].as_str().unwrap_or("no error message");
        anyhow::bail!("server returned {}: {}", status, message)
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn do_status(api: &Api) -> anyhow::Result<()> {
    let url = api.url("/health");
    let resp = match api.client.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("emotionsense-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        eprintln!("emotionsense-cli: server unhealthy (HTTP {})", resp.status());
        std::process::exit(1);
    }

    let body: Value = resp.json().unwrap_or_default();
    println!("EmotionSense server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:             {}", body["version"].as_str().unwrap_or("?"));
    println!("Storage:             {}", body["storage"].as_str().unwrap_or("?"));
    if let Some(pg) = body["postgresql"].as_str() {
        println!("PostgreSQL:          {}", pg);
    }
    Ok(())
}

fn do_detect(
    api: &Api,
    file: &str,
    voice: bool,
    session: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    if !Path::new(file).is_file() {
        anyhow::bail!("{} is not a file", file);
    }
    let (source, field) = upload_field(voice);
    let mut form = reqwest::blocking::multipart::Form::new()
        .text("source", source)
        .file(field, file)?;
    if let Some(id) = session {
        form = form.text("session_id", id);
    }

    let resp = api.send(api.client.post(api.url("/api/emotions/logs/detect")).multipart(form))?;
    let body: Value = resp.json()?;
    if json {
        return print_json(&body);
    }
    let detected: Detected = serde_json::from_value(body)?;
    println!("{}", format_detection(&detected));
    Ok(())
}

fn do_chat(
    api: &Api,
    message: &str,
    emotion: Option<String>,
    confidence: Option<f64>,
    json: bool,
) -> anyhow::Result<()> {
    let body = serde_json::json!({
        "message": message,
        "emotion": emotion,
        "confidence": confidence,
    });
    let resp = api.send(api.client.post(api.url("/api/chatbot/messages/send")).json(&body))?;
    let reply: Value = resp.json()?;
    if json {
        return print_json(&reply);
    }
    println!("{}", reply["bot_message"]["message"].as_str().unwrap_or(""));
    if let Some(trend) = reply["mood_trend"].as_str() {
        println!("(mood trend: {})", trend);
    }
    Ok(())
}

fn do_recommend(
    api: &Api,
    emotion: Option<String>,
    content_type: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(e) = emotion {
        query.push(("emotion", e));
    }
    if let Some(t) = content_type {
        query.push(("type", t));
    }
    let resp = api.send(
        api.client
            .get(api.url("/api/recommendations/items/for_emotion"))
            .query(&query),
    )?;
    let body: Value = resp.json()?;
    if json {
        return print_json(&body);
    }

    let items: Vec<RecommendationItem> = serde_json::from_value(body)?;
    if items.is_empty() {
        eprintln!("No recommendations found");
        return Ok(());
    }
    for item in &items {
        println!("{}\n", format_recommendation(item));
    }
    Ok(())
}

fn active_session_id(sessions: &[Value]) -> Option<String> {
    sessions
        .iter()
        .find(|s| s["is_active"].as_bool() == Some(true))
        .and_then(|s| s["id"].as_str())
        .map(str::to_string)
}

fn do_session_end(api: &Api, id: Option<String>, json: bool) -> anyhow::Result<()> {
    let id = match id {
        Some(id) => id,
        None => {
            // Listing never opens a session, unlike GET /sessions/active
            let sessions: Vec<Value> = api
                .send(api.client.get(api.url("/api/emotions/sessions")))?
                .json()?;
            active_session_id(&sessions)
                .ok_or_else(|| anyhow::anyhow!("no active session to end"))?
        }
    };

    let url = api.url(&format!("/api/emotions/sessions/{}/end", id));
    let body: Value = api.send(api.client.post(url))?.json()?;
    if json {
        return print_json(&body);
    }
    let closed: ClosedSession = serde_json::from_value(body)?;
    println!("{}", format_session(&closed));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let result = Api::new(&cli.server, cli.user, cli.token).and_then(|api| match cli.command {
        Commands::Status => do_status(&api),
        Commands::Detect {
            file,
            voice,
            session,
        } => do_detect(&api, &file, voice, session, cli.json),
        Commands::Chat {
            message,
            emotion,
            confidence,
        } => do_chat(&api, &message, emotion, confidence, cli.json),
        Commands::Recommend {
            emotion,
            content_type,
        } => do_recommend(&api, emotion, content_type, cli.json),
        Commands::Session {
            action: SessionAction::End { id },
        } => do_session_end(&api, id, cli.json),
    });

    if let Err(e) = result {
        eprintln!("emotionsense-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_session_end_without_id() {
        let cli =
            Cli::try_parse_from(["emotionsense-cli", "--user", "7", "session", "end"]).unwrap();
        assert_eq!(cli.user, 7);
        assert!(matches!(
            cli.command,
            Commands::Session {
                action: SessionAction::End { id: None }
            }
        ));
    }

    #[test]
    fn test_active_session_id_picks_only_open_session() {
        let sessions = vec![
            serde_json::json!({ "id": "closed-1", "is_active": false }),
            serde_json::json!({ "id": "open-1", "is_active": true }),
        ];
        assert_eq!(active_session_id(&sessions).as_deref(), Some("open-1"));

        let none_open = vec![serde_json::json!({ "id": "closed-1", "is_active": false })];
        assert!(active_session_id(&none_open).is_none());
        assert!(active_session_id(&[]).is_none());
    }

    #[test]
    fn test_confidence_requires_emotion() {
        let args = ["emotionsense-cli", "chat", "hi", "--confidence", "0.5"];
        assert!(Cli::try_parse_from(args).is_err());
        assert!(Cli::try_parse_from([
            "emotionsense-cli",
            "chat",
            "hi",
            "--emotion",
            "sad",
            "--confidence",
            "0.5"
        ])
        .is_ok());
    }

    #[test]
    fn test_upload_field_by_source() {
        assert_eq!(upload_field(false), ("face", "image"));
        assert_eq!(upload_field(true), ("voice", "audio"));
    }

    #[test]
    fn test_format_detection() {
        let found = Detected {
            detected: true,
            emotion: "happy".into(),
            confidence: 0.874,
            session_id: Some("abc".into()),
        };
        assert_eq!(format_detection(&found), "happy (87%)  session abc");

        let none = Detected {
            detected: false,
            emotion: "neutral".into(),
            confidence: 0.0,
            session_id: None,
        };
        assert_eq!(format_detection(&none), "No face detected");
    }

    #[test]
    fn test_format_recommendation_includes_artist_and_duration() {
        let item: RecommendationItem = serde_json::from_value(serde_json::json!({
            "title": "Weightless",
            "content_type": "music",
            "content": "Ambient track",
            "artist": "Marconi Union",
            "duration_minutes": 8,
        }))
        .unwrap();
        let text = format_recommendation(&item);
        assert!(text.starts_with("[music] Weightless by Marconi Union (8 min)"));
        assert!(text.ends_with("Ambient track"));
    }

    #[test]
    fn test_format_session_without_readings() {
        let s = ClosedSession {
            id: "s1".into(),
            dominant_emotion: None,
            average_confidence: None,
            total_emotions_detected: 0,
        };
        assert_eq!(format_session(&s), "Session s1 closed with no readings");
    }
}
