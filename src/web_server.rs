use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    serve, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::constants;
use crate::relay::CompletionRelay;
use crate::session::ChatSession;
use crate::speech;

// Messages the browser sends over the WebSocket.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    /// Submit one user message for completion.
    Chat { text: String },
    /// Switch the session to another catalog model.
    SetModel { model: String },
    /// Toggle spoken playback of finished replies.
    Voice { enabled: bool },
    /// Reset the conversation transcript.
    Clear,
}

// Messages sent back to the browser. Relay error annotations arrive as
// ordinary `token` fragments, so the client renders them inline.
#[derive(Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Start,
    Token { text: String },
    Done { text: String },
    Cleared,
}

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    relay: Arc<CompletionRelay>,
}

impl AppState {
    pub fn new(relay: Arc<CompletionRelay>) -> Result<Self> {
        let templates = create_minijinja_env().context("Failed to initialize template engine")?;
        Ok(Self {
            templates: Arc::new(templates),
            relay,
        })
    }
}

// Minijinja Environment setup
fn create_minijinja_env() -> Result<AutoReloader> {
    // Use AutoReloader for development convenience
    let reloader = AutoReloader::new(|notifier| {
        let loader = path_loader("templates");
        let mut env = Environment::new();
        env.set_loader(loader);
        // Watch the templates directory for changes
        notifier.watch_path("templates", true);
        Ok(env)
    });
    Ok(reloader)
}

async fn index_handler(
    State(state): State<AppState>,
) -> Result<axum::response::Html<String>, axum::response::Html<String>> {
    // Acquire env, get template, and render within the same block
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                let context = minijinja::context! {
                    title => "Sparky 2.0",
                    models => constants::model_catalog(),
                };
                tmpl.render(context)
            })
        })
        .map(axum::response::Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            axum::response::Html(format!("Internal Server Error: {}", e))
        })
}

// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serialize and send one server message; false means the client is gone.
async fn send_message(socket: &mut WebSocket, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json_msg) => socket.send(Message::Text(json_msg)).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            true
        }
    }
}

// Handle one WebSocket connection. The session context lives here, owned by
// this task, and is dropped when the browser disconnects.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("New WebSocket connection established");
    let mut session = ChatSession::new();

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                let parsed = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!("Ignoring unparseable client message: {} - Error: {}", text, e);
                        continue;
                    }
                };
                match parsed {
                    ClientMessage::Chat { text } => {
                        if text.trim().is_empty() {
                            continue;
                        }
                        if !run_chat_turn(&mut socket, &state, &mut session, text).await {
                            break;
                        }
                    }
                    ClientMessage::SetModel { model } => {
                        session.set_model(&model);
                    }
                    ClientMessage::Voice { enabled } => {
                        session.set_voice_enabled(enabled);
                    }
                    ClientMessage::Clear => {
                        session.clear();
                        if !send_message(&mut socket, &ServerMessage::Cleared).await {
                            break;
                        }
                    }
                }
            }
            Message::Binary(_) => {
                warn!("Received unexpected binary message from client");
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum answers pings automatically
            }
            Message::Close(_) => {
                info!("Client requested WebSocket close");
                break;
            }
        }
    }
    info!("WebSocket connection closed");
}

/// Run one completion turn: append the user message, drain the relay's
/// fragment sequence into the socket, then append the finished reply and
/// kick off speech playback. Returns false once the client is unreachable.
///
/// One turn runs at a time: the socket is not polled for new client messages
/// until the fragment sequence is exhausted.
async fn run_chat_turn(
    socket: &mut WebSocket,
    state: &AppState,
    session: &mut ChatSession,
    text: String,
) -> bool {
    session.begin_turn(text.clone());
    if !send_message(socket, &ServerMessage::Start).await {
        return false;
    }

    let (tx, mut rx) = mpsc::channel::<String>(32);
    let relay = state.relay.clone();
    let model_slug = session.model_slug().to_string();
    let relay_task =
        tokio::spawn(async move { relay.stream_completion(&text, &model_slug, tx).await });

    // `displayed` mirrors what the browser shows: tokens plus any inline
    // error annotation. The relay's own return value is tokens only.
    let mut displayed = String::new();
    let mut client_alive = true;
    while let Some(fragment) = rx.recv().await {
        displayed.push_str(&fragment);
        if client_alive {
            client_alive = send_message(socket, &ServerMessage::Token { text: fragment }).await;
            if !client_alive {
                // Dropping the receiver ends the relay's sequence early.
                rx.close();
            }
        }
    }

    let spoken = match relay_task.await {
        Ok(accumulated) => accumulated,
        Err(e) if e.is_panic() => {
            error!("Relay task panicked: {:?}", e);
            String::new()
        }
        Err(e) => {
            error!("Relay task failed: {:?}", e);
            String::new()
        }
    };

    session.complete_turn(&displayed);

    if client_alive {
        client_alive = send_message(
            socket,
            &ServerMessage::Done {
                text: displayed.trim().to_string(),
            },
        )
        .await;
    }

    // Best-effort side effect: detached, never awaited, may outlive the
    // connection. Speaks the clean accumulation, not the error annotation.
    if *constants::USE_TTS && session.voice_enabled() {
        speech::speak_text(spoken);
    }

    client_alive
}

/// Build the application router. Public so tests can drive it directly.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        // Static assets (stylesheet, client script) served verbatim.
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
        .layer(TraceLayer::new_for_http()) // Add request logging
}

pub async fn start_web_server(port: u16, relay: Arc<CompletionRelay>) -> Result<()> {
    let state = AppState::new(relay)?;
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
