//! Unix socket server for admin commands.
//!
//! One JSON command per line in, one JSON response per line out. Used by the
//! canopy-admin CLI and by bots driving the progression engine locally.

use crate::error::Result;
use canopy_progression::ProgressionService;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

fn first_level() -> u32 {
    1
}

/// Admin command sent over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Ping (health check)
    Ping,
    /// Overall progression status
    Status,
    /// Every node with its unlock level
    Tree,
    /// Nodes that can be targeted now
    Available,
    /// Cast a vote for a 1-based option
    Vote {
        platform: String,
        platform_id: String,
        username: String,
        option: usize,
    },
    /// Add raw contribution points
    Contribute { amount: u64 },
    /// Record an engagement event
    Engagement {
        user_id: String,
        metric_type: String,
        value: u64,
    },
    /// Start a vote, or resume a frozen one
    StartVoting,
    /// Force-end the open vote
    EndVoting,
    /// Freeze the open vote
    FreezeVoting,
    /// Unlock a node
    Unlock {
        key: String,
        #[serde(default = "first_level")]
        level: u32,
    },
    /// Unlock every node at max level
    UnlockAll,
    /// Remove an unlock
    Relock {
        key: String,
        #[serde(default = "first_level")]
        level: u32,
    },
    /// Unlock the leading vote option now
    InstantUnlock,
    /// Wipe progression state
    Reset {
        reset_by: String,
        reason: String,
        #[serde(default)]
        preserve_user_data: bool,
    },
}

/// Response from admin command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminResponse {
    Ok { message: String },
    Error { error: String },
    Data { data: serde_json::Value },
    Pong,
}

impl AdminResponse {
    fn ok(message: impl Into<String>) -> Self {
        AdminResponse::Ok {
            message: message.into(),
        }
    }

    fn error(error: impl ToString) -> Self {
        AdminResponse::Error {
            error: error.to_string(),
        }
    }
}

/// Serialize a successful result as `data`, or report the error.
fn respond<T: Serialize>(result: canopy_progression::Result<T>) -> AdminResponse {
    match result.map(|value| serde_json::to_value(value)) {
        Ok(Ok(data)) => AdminResponse::Data { data },
        Ok(Err(e)) => AdminResponse::error(e),
        Err(e) => AdminResponse::error(e),
    }
}

/// Admin socket server.
pub struct AdminSocket {
    service: ProgressionService,
    socket_path: PathBuf,
}

impl AdminSocket {
    pub fn new(service: ProgressionService, socket_path: &Path) -> Self {
        Self {
            service,
            socket_path: socket_path.to_path_buf(),
        }
    }

    /// Run the admin socket server.
    pub async fn run(&self) -> Result<()> {
        // Stale socket from a previous run
        let _ = std::fs::remove_file(&self.socket_path);
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!(path = %self.socket_path.display(), "Admin socket listening");

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let service = self.service.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, service).await {
                            tracing::error!(error = %e, "Admin connection error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept admin connection");
                }
            }
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

async fn handle_connection(stream: UnixStream, service: ProgressionService) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<AdminCommand>(&line) {
            Ok(cmd) => execute_command(cmd, &service).await,
            Err(e) => AdminResponse::error(format!("Invalid command: {}", e)),
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;
        line.clear();
    }

    Ok(())
}

/// Run one command against the engine.
pub async fn execute_command(cmd: AdminCommand, service: &ProgressionService) -> AdminResponse {
    match cmd {
        AdminCommand::Ping => AdminResponse::Pong,

        AdminCommand::Status => respond(service.get_progression_status().await),

        AdminCommand::Tree => respond(service.get_progression_tree().await),

        AdminCommand::Available => respond(service.get_available_unlocks().await),

        AdminCommand::Vote {
            platform,
            platform_id,
            username,
            option,
        } => match service
            .vote_for_unlock(&platform, &platform_id, &username, option)
            .await
        {
            Ok(()) => AdminResponse::ok(format!("Vote recorded for option {}", option)),
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::Contribute { amount } => match service.add_contribution(amount).await {
            Ok(()) => AdminResponse::ok(format!("Contributed {} points", amount)),
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::Engagement {
            user_id,
            metric_type,
            value,
        } => respond(service.record_engagement(&user_id, &metric_type, value).await),

        AdminCommand::StartVoting => match service.admin_start_voting().await {
            Ok(()) => AdminResponse::ok("Voting started"),
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::EndVoting => respond(service.admin_end_voting().await),

        AdminCommand::FreezeVoting => match service.admin_freeze_voting().await {
            Ok(()) => AdminResponse::ok("Voting frozen"),
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::Unlock { key, level } => {
            tracing::info!(node_key = %key, level, "Admin unlock requested");
            respond(service.admin_unlock(&key, level).await)
        }

        AdminCommand::UnlockAll => match service.admin_unlock_all().await {
            Ok(count) => AdminResponse::ok(format!("Unlocked {} nodes", count)),
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::Relock { key, level } => match service.admin_relock(&key, level).await {
            Ok(true) => AdminResponse::ok(format!("Relocked {} level {}", key, level)),
            Ok(false) => AdminResponse::ok(format!("{} level {} was not unlocked", key, level)),
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::InstantUnlock => respond(service.force_instant_unlock().await),

        AdminCommand::Reset {
            reset_by,
            reason,
            preserve_user_data,
        } => respond(
            service
                .reset_progression_tree(&reset_by, &reason, preserve_user_data)
                .await,
        ),
    }
}

/// Socket path from `CANOPY_ADMIN_SOCKET`, else `admin.sock` in the data dir.
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var("CANOPY_ADMIN_SOCKET") {
        return PathBuf::from(path);
    }
    let data_dir = std::env::var("CANOPY_DATA_DIR").unwrap_or_else(|_| "./canopy-data".to_string());
    PathBuf::from(data_dir).join("admin.sock")
}
