//! canopy-admin CLI tool
//!
//! Drives a running canopy-node over its admin socket.
//!
//! Usage:
//!   canopy-admin status
//!   canopy-admin vote <platform> <platform_id> <username> <option>
//!   canopy-admin unlock <key> [level]
//!   canopy-admin reset <reset_by> <reason> [--preserve]
//!   canopy-admin ping

use canopy_node::admin_socket::default_socket_path;
use canopy_node::{AdminCommand, AdminResponse};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;

fn print_usage() {
    eprintln!("canopy-admin - Manage a Canopy progression node");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  canopy-admin status                       Show progression status");
    eprintln!("  canopy-admin tree                         Show every node and its level");
    eprintln!("  canopy-admin available                    List nodes that can be targeted");
    eprintln!("  canopy-admin vote <platform> <id> <user> <option>");
    eprintln!("                                            Cast a vote (option is 1-based)");
    eprintln!("  canopy-admin contribute <amount>          Add contribution points");
    eprintln!("  canopy-admin engagement <user> <metric> <value>");
    eprintln!("                                            Record an engagement event");
    eprintln!("  canopy-admin start-voting                 Start or resume voting");
    eprintln!("  canopy-admin end-voting                   End the open vote");
    eprintln!("  canopy-admin freeze-voting                Freeze the open vote");
    eprintln!("  canopy-admin unlock <key> [level]         Unlock a node");
    eprintln!("  canopy-admin unlock-all                   Unlock every node");
    eprintln!("  canopy-admin relock <key> [level]         Remove an unlock");
    eprintln!("  canopy-admin instant-unlock               Unlock the leading vote option now");
    eprintln!("  canopy-admin reset <by> <reason> [--preserve]");
    eprintln!("                                            Reset the whole tree");
    eprintln!("  canopy-admin ping                         Check if daemon is running");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  CANOPY_ADMIN_SOCKET  Path to admin socket (default: ./canopy-data/admin.sock)");
}

fn send_command(cmd: &AdminCommand) -> Result<AdminResponse, String> {
    let socket_path = default_socket_path();

    let mut stream = UnixStream::connect(&socket_path).map_err(|e| {
        format!(
            "Failed to connect to canopy-node at {:?}: {}\n\
             Is the canopy-node running?",
            socket_path, e
        )
    })?;

    let cmd_json = serde_json::to_string(cmd).map_err(|e| e.to_string())?;
    writeln!(stream, "{}", cmd_json).map_err(|e| e.to_string())?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .map_err(|e| e.to_string())?;

    serde_json::from_str(&response_line).map_err(|e| format!("Invalid response: {}", e))
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

/// Positional argument `index`, or exit naming what `command` needs.
fn arg<'a>(args: &'a [String], index: usize, command: &str, name: &str) -> &'a str {
    match args.get(index) {
        Some(value) => value,
        None => fail(&format!("{} requires a {} argument", command, name)),
    }
}

fn number<T: std::str::FromStr>(raw: &str, name: &str) -> T {
    raw.parse()
        .unwrap_or_else(|_| fail(&format!("{} must be a number, got {:?}", name, raw)))
}

fn level(args: &[String], index: usize) -> u32 {
    args.get(index).map(|raw| number(raw, "level")).unwrap_or(1)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let cmd = match args[1].as_str() {
        "status" => AdminCommand::Status,
        "tree" => AdminCommand::Tree,
        "available" => AdminCommand::Available,
        "vote" => AdminCommand::Vote {
            platform: arg(&args, 2, "vote", "platform").to_string(),
            platform_id: arg(&args, 3, "vote", "platform_id").to_string(),
            username: arg(&args, 4, "vote", "username").to_string(),
            option: number(arg(&args, 5, "vote", "option"), "option"),
        },
        "contribute" => AdminCommand::Contribute {
            amount: number(arg(&args, 2, "contribute", "amount"), "amount"),
        },
        "engagement" => AdminCommand::Engagement {
            user_id: arg(&args, 2, "engagement", "user_id").to_string(),
            metric_type: arg(&args, 3, "engagement", "metric_type").to_string(),
            value: number(arg(&args, 4, "engagement", "value"), "value"),
        },
        "start-voting" => AdminCommand::StartVoting,
        "end-voting" => AdminCommand::EndVoting,
        "freeze-voting" => AdminCommand::FreezeVoting,
        "unlock" => AdminCommand::Unlock {
            key: arg(&args, 2, "unlock", "key").to_string(),
            level: level(&args, 3),
        },
        "unlock-all" => AdminCommand::UnlockAll,
        "relock" => AdminCommand::Relock {
            key: arg(&args, 2, "relock", "key").to_string(),
            level: level(&args, 3),
        },
        "instant-unlock" => AdminCommand::InstantUnlock,
        "reset" => AdminCommand::Reset {
            reset_by: arg(&args, 2, "reset", "reset_by").to_string(),
            reason: arg(&args, 3, "reset", "reason").to_string(),
            preserve_user_data: args.iter().skip(4).any(|a| a == "--preserve"),
        },
        "ping" => AdminCommand::Ping,
        "-h" | "--help" | "help" => {
            print_usage();
            std::process::exit(0);
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    };

    match send_command(&cmd) {
        Ok(response) => match response {
            AdminResponse::Ok { message } => {
                println!("{}", message);
            }
            AdminResponse::Error { error } => fail(&error),
            AdminResponse::Data { data } => match serde_json::to_string_pretty(&data) {
                Ok(pretty) => println!("{}", pretty),
                Err(_) => println!("{}", data),
            },
            AdminResponse::Pong => {
                println!("pong - canopy-node is running");
            }
        },
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
