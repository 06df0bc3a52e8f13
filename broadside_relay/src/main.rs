// CLI entry point for the Broadside reference relay.
//
// Starts a standalone relay that game clients connect to. The relay groups
// connections into rooms by game code and forwards room payloads between
// them; it never interprets game state. See `server.rs` for the networking
// architecture and `rooms.rs` for the directory.
//
// Logging goes through `tracing`; set `RUST_LOG` to override the default
// `info` filter (e.g. `RUST_LOG=broadside_relay=debug`).
//
// Usage:
//   relay [OPTIONS]
//     --bind <ADDR>           Bind address (default: 127.0.0.1)
//     --port <PORT>           Listen port (default: 7878)
//     --max-members <N>       Max members per room (default: 8)

use broadside_relay::server::{RelayConfig, start_relay};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = parse_args();

    let (handle, addr) = match start_relay(config) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "failed to start relay");
            std::process::exit(1);
        }
    };

    info!(%addr, "relay running; stop with Ctrl+C");
    handle.wait();
}

/// Parse command-line arguments into a `RelayConfig`. Uses simple
/// `std::env::args()` matching.
fn parse_args() -> RelayConfig {
    let mut config = RelayConfig::default();
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                i += 1;
                config.bind_addr = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--bind requires an address");
                    std::process::exit(1);
                });
            }
            "--port" => {
                i += 1;
                config.port = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--port requires a valid port number");
                    std::process::exit(1);
                });
            }
            "--max-members" => {
                i += 1;
                config.max_members_per_room = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .filter(|n| *n >= 2)
                    .unwrap_or_else(|| {
                        eprintln!("--max-members requires a number of at least 2");
                        std::process::exit(1);
                    });
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config
}

fn print_usage() {
    println!("Usage: relay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --bind <ADDR>           Bind address (default: 127.0.0.1)");
    println!("  --port <PORT>           Listen port (default: 7878)");
    println!("  --max-members <N>       Max members per room (default: 8)");
    println!("  --help, -h              Show this help");
}
