// CLI entry point for the mazenet server.
//
// Usage:
//   mazenet-server [OPTIONS]
//     --config <FILE>      JSON ServerConfig; flags below override it
//     --bind <ADDR>        Listen interface (default: 0.0.0.0)
//     --port <PORT>        Listen port (default: 7777)
//     --tick-rate <HZ>     Simulation ticks per second (default: 20)
//     --width <W>          Map width in cells (default: 32)
//     --height <H>         Map height in cells (default: 24)
//
// Logging follows RUST_LOG (default: info). Type `help` on stdin for the
// console commands.

use std::str::FromStr;

use mazenet::console::run_console;
use mazenet::{MazenetServer, ServerConfig};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = parse_args();

    let server = match MazenetServer::builder().config(config).build().await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Failed to start server: {e}");
            std::process::exit(1);
        }
    };

    println!("mazenet listening on {}", server.local_addr());
    println!("Type 'help' for console commands.");

    let handle = server.handle();
    tokio::spawn(run_console(BufReader::new(tokio::io::stdin()), handle));

    if let Err(e) = server.run().await {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}

/// Parse command-line arguments into a `ServerConfig`. `--config` is read
/// first wherever it appears, so the other flags always win.
fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();

    let mut config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let Some(path) = args.get(i + 1) else {
                eprintln!("--config requires a file path");
                std::process::exit(1);
            };
            ServerConfig::load(path).unwrap_or_else(|e| {
                eprintln!("{e}");
                std::process::exit(1);
            })
        }
        None => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => i += 1,
            "--bind" => {
                i += 1;
                config.bind = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--bind requires an address");
                    std::process::exit(1);
                });
            }
            "--port" => {
                i += 1;
                config.port = value(&args, i, "--port requires a valid port number");
            }
            "--tick-rate" => {
                i += 1;
                config.tick_rate = value(&args, i, "--tick-rate requires a valid number");
            }
            "--width" => {
                i += 1;
                config.width = value(&args, i, "--width requires a valid number");
            }
            "--height" => {
                i += 1;
                config.height = value(&args, i, "--height requires a valid number");
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

fn value<T: FromStr>(args: &[String], i: usize, error: &str) -> T {
    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{error}");
        std::process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: mazenet-server [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <FILE>     JSON config file; other flags override it");
    println!("  --bind <ADDR>       Listen interface (default: 0.0.0.0)");
    println!("  --port <PORT>       Listen port (default: 7777)");
    println!("  --tick-rate <HZ>    Simulation ticks per second (default: 20)");
    println!("  --width <W>         Map width in cells (default: 32)");
    println!("  --height <H>        Map height in cells (default: 24)");
    println!("  --help, -h          Show this help");
}
