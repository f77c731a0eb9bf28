use std::io::{self, BufRead, Write};

use clap::Parser;

use olmstedd::config::{Cli, Command, StagingConfig};
use olmstedd::{http, ipc, logging};

fn run_ipc() {
    let mut state = ipc::AppState::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id; ignore.
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();

    match cli.command {
        None | Some(Command::Ipc) => {
            run_ipc();
            Ok(())
        }
        Some(Command::Serve(args)) => {
            let config = StagingConfig::from(&args);
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(http::serve(args.bind, config))
        }
    }
}
