use std::process;
use std::sync::Arc;

use toolbridge::{Correlator, ToolBridge, ToolService, WorkerSupervisor};
use toolbridge_server::{Overrides, ServerSettings, init_tracing};

fn usage() {
    eprintln!("Usage: toolbridge-server [--host <addr>] [--port <port>] [--worker <program> [args...]]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --host <addr>         Bind address [default: $TOOLBRIDGE_HOST or 0.0.0.0]");
    eprintln!("  --port <port>         Bind port [default: $TOOLBRIDGE_PORT or 5000]");
    eprintln!("  --worker <program>    Worker command; every remaining argument is passed to it");
    eprintln!("                        [default: python3 mcp-server/server.py]");
}

fn parse_args(args: &[String]) -> Result<Overrides, String> {
    let mut overrides = Overrides::default();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                i += 1;
                overrides.host = Some(args.get(i).ok_or("--host requires a value")?.clone());
            }
            "--port" => {
                i += 1;
                let port = args.get(i).ok_or("--port requires a value")?;
                overrides.port = Some(
                    port.parse()
                        .map_err(|_| format!("invalid port: {port}"))?,
                );
            }
            "--worker" => {
                let command = args[i + 1..].to_vec();
                if command.is_empty() {
                    return Err("--worker requires a program".to_string());
                }
                overrides.worker = Some(command);
                break;
            }
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(overrides)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let overrides = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            usage();
            process::exit(2);
        }
    };

    init_tracing();

    let settings = ServerSettings::from_env()?.with_overrides(overrides);
    tracing::info!(
        program = %settings.worker_program,
        args = ?settings.worker_args,
        "Starting toolbridge"
    );

    let correlator = Arc::new(Correlator::new(settings.max_pending));
    let supervisor = WorkerSupervisor::new(settings.supervisor_config(), correlator);

    // The server still comes up so /health-check can report the failure.
    if let Err(e) = supervisor.start().await {
        tracing::error!(error = %e, "Worker failed to start");
    }

    let bridge = Arc::new(ToolBridge::new(supervisor, settings.bridge_config()));
    tracing::info!(timeout_ms = bridge.timeout().as_millis() as u64, "Tool bridge ready");
    let service = Arc::new(ToolService::from_bridge(bridge));

    toolbridge::transport::serve(settings.server_config(), service).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("toolbridge-server")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn no_flags_means_no_overrides() {
        assert_eq!(parse_args(&args(&[])).unwrap(), Overrides::default());
    }

    #[test]
    fn host_and_port() {
        let o = parse_args(&args(&["--host", "127.0.0.1", "--port", "8080"])).unwrap();
        assert_eq!(o.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(o.port, Some(8080));
    }

    #[test]
    fn worker_consumes_the_rest() {
        let o = parse_args(&args(&["--port", "1", "--worker", "python3", "server.py", "--port", "9"]))
            .unwrap();
        assert_eq!(o.port, Some(1));
        assert_eq!(
            o.worker,
            Some(vec![
                "python3".to_string(),
                "server.py".to_string(),
                "--port".to_string(),
                "9".to_string()
            ])
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            parse_args(&args(&["--port"])).unwrap_err(),
            "--port requires a value"
        );
        assert_eq!(
            parse_args(&args(&["--port", "http"])).unwrap_err(),
            "invalid port: http"
        );
        assert_eq!(
            parse_args(&args(&["--worker"])).unwrap_err(),
            "--worker requires a program"
        );
        assert_eq!(
            parse_args(&args(&["serve"])).unwrap_err(),
            "unexpected argument: serve"
        );
        assert_eq!(parse_args(&args(&["-h"])).unwrap_err(), "");
    }
}
