use clap::Parser;
use prophet_dap::cli::Cli;
use prophet_dap::session;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn load_env_files(dir: &Path) {
    // .env.local wins over .env; neither overrides already-set process vars.
    for name in [".env", ".env.local"] {
        let p = dir.join(name);
        if p.exists() {
            if let Err(e) = dotenvy::from_filename(&p) {
                eprintln!("Warning: failed to load {}: {}", p.display(), e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // stdout belongs to the DAP transport; everything diagnostic goes to
    // stderr.
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level.clone()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| "prophet_dap=info".into()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    load_env_files(Path::new("."));

    match cli.port {
        Some(port) => {
            let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
            eprintln!("[DAP] Listening on 127.0.0.1:{}", port);

            let (stream, addr) = listener.accept().await?;
            eprintln!("[DAP] Editor connected from {}", addr);

            let (reader, writer) = stream.into_split();
            session::run(reader, writer).await?;
        }
        None => {
            session::run(tokio::io::stdin(), tokio::io::stdout()).await?;
        }
    }

    eprintln!("[DAP] Session ended");
    Ok(())
}
