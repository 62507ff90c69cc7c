//! modelpipe server binary
//!
//! Serves the built-in identity adapter, which echoes its input tensors
//! back in name order. Useful for smoke testing both transports and the
//! row cache without a real model runtime.

use clap::Parser;
use modelpipe::{AppContext, Applier, Config, IoMetadata, Metadata, ServeOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "modelpipe")]
#[command(version, about = "Serve the built-in identity model")]
struct Cli {
    /// host:port to listen on
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable the row-result cache
    #[arg(long)]
    cache: bool,

    /// Cache database path (implies --cache)
    #[arg(long)]
    cache_file: Option<PathBuf>,

    /// Unix socket to serve the shared-memory transport on
    #[arg(long)]
    shm_socket: Option<PathBuf>,

    /// Configuration file (TOML); environment variables apply otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn identity_options(config: &Config) -> ServeOptions {
    let apply: Applier = Arc::new(|_ctx, _config, mut inputs, _output_names| {
        let mut names: Vec<String> = inputs.keys().cloned().collect();
        names.sort();
        Ok(names.iter().filter_map(|name| inputs.remove(name)).collect())
    });

    let get_handler: modelpipe::GetHandler = Arc::new(|app: &AppContext| {
        let body = serde_json::to_string_pretty(&app.meta)?;
        Ok(actix_web::HttpResponse::Ok()
            .content_type("application/json")
            .body(body))
    });

    ServeOptions {
        listen: config.listen_addr(),
        cache_file: config.cache.enabled.then(|| config.cache.file.clone()),
        shm_socket: config.shm.enabled.then(|| config.shm.socket.clone()),
        meta: Metadata {
            name: "identity".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            server: format!("modelpipe/{}", env!("CARGO_PKG_VERSION")),
            description: "Echoes every input tensor back, in input-name order.".to_owned(),
            inputs: vec![IoMetadata {
                name: "input0".to_owned(),
                description: "echoed verbatim".to_owned(),
                shape: vec![-1],
                dtype: 0,
            }],
            outputs: vec![IoMetadata {
                name: "output0".to_owned(),
                description: "the echo".to_owned(),
                shape: vec![-1],
                dtype: 0,
            }],
        },
        default_inputs: vec!["input0".to_owned()],
        default_outputs: vec!["output0".to_owned()],
        apply,
        rest_apply: None,
        get_handler: Some(get_handler),
    }
}

#[actix_web::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    };
    let mut config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(listen) = &cli.listen {
        match listen.rsplit_once(':').and_then(|(host, port)| {
            port.parse().ok().map(|port| (host.to_owned(), port))
        }) {
            Some((host, port)) => {
                config.server.host = host;
                config.server.port = port;
            }
            None => {
                eprintln!("--listen expects host:port, got '{listen}'");
                return ExitCode::FAILURE;
            }
        }
    }
    if cli.cache || cli.cache_file.is_some() {
        config.cache.enabled = true;
    }
    if let Some(file) = cli.cache_file {
        config.cache.file = file;
    }
    if let Some(socket) = cli.shm_socket {
        config.shm.enabled = true;
        config.shm.socket = socket;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let opts = identity_options(&config);
    if let Err(e) = modelpipe::serve_raw(opts).await {
        error!("failed to serve: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
