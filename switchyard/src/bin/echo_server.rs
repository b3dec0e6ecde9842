//! Echo service exposed both over HTTP and over the RPC transport.
//!
//! Usage: `echo-server [config.json]`
//!
//! The HTTP side answers `GET /v1/echo` (and its alias `/echo`) with a
//! greeting and echoes `POST` bodies back inside the envelope. The RPC side
//! echoes every byte it receives on each accepted channel.

use std::process;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use switchyard::api::{AccessLevel, ApiBuilder, ApiServer, Method, Reply, RequestContext};
use switchyard::config::Config;
use switchyard::rpc::{
    BoxListener, Channel, ConnectionManager, HookError, HookResult, Implementer, Server, Service,
};

struct EchoService;

#[async_trait]
impl Service for EchoService {
    async fn serve_connection(&self, channel: Channel) -> HookResult {
        let mut buf = vec![0u8; 4096];
        loop {
            let mut stream = channel.lock().await?;
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            stream.write_all(&buf[..n]).await?;
        }
    }
}

struct EchoImplementer;

#[async_trait]
impl Implementer for EchoImplementer {
    fn version(&self) -> String {
        "v1".to_string()
    }

    async fn listen(&self, _protocol: &str) -> Result<Option<BoxListener>, HookError> {
        Ok(None)
    }

    fn bind_server(&self, server: &mut Server) -> HookResult {
        server.register(EchoService);
        Ok(())
    }
}

fn build_api(config: &Config) -> Result<ApiBuilder, switchyard::api::BuildError> {
    let mut api = ApiBuilder::from_config(&config.api);
    api.version("v1")
        .endpoint("echo")?
        .handle(Method::Get, |_req: RequestContext| async {
            Reply::ok("hello")
        })
        .handle(Method::Post, |req: RequestContext| async move {
            Reply::ok(req.body_text())
        })
        .mount("/echo")?
        .endpoint("status")?
        .handle(Method::Get, |_req: RequestContext| async {
            Reply::ok(r#"{"status": "up"}"#)
        })
        .access(AccessLevel::Private);
    Ok(api)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => match Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{path}: {e}");
                process::exit(1);
            }
        },
        None => Config::default(),
    };

    let api = match build_api(&config) {
        Ok(api) => api,
        Err(e) => {
            eprintln!("invalid API: {e}");
            process::exit(1);
        }
    };
    let http = ApiServer::with_config(Arc::new(api.build()), &config.api);
    let manager = Arc::new(ConnectionManager::from_config(&config.rpc));
    let shutdown = CancellationToken::new();

    let rpc = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.serve(Arc::new(EchoImplementer)).await })
    };
    let api = {
        let shutdown = shutdown.clone();
        let address = config.api.listen_address.clone();
        tokio::spawn(async move { http.run(&address, shutdown).await })
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutting down");
    shutdown.cancel();
    manager.shutdown();

    let mut failed = false;
    match rpc.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, "rpc server failed");
            failed = true;
        }
        Err(e) => {
            error!(error = %e, "rpc task panicked");
            failed = true;
        }
    }
    match api.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, "api server failed");
            failed = true;
        }
        Err(e) => {
            error!(error = %e, "api task panicked");
            failed = true;
        }
    }
    if failed {
        process::exit(1);
    }
}
