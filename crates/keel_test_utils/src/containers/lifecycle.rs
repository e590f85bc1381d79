//! Container lifecycle: start, stop and readiness checks via docker compose.

use crate::config::{PgServer, ServerAccess};
use anyhow::{bail, Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

const CONTAINER_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(500);

pub fn docker_compose_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("docker")
        .join("docker-compose.yml")
}

fn succeeds(cmd: &mut Command) -> bool {
    cmd.output().map(|o| o.status.success()).unwrap_or(false)
}

pub fn is_docker_available() -> bool {
    succeeds(Command::new("docker").arg("info"))
}

/// Run `docker compose` (v2), falling back to `docker-compose` (v1).
fn compose(args: &[&str]) -> Result<Output> {
    let file = docker_compose_path();

    if let Ok(out) = Command::new("docker")
        .args(["compose", "-f"])
        .arg(&file)
        .args(args)
        .output()
    {
        if out.status.success() {
            return Ok(out);
        }
    }

    Command::new("docker-compose")
        .arg("-f")
        .arg(&file)
        .args(args)
        .output()
        .context("Failed to run docker-compose")
}

fn compose_checked(args: &[&str], what: &str) -> Result<()> {
    let output = compose(args)?;
    if !output.status.success() {
        bail!("{} failed: {}", what, String::from_utf8_lossy(&output.stderr));
    }
    Ok(())
}

pub fn is_container_running(server: PgServer) -> bool {
    compose(&["ps", "-q", server.compose_service()])
        .map(|out| !out.stdout.is_empty())
        .unwrap_or(false)
}

pub fn start_container(server: PgServer) -> Result<()> {
    info!("Starting container: {}", server.compose_service());
    compose_checked(
        &["up", "-d", server.compose_service()],
        &format!("Starting {}", server.compose_service()),
    )
}

pub fn stop_container(server: PgServer) -> Result<()> {
    info!("Stopping container: {}", server.compose_service());
    compose_checked(
        &["stop", server.compose_service()],
        &format!("Stopping {}", server.compose_service()),
    )
}

pub fn stop_all_containers() -> Result<()> {
    info!("Stopping all test containers");
    compose_checked(&["down", "-v"], "Stopping containers")
}

async fn postgres_ready(server: PgServer) -> bool {
    let url = ServerAccess::new(server).admin_url();
    let connect = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(1))
        .connect(&url);

    match timeout(Duration::from_secs(2), connect).await {
        Ok(Ok(pool)) => {
            let ready = sqlx::query("SELECT 1").execute(&pool).await.is_ok();
            pool.close().await;
            ready
        }
        _ => false,
    }
}

/// Poll until the server accepts queries or the startup timeout passes.
pub async fn wait_for_healthy(server: PgServer) -> Result<()> {
    let service = server.compose_service();
    info!("Waiting for {} to be healthy on port {}", service, server.host_port());

    let start = Instant::now();
    loop {
        let port_open = TcpStream::connect(("localhost", server.host_port())).await.is_ok();
        if port_open && postgres_ready(server).await {
            debug!("{} is healthy after {:?}", service, start.elapsed());
            return Ok(());
        }

        if start.elapsed() > CONTAINER_STARTUP_TIMEOUT {
            bail!(
                "Timeout waiting for {} to be healthy after {:?}",
                service,
                CONTAINER_STARTUP_TIMEOUT
            );
        }
        sleep(HEALTH_CHECK_INTERVAL).await;
    }
}

/// Start the service if needed and wait until it is healthy.
pub async fn ensure_container_running(server: PgServer) -> Result<()> {
    if !is_docker_available() {
        bail!("Docker is not available. Please install Docker to run these tests.");
    }

    if !is_container_running(server) {
        start_container(server)?;
    }

    wait_for_healthy(server).await
}
