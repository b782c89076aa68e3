/*
 * Responsibility
 * - tokio runtime entry point
 * - calls app::run() (no logic here)
 */
mod api;
mod app;
mod config;
mod error;
mod middleware;
mod repos;
mod services;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::run().await
}
