// ────────────────────────────────
// src/server/listener.rs
// Encapsulates low‑level TCP bind so the accept loop stays transport agnostic.
// ────────────────────────────────
use anyhow::{Context, Result};
use tokio::net::{lookup_host, TcpListener};

/// Binds the first address `host:port` resolves to.
pub async fn bind_tcp(addr: &str) -> Result<TcpListener> {
    let resolved = lookup_host(addr)
        .await
        .with_context(|| format!("Failed to resolve listen address {addr}"))?
        .next()
        .with_context(|| format!("Listen address {addr} resolved to nothing"))?;

    let listener = TcpListener::bind(resolved)
        .await
        .with_context(|| format!("Failed to bind {resolved}"))?;
    Ok(listener)
}
