// ABOUTME: Certificate and private-key loading for the mTLS admission server (C7)
// ABOUTME: Grounded in original_source/inner.go's CA-pool and server-cert loading
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::errors::{KeeperError, KeeperResult};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Load a PEM certificate chain from `path`.
pub fn load_cert_chain(path: &Path) -> KeeperResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| KeeperError::unknown(format!("invalid certificate at {path:?}: {error}")))
}

/// Load a PEM private key from `path`. Accepts PKCS#1, PKCS#8, and SEC1 encodings.
pub fn load_private_key(path: &Path) -> KeeperResult<PrivateKeyDer<'static>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|error| KeeperError::unknown(format!("invalid private key at {path:?}: {error}")))?
        .ok_or_else(|| KeeperError::unknown(format!("no private key found in {path:?}")))
}

/// Build a `rustls::RootCertStore` from a single CA bundle PEM file, as the trust anchor
/// for verifying client certificates on the mTLS listener.
pub fn load_ca_pool(path: &Path) -> KeeperResult<rustls::RootCertStore> {
    let certs = load_cert_chain(path)?;
    let mut store = rustls::RootCertStore::empty();
    for cert in certs {
        store
            .add(cert)
            .map_err(|error| KeeperError::unknown(format!("invalid CA certificate: {error}")))?;
    }
    Ok(store)
}

/// Build the `rustls::ServerConfig` for the mTLS admission server (§4.7): requires and
/// verifies the client certificate against `cert_ca`, and presents `cert_self`/
/// `cert_private` as the fixed server identity. `with_single_cert` installs a resolver
/// that returns the same loaded certificate on every handshake — the "rotating cert
/// source" the specification leaves as a future hook is not exercised today.
pub fn build_mtls_server_config(
    cert_self: &Path,
    cert_private: &Path,
    cert_ca: &Path,
) -> KeeperResult<ServerConfig> {
    let roots = load_ca_pool(cert_ca)?;
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|error| KeeperError::unknown(format!("invalid client CA pool: {error}")))?;

    let certs = load_cert_chain(cert_self)?;
    let key = load_private_key(cert_private)?;

    ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|error| KeeperError::unknown(format!("invalid server certificate: {error}")))
}
