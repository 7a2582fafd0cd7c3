//! Certificate assembly for per-host transports.
//!
//! The root pool starts from the OS trust store (reqwest's built-in
//! roots remain enabled) and is extended with client-wide PEM blocks,
//! host-specific certificate directories, and the host's inline
//! certificate. Client certificate pairs become a rustls identity.

use std::fs;
use std::path::PathBuf;

use reqwest::{Certificate, Identity};

use crate::types::{ErrorKind, Result};

/// Collects the additional root certificates for `hostname`.
///
/// `ca_pems` are client-wide PEM blocks; each `dirs` entry is checked for
/// a `<dir>/<hostname>` directory whose regular `*.crt` files are loaded.
/// A missing directory is skipped, any other read error is fatal, and so
/// is every parse failure.
pub(crate) fn make_root_certs(
    ca_pems: &[Vec<u8>],
    dirs: &[PathBuf],
    hostname: &str,
    host_cert: &str,
) -> Result<Vec<Certificate>> {
    let mut certs = Vec::new();

    for pem in ca_pems {
        certs.push(
            Certificate::from_pem(pem).map_err(|e| ErrorKind::InvalidCertificate(e.to_string()))?,
        );
    }

    for dir in dirs {
        let host_dir = dir.join(hostname);
        let entries = match fs::read_dir(&host_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(ErrorKind::ReadCertDir(e, host_dir)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| ErrorKind::ReadCertDir(e, host_dir.clone()))?;
            let path = entry.path();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file || path.extension().and_then(|ext| ext.to_str()) != Some("crt") {
                continue;
            }
            let pem = fs::read(&path).map_err(|e| ErrorKind::ReadCertDir(e, path.clone()))?;
            certs.push(Certificate::from_pem(&pem).map_err(|e| {
                ErrorKind::InvalidCertificate(format!("{}: {e}", path.display()))
            })?);
        }
    }

    if !host_cert.is_empty() {
        certs.push(Certificate::from_pem(host_cert.as_bytes()).map_err(|e| {
            ErrorKind::InvalidHostCertificate {
                hostname: hostname.to_string(),
                reason: e.to_string(),
            }
        })?);
    }

    Ok(certs)
}

/// Builds the client identity from a certificate and key PEM pair.
pub(crate) fn client_identity(cert: &str, key: &str) -> Result<Identity> {
    let mut pem = Vec::with_capacity(cert.len() + key.len() + 1);
    pem.extend_from_slice(cert.as_bytes());
    pem.push(b'\n');
    pem.extend_from_slice(key.as_bytes());
    Identity::from_pem(&pem).map_err(|e| ErrorKind::InvalidCertificate(e.to_string()))
}
