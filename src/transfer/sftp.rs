//! SFTP transport
//!
//! Backed by libssh2 through the `ssh2` crate. libssh2 is blocking, so every
//! call is moved onto tokio's blocking pool; the handle is shared with those
//! calls through an `Arc<Mutex<_>>`. The handle is empty until `connect`
//! succeeds and again after `close`.

use super::{Connection, Transport};
use crate::{
    config::{Credential, SftpConfig},
    error::TransferError,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use bytes::Bytes;
use parking_lot::Mutex;
use ssh2::{ErrorCode, HashType, Sftp};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Transport that opens one SSH session with an SFTP channel per connection
#[derive(Debug, Clone, Copy, Default)]
pub struct SftpTransport;

impl Transport for SftpTransport {
    fn connection(&self) -> Box<dyn Connection> {
        Box::new(SftpConnection::default())
    }
}

/// libssh2 status for a path that does not exist
const SFTP_NO_SUCH_FILE: i32 = 2;

struct SftpHandle {
    sftp: Sftp,
    session: ssh2::Session,
}

#[derive(Default)]
struct SftpConnection {
    handle: Arc<Mutex<Option<SftpHandle>>>,
}

impl SftpConnection {
    async fn blocking<T, F>(&self, op: F) -> Result<T, TransferError>
    where
        F: FnOnce(&SftpHandle) -> Result<T, TransferError> + Send + 'static,
        T: Send + 'static,
    {
        let handle = Arc::clone(&self.handle);
        tokio::task::spawn_blocking(move || {
            let handle = handle.lock();
            match handle.as_ref() {
                Some(handle) => op(handle),
                None => Err(TransferError::SessionClosed),
            }
        })
        .await?
    }
}

#[async_trait]
impl Connection for SftpConnection {
    async fn connect(&mut self, endpoint: &SftpConfig) -> Result<(), TransferError> {
        let endpoint = endpoint.clone();
        let handle = tokio::task::spawn_blocking(move || establish(&endpoint)).await??;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    async fn write_file(&mut self, path: &str, contents: Bytes) -> Result<(), TransferError> {
        let path = path.to_string();
        self.blocking(move |h| {
            let mut file = h
                .sftp
                .create(Path::new(&path))
                .map_err(|e| TransferError::remote(&path, e))?;
            file.write_all(&contents)
                .map_err(|e| TransferError::remote(&path, e))?;
            Ok(())
        })
        .await
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), TransferError> {
        let (from, to) = (from.to_string(), to.to_string());
        self.blocking(move |h| {
            h.sftp
                .rename(Path::new(&from), Path::new(&to), None)
                .map_err(|e| TransferError::remote(&to, e))
        })
        .await
    }

    async fn remove(&mut self, path: &str) -> Result<(), TransferError> {
        let path = path.to_string();
        self.blocking(move |h| {
            h.sftp
                .unlink(Path::new(&path))
                .map_err(|e| TransferError::remote(&path, e))
        })
        .await
    }

    async fn exists(&mut self, path: &str) -> Result<bool, TransferError> {
        let path = path.to_string();
        self.blocking(move |h| match h.sftp.stat(Path::new(&path)) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => Ok(false),
            Err(e) => Err(TransferError::remote(&path, e)),
        })
        .await
    }

    async fn close(self: Box<Self>) -> Result<(), TransferError> {
        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || {
            handle
                .session
                .disconnect(None, "batch complete", None)
                .map_err(|e| TransferError::Io(io::Error::from(e)))
        })
        .await?
    }
}

fn establish(endpoint: &SftpConfig) -> Result<SftpHandle, TransferError> {
    let unreachable = |message: String| TransferError::Unreachable {
        endpoint: endpoint.endpoint(),
        message,
    };

    let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| unreachable(e.to_string()))?
        .collect();
    let tcp = connect_tcp(&addrs, endpoint.connect_timeout()).map_err(|e| unreachable(e.to_string()))?;

    let mut session = ssh2::Session::new().map_err(|e| TransferError::Handshake(e.to_string()))?;
    session.set_tcp_stream(tcp);
    if let Some(timeout) = endpoint.transfer_timeout().or(endpoint.connect_timeout()) {
        session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    }
    session
        .handshake()
        .map_err(|e| TransferError::Handshake(e.to_string()))?;

    verify_host_key(&session, endpoint.host_key_sha256.as_deref())?;
    authenticate(&session, endpoint)?;

    let sftp = session
        .sftp()
        .map_err(|e| TransferError::Handshake(format!("sftp subsystem unavailable: {}", e)))?;
    debug!(endpoint = %endpoint.endpoint(), "SFTP channel ready");

    Ok(SftpHandle { sftp, session })
}

fn connect_tcp(addrs: &[SocketAddr], timeout: Option<Duration>) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in addrs {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no addresses")
    }))
}

/// OpenSSH-style fingerprint of the server key, e.g. `SHA256:nThbg6kX...`
fn fingerprint(hash: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(hash))
}

fn verify_host_key(session: &ssh2::Session, expected: Option<&str>) -> Result<(), TransferError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let expected = if expected.starts_with("SHA256:") {
        expected.to_string()
    } else {
        format!("SHA256:{}", expected)
    };

    let actual = session
        .host_key_hash(HashType::Sha256)
        .map(fingerprint)
        .ok_or_else(|| TransferError::Handshake("server did not present a host key".to_string()))?;

    if actual != expected {
        return Err(TransferError::HostKeyMismatch { expected, actual });
    }
    Ok(())
}

fn authenticate(session: &ssh2::Session, endpoint: &SftpConfig) -> Result<(), TransferError> {
    let denied = || TransferError::Authentication(endpoint.username.clone());

    let credential = endpoint.credential().map_err(|_| denied())?;
    let attempt = match &credential {
        Credential::Password(password) => {
            session.userauth_password(&endpoint.username, password.expose())
        }
        Credential::PrivateKey { path, passphrase } => session.userauth_pubkey_file(
            &endpoint.username,
            None,
            path,
            passphrase.as_ref().map(|p| p.expose()),
        ),
    };

    if let Err(e) = attempt {
        debug!(username = %endpoint.username, "Authentication rejected: {}", e);
        return Err(denied());
    }
    if !session.authenticated() {
        return Err(denied());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_matches_openssh_format() {
        // sha256 of the empty string
        let hash = [
            0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f,
            0xb9, 0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b,
            0x78, 0x52, 0xb8, 0x55,
        ];
        assert_eq!(
            fingerprint(&hash),
            "SHA256:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU"
        );
    }

    #[test]
    fn connect_tcp_without_addresses_fails() {
        let err = connect_tcp(&[], None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrNotAvailable);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connection_error() {
        let endpoint = SftpConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: "relay".to_string(),
            password: Some(crate::config::Secret::new("pw")),
            connect_timeout_ms: Some(500),
            ..SftpConfig::default()
        };
        let mut connection = SftpTransport.connection();
        let result = connection.connect(&endpoint).await;
        assert!(matches!(result, Err(TransferError::Unreachable { .. })));

        // teardown of a connection that never came up is a no-op
        assert!(connection.close().await.is_ok());
    }

    #[tokio::test]
    async fn operations_before_connect_report_closed_session() {
        let mut connection = SftpTransport.connection();
        let result = connection.write_file("/upload/a.txt", Bytes::from_static(b"a")).await;
        assert!(matches!(result, Err(TransferError::SessionClosed)));
    }
}
