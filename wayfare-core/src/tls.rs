//! TLS material loading (spec §6: "Accepts a PEM path containing a
//! certificate chain and private key. The core does not implement TLS
//! itself.").
//!
//! This module only turns raw PEM bytes into a parsed `rustls::ServerConfig`
//! or `native_tls::Identity`; actually terminating a TLS connection with
//! that material is a transport concern handled in `wayfare-services::tls`.

use std::io::Cursor;

/// Parsed, ready-to-use TLS material for one listener.
#[derive(Clone)]
pub enum TlsConfig<A = ::rustls::ServerConfig, B = ::native_tls::Identity> {
    Rustls(A),
    Native(B),
    None,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TlsStack {
    Rustls,
    NativeTls,
}

impl Default for TlsStack {
    fn default() -> Self {
        Self::Rustls
    }
}

/// Raw PEM bytes for a chain + key pair, as read off disk, tagged with which
/// stack should parse them.
pub struct TlsMaterial {
    pub stack: TlsStack,
    pub chain_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl TryFrom<TlsMaterial> for TlsConfig {
    type Error = anyhow::Error;

    fn try_from(value: TlsMaterial) -> Result<TlsConfig, Self::Error> {
        match value.stack {
            TlsStack::Rustls => {
                let chain = rustls_pemfile::certs(&mut Cursor::new(&value.chain_pem))?
                    .into_iter()
                    .map(::rustls::Certificate)
                    .collect::<Vec<_>>();
                if chain.is_empty() {
                    anyhow::bail!("empty certificate chain");
                }
                let key = rustls_pemfile::pkcs8_private_keys(&mut Cursor::new(&value.key_pem))?
                    .pop()
                    .map(::rustls::PrivateKey)
                    .ok_or_else(|| anyhow::anyhow!("empty private key"))?;
                let scfg = ::rustls::ServerConfig::builder()
                    .with_safe_defaults()
                    .with_no_client_auth()
                    .with_single_cert(chain, key)?;
                Ok(TlsConfig::Rustls(scfg))
            }
            TlsStack::NativeTls => {
                let identity =
                    ::native_tls::Identity::from_pkcs8(&value.chain_pem, &value.key_pem)?;
                Ok(TlsConfig::Native(identity))
            }
        }
    }
}

impl TlsMaterial {
    pub async fn load(
        stack: TlsStack,
        chain_path: impl AsRef<std::path::Path>,
        key_path: impl AsRef<std::path::Path>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            stack,
            chain_pem: crate::util::file_read(chain_path).await?,
            key_pem: crate::util::file_read(key_path).await?,
        })
    }
}
