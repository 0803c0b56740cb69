//! TLS context construction (RFC 8446 §4.2, RFC 7301 ALPN), grounded on
//! salvo's `OpensslConfig::create_acceptor_builder`: a `mozilla_intermediate`
//! base profile, certificate chain + key loading, and an ALPN selection
//! callback chosen from the configured protocol list.

use openssl::pkey::PKey;
use openssl::ssl::{Ssl, SslAcceptor, SslMethod, SslVerifyMode, SslVersion};
use openssl::x509::X509;

use crate::config::{CertSource, KeySource, TlsConfig};
use crate::error::{EngineError, EngineResult};

pub struct TlsContext {
    acceptor: SslAcceptor,
}

impl TlsContext {
    pub fn server(config: &TlsConfig) -> EngineResult<Self> {
        let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls())?;

        let cert_pem = read_source_cert(&config.cert)?;
        let key_pem = read_source_key(&config.key)?;

        let mut chain = X509::stack_from_pem(&cert_pem)?.into_iter();
        let leaf = chain
            .next()
            .ok_or_else(|| EngineError::Config("TLS certificate chain is empty".into()))?;
        builder.set_certificate(&leaf)?;
        for extra in chain {
            builder.add_extra_chain_cert(extra)?;
        }
        builder.set_private_key(&PKey::private_key_from_pem(&key_pem)?)?;

        if !config.allow_tls12 {
            builder.set_min_proto_version(Some(SslVersion::TLS1_3))?;
        }
        if !config.allow_tls13 {
            builder.set_max_proto_version(Some(SslVersion::TLS1_2))?;
        }
        if let Some(ciphers) = &config.cipher_list_12 {
            builder.set_cipher_list(ciphers)?;
        }
        if let Some(suites) = &config.cipher_suites_13 {
            builder.set_ciphersuites(suites)?;
        }
        if config.verify_client {
            builder.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);
            if let Some(ca) = &config.ca_file {
                builder.set_ca_file(ca)?;
            }
        }

        let wire = encode_alpn_wire(&config.alpn_protocols);
        builder.set_alpn_protos(&wire)?;
        let callback_wire = wire.clone();
        builder.set_alpn_select_callback(move |_, client_list| {
            let proto = openssl::ssl::select_next_proto(&callback_wire, client_list).ok_or(openssl::ssl::AlpnError::NOACK)?;
            let pos = client_list
                .windows(proto.len())
                .position(|window| window == proto)
                .expect("selected ALPN protocol must come from the client's own list");
            Ok(&client_list[pos..pos + proto.len()])
        });

        Ok(Self { acceptor: builder.build() })
    }

    /// A fresh per-connection `Ssl` bound to this context's settings.
    pub fn new_ssl(&self) -> EngineResult<Ssl> {
        Ok(Ssl::new(self.acceptor.context())?)
    }
}

fn read_source_cert(source: &CertSource) -> EngineResult<Vec<u8>> {
    match source {
        CertSource::File(path) => std::fs::read(path).map_err(EngineError::Io),
        CertSource::Memory(bytes) => Ok(bytes.clone()),
    }
}

fn read_source_key(source: &KeySource) -> EngineResult<Vec<u8>> {
    match source {
        KeySource::File(path) => std::fs::read(path).map_err(EngineError::Io),
        KeySource::Memory(bytes) => Ok(bytes.clone()),
    }
}

/// Encodes ALPN protocol names into RFC 7301 wire format: a
/// length-prefixed byte string per protocol (e.g. `\x02h2\x08http/1.1`).
fn encode_alpn_wire(protocols: &[String]) -> Vec<u8> {
    let mut wire = Vec::new();
    for proto in protocols {
        wire.push(proto.len() as u8);
        wire.extend_from_slice(proto.as_bytes());
    }
    wire
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_wire_format_is_length_prefixed() {
        let wire = encode_alpn_wire(&["h2".to_string(), "http/1.1".to_string()]);
        assert_eq!(wire, b"\x02h2\x08http/1.1".to_vec());
    }
}
