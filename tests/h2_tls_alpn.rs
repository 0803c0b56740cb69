//! Scenario S6: a client offering `h2` and `http/1.1` gets `h2` back
//! from a real TLS handshake, because the server's ALPN list prefers it
//! first. Exercises `TlsContext::server`'s actual `SslAcceptor` over a
//! loopback TCP socket rather than mocking the callback, grounded on
//! salvo's `OpensslConfig` test harness pattern (real certs, real
//! handshake, no stubbed BIO).

use std::net::{TcpListener, TcpStream};
use std::thread;

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::{X509NameBuilder, X509};

use faster_engine::config::{CertSource, KeySource, TlsConfig};
use faster_engine::tls::TlsContext;

/// A throwaway self-signed certificate, generated fresh per test run
/// rather than checked in, so nothing here depends on an external file.
fn self_signed_cert() -> (Vec<u8>, Vec<u8>) {
    let rsa = Rsa::generate(2048).expect("rsa keygen");
    let pkey = PKey::from_rsa(rsa).expect("pkey wrap");

    let mut name_builder = X509NameBuilder::new().expect("name builder");
    name_builder.append_entry_by_text("CN", "localhost").expect("CN entry");
    let name = name_builder.build();

    let mut builder = X509::builder().expect("x509 builder");
    builder.set_version(2).expect("version");
    let mut serial = BigNum::new().expect("bignum");
    serial.rand(64, MsbOption::MAYBE_ZERO, false).expect("rand serial");
    let serial = serial.to_asn1_integer().expect("asn1 integer");
    builder.set_serial_number(&serial).expect("serial");
    builder.set_subject_name(&name).expect("subject");
    builder.set_issuer_name(&name).expect("issuer");
    builder.set_pubkey(&pkey).expect("pubkey");
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).expect("not_before");
    builder.set_not_after(&Asn1Time::days_from_now(7).unwrap()).expect("not_after");
    builder.sign(&pkey, MessageDigest::sha256()).expect("sign");
    let cert = builder.build();

    (cert.to_pem().expect("cert pem"), pkey.private_key_to_pem_pkcs8().expect("key pem"))
}

#[test]
fn server_prefers_h2_when_client_offers_both() {
    let (cert_pem, key_pem) = self_signed_cert();
    let tls_config = TlsConfig::new(CertSource::Memory(cert_pem), KeySource::Memory(key_pem))
        .alpn_protocols(vec!["h2".to_string(), "http/1.1".to_string()]);
    let ctx = TlsContext::server(&tls_config).expect("build TlsContext");

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");

    let server_thread = thread::spawn(move || {
        let (tcp_stream, _) = listener.accept().expect("accept loopback connection");
        let ssl = ctx.new_ssl().expect("new ssl");
        let mut stream = openssl::ssl::SslStream::new(ssl, tcp_stream).expect("wrap stream");
        stream.accept().expect("server handshake");
        stream.ssl().selected_alpn_protocol().map(|p| p.to_vec())
    });

    let tcp_stream = TcpStream::connect(addr).expect("connect loopback");
    let mut connector_builder = SslConnector::builder(SslMethod::tls()).expect("connector builder");
    connector_builder.set_verify(SslVerifyMode::NONE);
    connector_builder.set_alpn_protos(b"\x02h2\x08http/1.1").expect("set alpn");
    let connector = connector_builder.build();
    let client_stream = connector.connect("localhost", tcp_stream).expect("client handshake");

    let client_alpn = client_stream.ssl().selected_alpn_protocol().map(|p| p.to_vec());
    let server_alpn = server_thread.join().expect("server thread panicked");

    assert_eq!(client_alpn.as_deref(), Some(b"h2".as_slice()));
    assert_eq!(server_alpn.as_deref(), Some(b"h2".as_slice()));
}

#[test]
fn server_falls_back_to_http11_when_client_only_offers_it() {
    let (cert_pem, key_pem) = self_signed_cert();
    let tls_config = TlsConfig::new(CertSource::Memory(cert_pem), KeySource::Memory(key_pem))
        .alpn_protocols(vec!["h2".to_string(), "http/1.1".to_string()]);
    let ctx = TlsContext::server(&tls_config).expect("build TlsContext");

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");

    let server_thread = thread::spawn(move || {
        let (tcp_stream, _) = listener.accept().expect("accept loopback connection");
        let ssl = ctx.new_ssl().expect("new ssl");
        let mut stream = openssl::ssl::SslStream::new(ssl, tcp_stream).expect("wrap stream");
        stream.accept().expect("server handshake");
        stream.ssl().selected_alpn_protocol().map(|p| p.to_vec())
    });

    let tcp_stream = TcpStream::connect(addr).expect("connect loopback");
    let mut connector_builder = SslConnector::builder(SslMethod::tls()).expect("connector builder");
    connector_builder.set_verify(SslVerifyMode::NONE);
    connector_builder.set_alpn_protos(b"\x08http/1.1").expect("set alpn");
    let connector = connector_builder.build();
    let client_stream = connector.connect("localhost", tcp_stream).expect("client handshake");

    let client_alpn = client_stream.ssl().selected_alpn_protocol().map(|p| p.to_vec());
    let server_alpn = server_thread.join().expect("server thread panicked");

    assert_eq!(client_alpn.as_deref(), Some(b"http/1.1".as_slice()));
    assert_eq!(server_alpn.as_deref(), Some(b"http/1.1".as_slice()));
}
