use boring::pkey::PKey;
use boring::ssl::{select_next_proto, AlpnError, SslAcceptor, SslAcceptorBuilder, SslMethod};
use boring::x509::X509;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

/// Hostnames every test certificate is valid for.
pub const TEST_HOSTS: &[&str] = &[
    "example.test",
    "protected.test",
    "open.test",
    "a.test",
    "b.test",
    "localhost",
];

/// Generate a self-signed certificate whose subject (and therefore issuer) is
/// `CN=<common_name>`. Returns the acceptor builder and the PEM certificate to
/// trust on the client.
pub fn generate_cert_bundle(common_name: &str) -> (SslAcceptorBuilder, Vec<u8>) {
    let hosts: Vec<String> = TEST_HOSTS.iter().map(|h| h.to_string()).collect();
    let mut params = CertificateParams::new(hosts).expect("Failed to build cert params");
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    params.distinguished_name = name;

    let key_pair = KeyPair::generate().expect("Failed to generate key pair");
    let cert = params
        .self_signed(&key_pair)
        .expect("Failed to generate cert");
    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();

    let pkey = PKey::private_key_from_pem(key_pem.as_bytes()).expect("Failed to parse private key");
    let x509 = X509::from_pem(cert_pem.as_bytes()).expect("Failed to parse certificate");

    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())
        .expect("Failed to create SslAcceptor builder");
    builder
        .set_private_key(&pkey)
        .expect("Failed to set private key");
    builder
        .set_certificate(&x509)
        .expect("Failed to set certificate");

    (builder, cert_pem.into_bytes())
}

/// Acceptor that selects `alpn` (wire format, e.g. `b"\x02h2"`), or never
/// acknowledges ALPN when `None`.
pub fn acceptor(common_name: &str, alpn: Option<&'static [u8]>) -> (SslAcceptor, Vec<u8>) {
    let (mut builder, ca_cert) = generate_cert_bundle(common_name);
    if let Some(protos) = alpn {
        builder.set_alpn_select_callback(move |_, client_protos| {
            select_next_proto(protos, client_protos).ok_or(AlpnError::NOACK)
        });
    }
    (builder.build(), ca_cert)
}
