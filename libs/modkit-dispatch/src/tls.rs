//! TLS setup for [`HyperTransport`](crate::HyperTransport).
//!
//! Native root certificates are loaded once per process; the OS store lookup
//! is slow on some platforms and transports may be rebuilt often.

use crate::config::{TlsRootConfig, TransportSecurity};
use crate::error::BuildError;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

/// Always holds the load result; empty means no certs were found.
static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_roots() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }

    if result.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = result.certs.len(), "loaded native root certificates");
    }
    result.certs
}

fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(load_native_roots).as_slice()
}

/// Process-wide default provider if one is installed, aws-lc-rs otherwise.
/// Never installs a provider globally.
fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn tls_error(message: String) -> BuildError {
    BuildError::Tls(message.into())
}

/// Client config trusting the native roots. Fails when none are usable, so a
/// broken trust store shows up when the transport is built rather than on the
/// first handshake.
fn native_roots_client_config() -> Result<rustls::ClientConfig, BuildError> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err(tls_error(
            "no native root CA certificates found in OS certificate store".to_owned(),
        ));
    }

    let mut root_store = rustls::RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(tls_error(format!(
            "no valid native root CA certificates parsed (found {}, all failed to parse)",
            certs.len()
        )));
    }

    let config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| BuildError::Tls(Box::new(e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(config)
}

/// HTTPS connector for the given roots. ALPN advertises both h2 and
/// http/1.1; plain HTTP is only accepted with `AllowInsecureHttp`.
pub fn build_https_connector(
    tls_roots: TlsRootConfig,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, BuildError> {
    let allow_http = transport == TransportSecurity::AllowInsecureHttp;

    let builder = match tls_roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(|e| BuildError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => {
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(native_roots_client_config()?)
        }
    };

    let connector = if allow_http {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}
