use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::error::Error;

/// Client connector trusting either the bundled webpki roots or exactly the
/// certificates found in `ca_file`.
pub fn connector(ca_file: Option<&Path>) -> Result<TlsConnector, Error> {
    let mut roots = RootCertStore::empty();
    match ca_file {
        Some(path) => {
            for cert in load_certs(path)? {
                roots.add(cert)?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let mut config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let file = File::open(path).map_err(|err| Error::Certificates {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    read_certs(&mut BufReader::new(file)).map_err(|reason| Error::Certificates {
        path: path.to_path_buf(),
        reason,
    })
}

fn read_certs(reader: &mut dyn BufRead) -> Result<Vec<CertificateDer<'static>>, String> {
    let certs = rustls_pemfile::certs(reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| err.to_string())?;
    if certs.is_empty() {
        return Err("no CERTIFICATE blocks found".to_string());
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const BOGUS_PEM: &str = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";

    #[test]
    fn default_roots_build_a_connector() {
        assert!(connector(None).is_ok());
    }

    #[test]
    fn read_certs_counts_pem_blocks() {
        let pem = format!("{BOGUS_PEM}{BOGUS_PEM}");
        let certs = read_certs(&mut Cursor::new(pem)).unwrap();
        assert_eq!(certs.len(), 2);
    }

    #[test]
    fn read_certs_rejects_empty_bundle() {
        let err = read_certs(&mut Cursor::new("# nothing here\n")).unwrap_err();
        assert_eq!(err, "no CERTIFICATE blocks found");
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let path = Path::new("/nonexistent/querystat/ca.pem");
        let err = connector(Some(path)).err().unwrap();
        assert!(matches!(err, Error::Certificates { path: ref p, .. } if p == path));
    }

    #[test]
    fn undecodable_certificate_is_tls_config_error() {
        let path = std::env::temp_dir().join(format!("querystat-bogus-{}.pem", std::process::id()));
        std::fs::write(&path, BOGUS_PEM).unwrap();
        let result = connector(Some(&path));
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(Error::TlsConfig(_))));
    }
}
