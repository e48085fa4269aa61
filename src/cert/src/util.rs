use std::{fs::File, io::BufReader};

use rustls::{Certificate, PrivateKey, ServerConfig};

use crate::error::Error;

pub fn load_certificates_from_pem(path: &str) -> Result<Vec<Certificate>, Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)?;
    if certs.is_empty() {
        return Err(Error::NoCertificate(path.to_string()));
    }

    Ok(certs.into_iter().map(Certificate).collect())
}

pub fn load_private_key_from_file(path: &str) -> Result<PrivateKey, Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader)?;

    match keys.len() {
        0 => Err(Error::NoPrivateKey(path.to_string())),
        1 => Ok(PrivateKey(keys.remove(0))),
        _ => Err(Error::TooManyPrivateKeys(path.to_string())),
    }
}

/// Server side TLS configuration for the admission webhook endpoint.
pub fn server_config(cert: &str, key: &str) -> Result<ServerConfig, Error> {
    let certs = load_certificates_from_pem(cert)?;
    let key = load_private_key_from_file(key)?;
    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(format!("egressd-cert-{}-{name}", std::process::id()));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn works_server_config() {
        let cert = rcgen::generate_simple_self_signed(vec![
            "egressd-webhook.kube-system.svc".to_string(),
        ])
        .unwrap();
        let cert_path = write_temp("tls.crt", &cert.serialize_pem().unwrap());
        let key_path = write_temp("tls.key", &cert.serialize_private_key_pem());

        let certs = load_certificates_from_pem(&cert_path).unwrap();
        assert_eq!(certs.len(), 1);
        load_private_key_from_file(&key_path).unwrap();
        server_config(&cert_path, &key_path).unwrap();
    }

    #[test]
    fn fails_load_without_key() {
        let path = write_temp("empty.key", "");
        match load_private_key_from_file(&path) {
            Err(Error::NoPrivateKey(p)) => assert_eq!(p, path),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            load_certificates_from_pem(&path),
            Err(Error::NoCertificate(_))
        ));
        assert!(matches!(
            load_certificates_from_pem("/nonexistent/egressd/tls.crt"),
            Err(Error::StdIo(_))
        ));
    }
}
