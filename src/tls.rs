// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! TLS setup for the connection to the array's management API.
//!
//! The array is usually reached with a private CA, and optionally with two-way authentication
//! where the client presents its own certificate. Both are built here into a rustls
//! `ClientConfig` that is handed to reqwest.

use std::{fs::File, io::BufReader, sync::Arc};

use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    ClientConfig, RootCertStore,
};

use crate::{config::ArrayConfig, error::Error};

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, Error> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("could not open certificate \"{path}\": {e}")))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("could not parse certificate \"{path}\": {e}")))?;
    if certs.is_empty() {
        return Err(Error::Config(format!("no certificate found in \"{path}\"")));
    }
    Ok(certs)
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, Error> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("could not open private key \"{path}\": {e}")))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| Error::Config(format!("could not parse private key \"{path}\": {e}")))?
        .ok_or_else(|| Error::Config(format!("no private key found in \"{path}\"")))
}

/// Build a rustls client configuration when the array config asks for a private CA or for
/// two-way TLS. Returns `None` when reqwest's default TLS setup is enough.
pub fn client_config(array: &ArrayConfig) -> Result<Option<ClientConfig>, Error> {
    let Some(ca_path) = &array.ca_cert else {
        if array.client_cert.is_some() {
            return Err(Error::Config(
                "two-way TLS requires ca_cert to be set".to_string(),
            ));
        }
        return Ok(None);
    };

    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        roots
            .add(cert)
            .map_err(|e| Error::Config(format!("invalid CA certificate \"{ca_path}\": {e}")))?;
    }

    let builder =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Config(format!("could not set up TLS: {e}")))?
            .with_root_certificates(roots);

    let config = match (&array.client_cert, &array.client_key) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
            .map_err(|e| Error::Config(format!("invalid client certificate \"{cert}\": {e}")))?,
        _ => builder.with_no_client_auth(),
    };

    Ok(Some(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn array(extra: &str) -> ArrayConfig {
        let contents = format!(
            "[array]\nrest_url = \"https://10.0.0.1:28443\"\nusername = \"admin\"\n{extra}"
        );
        Config::from_toml(&contents).unwrap().array
    }

    #[test]
    fn default_tls() {
        assert!(client_config(&array("")).unwrap().is_none());
    }

    #[test]
    fn client_auth_needs_ca() {
        let array = array("client_cert = \"/tmp/c.pem\"\nclient_key = \"/tmp/k.pem\"\n");
        assert!(matches!(client_config(&array), Err(Error::Config(_))));
    }

    #[test]
    fn missing_ca_file() {
        let array = array("ca_cert = \"/nonexistent/ca.pem\"\n");
        assert!(matches!(client_config(&array), Err(Error::Config(_))));
    }
}
