use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};
use x509_cert::der::DecodePem;

use crate::cert::store::{CertStore, PlatformCert};
use crate::crypto::decrypt::decrypt_resource;
use crate::crypto::verify::{check_timestamp_freshness, verify_signature};
use crate::error::WxPayError;
use crate::model::notify::{NotifyHeaders, NotifyResource};

/// How long a fetched certificate set is trusted before it is re-fetched.
pub const CERT_REFRESH_INTERVAL: Duration = Duration::from_secs(12 * 3600);

#[derive(Deserialize)]
struct CertificateList {
    data: Vec<SealedCertificate>,
}

#[derive(Deserialize)]
struct SealedCertificate {
    serial_no: String,
    expire_time: String,
    encrypt_certificate: NotifyResource,
}

/// Holds the platform certificates used to check gateway signatures.
#[derive(Default)]
pub struct PlatformCertManager {
    store: CertStore,
}

impl PlatformCertManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager pre-loaded with known certificates, e.g. a pinned platform key.
    pub fn with_certs(certs: Vec<PlatformCert>) -> Self {
        let mut mgr = Self::new();
        mgr.update_certs(certs);
        mgr
    }

    pub fn get_cert(&self, serial_no: &str) -> Option<&PlatformCert> {
        self.store.get(serial_no)
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn update_certs(&mut self, certs: Vec<PlatformCert>) {
        info!(count = certs.len(), "platform certificates updated");
        self.store.replace(certs);
    }

    /// Check a webhook delivery: timestamp window first, then the signature.
    pub fn verify(&self, headers: &NotifyHeaders, body: &str, now: i64) -> Result<(), WxPayError> {
        check_timestamp_freshness(&headers.timestamp, now)?;
        self.verify_signed(headers, body)
    }

    /// Check `headers.signature` over `timestamp\nnonce\nbody\n` with the
    /// certificate named by `headers.serial`.
    pub fn verify_signed(&self, headers: &NotifyHeaders, body: &str) -> Result<(), WxPayError> {
        let Some(cert) = self.get_cert(&headers.serial) else {
            warn!(serial = %headers.serial, "platform certificate not found for serial");
            return Err(WxPayError::VerifyError(format!(
                "platform certificate not found for serial: {}",
                headers.serial
            )));
        };

        verify_signature(&cert.verifying_key, headers, body)
    }
}

/// Decrypt the sealed certificates of a `/v3/certificates` reply.
pub(crate) fn decode_certificates(body: &str, api_v3_key: &str) -> Result<Vec<PlatformCert>, WxPayError> {
    let list: CertificateList = serde_json::from_str(body)
        .map_err(|e| WxPayError::CertError(format!("deserialize certificates: {e}")))?;

    list.data
        .into_iter()
        .map(|sealed| {
            let pem = decrypt_resource(api_v3_key, &sealed.encrypt_certificate)?;
            let public_key = extract_public_key_from_pem(&pem)?;
            Ok(PlatformCert::new(sealed.serial_no, sealed.expire_time, public_key))
        })
        .collect()
}

fn extract_public_key_from_pem(pem_str: &str) -> Result<rsa::RsaPublicKey, WxPayError> {
    use rsa::pkcs1::DecodeRsaPublicKey;

    let cert = x509_cert::Certificate::from_pem(pem_str)
        .map_err(|e| WxPayError::CertError(format!("parse X.509 certificate: {e}")))?;

    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes();

    rsa::RsaPublicKey::from_pkcs1_der(spki_der)
        .map_err(|e| WxPayError::CertError(format!("parse RSA public key: {e}")))
}
