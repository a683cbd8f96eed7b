use std::collections::HashMap;

use rsa::pkcs1v15::VerifyingKey;
use rsa::sha2::Sha256;
use rsa::RsaPublicKey;

/// A platform certificate reduced to what signature checks need.
#[derive(Clone, Debug)]
pub struct PlatformCert {
    pub serial_no: String,
    pub expire_time: String,
    pub verifying_key: VerifyingKey<Sha256>,
}

impl PlatformCert {
    pub fn new(
        serial_no: impl Into<String>,
        expire_time: impl Into<String>,
        public_key: RsaPublicKey,
    ) -> Self {
        Self {
            serial_no: serial_no.into(),
            expire_time: expire_time.into(),
            verifying_key: VerifyingKey::<Sha256>::new(public_key),
        }
    }
}

/// Platform certificates keyed by serial number.
#[derive(Default)]
pub struct CertStore {
    certs: HashMap<String, PlatformCert>,
}

impl CertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, serial_no: &str) -> Option<&PlatformCert> {
        self.certs.get(serial_no)
    }

    /// Replace the whole set; serials missing from `certs` are dropped.
    pub fn replace(&mut self, certs: Vec<PlatformCert>) {
        self.certs = certs
            .into_iter()
            .map(|cert| (cert.serial_no.clone(), cert))
            .collect();
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }
}
