use ring::hmac;

use crate::crypto::{self, CryptoError};

impl crypto::HmacKey for hmac::Key {
    fn sign(&self, data: &[u8], out: &mut [u8]) {
        out.copy_from_slice(hmac::sign(self, data).as_ref());
    }

    fn signature_len(&self) -> usize {
        self.algorithm().digest_algorithm().output_len()
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        hmac::verify(self, data, signature).map_err(|_| CryptoError)
    }
}

/// Generate a fresh HMAC-SHA256 key from the system's secure random source
pub(crate) fn random_hmac_key() -> hmac::Key {
    let mut key = [0; 64];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut key);
    hmac::Key::new(hmac::HMAC_SHA256, &key)
}
