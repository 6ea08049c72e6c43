//! The digests used to derive transaction identifiers and address payloads.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Computes `SHA256(SHA256(data))`.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Computes `RIPEMD160(SHA256(data))`, the hash committed to by P2PKH, P2SH and P2WPKH
/// outputs.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// Computes `SHA256(data)`, the hash committed to by P2WSH outputs.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::{hash160, sha256d};

    #[test]
    fn known_digests() {
        assert_eq!(
            hex::encode(sha256d(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
        assert_eq!(
            hex::encode(hash160(b"")),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }
}
