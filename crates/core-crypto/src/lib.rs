//! Core cryptographic primitives (thin wrappers around ring)

pub mod ed25519 {
    use ring::signature::{self, Ed25519KeyPair, KeyPair, UnparsedPublicKey};

    pub const SEED_LEN: usize = 32;
    pub const PUBLIC_KEY_LEN: usize = 32;
    pub const SIGNATURE_LEN: usize = 64;

    pub fn public_key(seed: &[u8; SEED_LEN]) -> Result<[u8; PUBLIC_KEY_LEN], ()> {
        let kp = Ed25519KeyPair::from_seed_unchecked(seed).map_err(|_| ())?;
        let mut out = [0u8; PUBLIC_KEY_LEN];
        out.copy_from_slice(kp.public_key().as_ref());
        Ok(out)
    }

    pub fn sign(seed: &[u8; SEED_LEN], msg: &[u8]) -> Result<[u8; SIGNATURE_LEN], ()> {
        let kp = Ed25519KeyPair::from_seed_unchecked(seed).map_err(|_| ())?;
        let mut out = [0u8; SIGNATURE_LEN];
        out.copy_from_slice(kp.sign(msg).as_ref());
        Ok(out)
    }

    pub fn verify(pk: &[u8], msg: &[u8], sig: &[u8]) -> Result<(), ()> {
        if pk.len() != PUBLIC_KEY_LEN || sig.len() != SIGNATURE_LEN {
            return Err(());
        }
        UnparsedPublicKey::new(&signature::ED25519, pk)
            .verify(msg, sig)
            .map_err(|_| ())
    }
}

pub mod digest {
    pub fn sha256(data: &[u8]) -> [u8; 32] {
        let d = ring::digest::digest(&ring::digest::SHA256, data);
        let mut out = [0u8; 32];
        out.copy_from_slice(d.as_ref());
        out
    }
}
