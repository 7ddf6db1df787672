use ctor::ctor;
use libsodium_sys;

pub const SHA256_SIZE: usize = 32;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Initialize the sodium infrastructure
#[ctor]
fn init_sodium() {
    unsafe {
        if libsodium_sys::sodium_init() < 0 {
            panic!("Cryptography initialization failed")
        }
    }
}

/// Hashes the supplied bytes with SHA-256.
#[inline]
pub fn hash_sha256(data: &[u8]) -> [u8; SHA256_SIZE] {
    let mut digest = [0u8; SHA256_SIZE];

    unsafe {
        libsodium_sys::crypto_hash_sha256(digest.as_mut_ptr(), data.as_ptr(), data.len() as u64);
    }

    digest
}

/// Fills the provided buffer with cryptographically secure random bytes
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    unsafe {
        libsodium_sys::randombytes_buf(out.as_mut_ptr() as *mut ::std::ffi::c_void, out.len());
    }
}

/// Encodes the supplied bytes as lowercase hexadecimal.
#[inline]
pub fn hex(data: &[u8]) -> String {
    let mut encoded = String::with_capacity(data.len() * 2);

    for &byte in data {
        encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        encoded.push(HEX_DIGITS[(byte & 0xf) as usize] as char);
    }

    encoded
}
