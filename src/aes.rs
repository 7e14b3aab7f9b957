use aes::{
    cipher::{BlockDecryptMut, KeyInit, KeyIvInit, StreamCipher},
    Aes128,
};

use crate::array_ref;

pub const SECTOR_SIZE: usize = 0x200;

/// Decrypts data in-place using AES-128-XTS with the given key pair.
///
/// `data` must be a whole number of sectors; the first one is `sector_idx`.
pub fn aes_xts_decrypt(key: &[u8; 0x20], data: &mut [u8], sector_idx: u128) {
    let cipher_1 = Aes128::new(array_ref!(key, 0, 0x10).into());
    let cipher_2 = Aes128::new(array_ref!(key, 0x10, 0x10).into());
    let xts = <xts_mode::Xts128<Aes128>>::new(cipher_1, cipher_2);
    // Non-standard tweak: sector index is big-endian
    xts.decrypt_area(data, SECTOR_SIZE, sector_idx, |idx| idx.to_be_bytes());
}

/// Decrypts a single block in-place using AES-128-ECB with the given key.
pub fn aes_ecb_decrypt(key: &[u8; 0x10], block: &mut [u8; 0x10]) {
    ecb::Decryptor::<Aes128>::new(key.into()).decrypt_block_mut(block.into());
}

/// Decrypts data in-place using AES-128-CTR with a 128-bit big-endian counter.
pub fn aes_ctr_decrypt(key: &[u8; 0x10], counter: &[u8; 0x10], data: &mut [u8]) {
    let mut ctr = ctr::Ctr128BE::<Aes128>::new(key.into(), counter.into());
    ctr.apply_keystream(data);
}
