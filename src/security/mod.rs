//! Cryptographic helpers for data the admin client keeps on disk.

pub mod encryption;

pub use encryption::AesEncryptor;
