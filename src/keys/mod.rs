pub mod fingerprint;
pub mod generator;
pub mod store;

pub use generator::KeyPairGenerator;
pub use store::{FileKeyStore, MemoryKeyStore, SecureKeyStore};
