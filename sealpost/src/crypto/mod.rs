mod engine;
mod group;
mod manager;
mod types;

pub use engine::{derive_mask_key, xor_mask, CryptoEngine};
pub use group::{GroupKind, GroupOperation, LegacyGroup, RistrettoGroup};
pub use manager::KeyManager;
pub use types::{Ciphertext, KeyPair, Point, Scalar};
