pub mod cipher;
pub mod kdf;
pub mod session;

pub use cipher::{Field, FieldCipher};
pub use kdf::{derive_key, generate_salt, DerivedKey, KdfParams, Salt};
pub use session::KeySession;
