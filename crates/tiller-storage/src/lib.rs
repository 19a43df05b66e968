// Storage backends for the workflow engine
//
// Ships the secret-encryption service and the in-memory Repository used by
// tests and examples. A relational backend implements the same Repository
// trait from tiller-core and must match MemoryRepository's semantics
// (cascading delete, upsert-by-key, newest-first history).

pub mod encryption;
pub mod memory;

pub use encryption::{generate_encryption_key, SecretCipher, ENCRYPTION_KEY_ENV};
pub use memory::MemoryRepository;
