mod checksum;
mod hash;

pub use checksum::{sha256_hex, verify_sha256};
pub use hash::{
    git_blob_sha1_hex, BlobHash, ContentHasher, FixedMemoryProbe, MemoryProbe, ProcessMemoryProbe,
    EMPTY_BLOB_SHA1,
};
