mod archive;
mod fetcher;
mod http;

pub use archive::unpack_archive;
pub use fetcher::{
    decode_listing_response, decode_version_list, ArchiveResponse, ManifestFetcher,
    MIN_ARCHIVE_BYTES,
};
pub use http::HttpManifestFetcher;

#[cfg(test)]
mod tests;
