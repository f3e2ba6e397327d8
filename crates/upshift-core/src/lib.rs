mod changeset;
mod channel;
mod filter;
mod manifest;
mod version;

pub use changeset::{
    forced_removal_filter, Changeset, InstallationRecord, LocalFile, FORCED_REMOVAL_RULES,
};
pub use channel::{find_channel, Channel, ChannelKind, ReleaseRef};
pub use filter::{FilterAction, FilterRule, PathFilterSet, KEEP_RULES};
pub use manifest::{parse_listing_line, AdminDirRemap, ListingEntry, Manifest, RELEASE_ADMIN_DIR};
pub use version::{
    floating_version_stamp, installed_identifier, is_stable_identifier, VersionDeclaration,
};
