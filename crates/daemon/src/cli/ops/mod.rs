pub mod bucket;
pub mod mount;
pub mod prefix;
pub mod secrets;
pub mod version;

pub use bucket::Bucket;
pub use mount::Mount;
pub use prefix::Prefix;
pub use version::Version;
