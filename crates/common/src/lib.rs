/**
 * Credential resolution shared by every mounter
 *  and by the bucket client.
 *  - static keys always win
 *  - otherwise ambient credentials, optionally
 *    exchanged for a role through the trust broker
 */
pub mod credentials;
/**
 * AWS Signature Version 4 header signing.
 * Used for the trust-broker calls and for the
 *  few object-store calls the S3 client library
 *  does not cover.
 */
pub mod signing;
/**
 * Per volume-class configuration read from the
 *  provisioning secret.
 */
pub mod store_config;
/**
 * The persisted volume context: bucket, prefix,
 *  mounter selection and mount options.
 */
pub mod volume;

pub mod prelude {
    pub use crate::credentials::{
        CallerIdentity, CredentialError, CredentialMode, CredentialResolver, ResolvedCredentials,
    };
    pub use crate::store_config::{ConfigError, StoreConfig};
    pub use crate::volume::{MounterKind, VolumeMeta};
}
