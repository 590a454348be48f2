use std::error::Error;

use bucket::{BucketClient, BucketError};
use common::credentials::CLIENT_SESSION_NAME;
use common::prelude::{CredentialResolver, StoreConfig};
use csi_s3_daemon::DriverConfig;

#[derive(Debug, Clone)]
pub struct OpContext {
    pub config: DriverConfig,
}

impl OpContext {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    /// Client for one store, erasing with the configured batch size and
    /// parallelism.
    pub async fn bucket_client(&self, store: StoreConfig) -> Result<BucketClient, BucketError> {
        let resolver = CredentialResolver::default().with_session_name(CLIENT_SESSION_NAME);
        BucketClient::from_config_with(store, &resolver, self.config.erase).await
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::cli::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::cli::op::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Output = OpOutput;
            type Error = OpError;

            async fn execute(&self, ctx: &$crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => {
                            op.execute(ctx).await
                                .map(OpOutput::$variant)
                                .map_err(OpError::$variant)
                        },
                    )*
                }
            }
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        OpOutput::$variant(output) => write!(f, "{}", output),
                    )*
                }
            }
        }
    };
}
