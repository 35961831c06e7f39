use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::Error;
use crate::broker::{Broker, StreamSpec};

/// Provisions the stream at most once per owner.
///
/// Concurrent callers share a single in-flight attempt. A failed attempt
/// leaves the cell empty so the next caller tries again.
#[derive(Debug)]
pub struct StreamProvisioner<B> {
    broker: B,
    ready: OnceCell<()>,
    spec: StreamSpec,
}

impl<B> StreamProvisioner<B>
where
    B: Broker,
{
    /// Creates a provisioner for `spec`.
    pub const fn new(broker: B, spec: StreamSpec) -> Self {
        Self {
            broker,
            ready: OnceCell::const_new(),
            spec,
        }
    }

    /// The stream this provisioner manages.
    pub const fn spec(&self) -> &StreamSpec {
        &self.spec
    }

    /// Whether the stream has been provisioned.
    pub fn is_provisioned(&self) -> bool {
        self.ready.initialized()
    }

    /// Ensures the stream exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provisioning`] if the broker refused or could not be reached.
    pub async fn ensure(&self) -> Result<(), Error> {
        self.ready
            .get_or_try_init(|| async {
                match self.broker.ensure_stream(&self.spec).await {
                    Ok(()) => {
                        info!(
                            stream = %self.spec.name,
                            subjects = ?self.spec.subjects,
                            "stream provisioned"
                        );
                        Ok(())
                    }
                    Err(e) => {
                        warn!(stream = %self.spec.name, error = %e, "stream provisioning failed");
                        Err(Error::Provisioning(e))
                    }
                }
            })
            .await
            .map(|_| ())
    }
}
