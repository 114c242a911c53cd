//! Async EC2 instance metadata client.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::MetadataConfig;
use crate::document::{self, InstanceIdentityDocument};
use crate::error::MetadataError;
use crate::interface::NetworkInterface;
use crate::protocol::{classify_data, data_request, split_body};
use crate::retry::{retry, Attempt};
use crate::token;
use crate::transport::{HttpTransport, Transport, TransportConfig};

/// Root of the instance metadata tree.
pub const METADATA_ROOT: &str = "/latest/meta-data";

/// Root of the user data.
pub const USER_DATA_ROOT: &str = "/latest/user-data/";

/// Root of dynamic data (identity document and signature).
pub const DYNAMIC_DATA_ROOT: &str = "/latest/dynamic/";

pub(crate) const INSTANCE_IDENTITY_DOCUMENT: &str = "instance-identity/document";
pub(crate) const INSTANCE_IDENTITY_SIGNATURE: &str = "instance-identity/signature";

/// Main interface for fetching EC2 instance metadata.
///
/// Every fetch checks the disabled switch first, then runs a bounded retry
/// loop in which each attempt requests a fresh session token before the
/// data `GET`. Single values fetched through [`fetch_data`](Self::fetch_data)
/// are cached per path; list and document fetches are not.
///
/// Results are three-state: `Ok(Some(_))` value present, `Ok(None)` value
/// absent, `Err(_)` fatal.
///
/// # Example
///
/// ```ignore
/// use instance_metadata::{Ec2Metadata, MetadataError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), MetadataError> {
///     let metadata = Ec2Metadata::new(Default::default())?;
///     let id = metadata.instance_id().await?;
///     let region = metadata.ec2_instance_region().await?;
///     println!("{id:?} in {region:?}");
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Ec2Metadata {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Box<dyn Transport>,
    config: MetadataConfig,
}

impl std::fmt::Debug for Ec2Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ec2Metadata")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Ec2Metadata {
    /// Create a client over a default [`HttpTransport`].
    pub fn new(config: MetadataConfig) -> Result<Self, MetadataError> {
        let transport = HttpTransport::new(TransportConfig::default())?;
        Ok(Self::with_transport(transport, config))
    }

    /// Create a client over any transport.
    pub fn with_transport(transport: impl Transport + 'static, config: MetadataConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport: Box::new(transport),
                config,
            }),
        }
    }

    /// Create a client for a fixed base URL with its own empty cache (for testing).
    pub fn with_base_url(base_url: &str) -> Result<Self, MetadataError> {
        let config = MetadataConfig::default()
            .with_base_url(base_url)
            .with_cache(Arc::new(crate::cache::MetadataCache::new()));
        Self::new(config)
    }

    /// Configuration this client was built with.
    pub fn config(&self) -> &MetadataConfig {
        &self.inner.config
    }

    /// Close the underlying transport. Later fetches fail with
    /// `TransportError::Closed`.
    pub fn close(&self) {
        self.inner.transport.close();
    }

    /// Empty the response cache.
    pub fn clear_cache(&self) {
        self.inner.config.cache().clear();
    }

    /// Fetch a single value, served from the cache when present.
    pub async fn fetch_data(&self, path: &str) -> Result<Option<String>, MetadataError> {
        let attempts = self.inner.config.retry().attempts();
        self.fetch_data_with(path, false, attempts).await
    }

    /// Fetch a single value. Unless `force` is set, a cached value is
    /// returned without touching the network. A fetched value replaces any
    /// cached one; an absent value leaves the cache as it was.
    pub async fn fetch_data_with(
        &self,
        path: &str,
        force: bool,
        attempts: u32,
    ) -> Result<Option<String>, MetadataError> {
        self.inner.config.ensure_enabled()?;

        let cache = self.inner.config.cache();
        if !force {
            if let Some(value) = cache.get(path) {
                debug!(path, "metadata cache hit");
                return Ok(Some(value));
            }
        }

        let value = self
            .fetch_raw(path, attempts, true)
            .await?
            .and_then(|items| items.into_iter().next());

        if let Some(value) = &value {
            cache.insert(path, value.clone());
        }
        Ok(value)
    }

    /// Fetch `path` without consulting or filling the cache. With `slurp`
    /// the whole body is one item; otherwise each line is an item.
    pub async fn fetch_raw(
        &self,
        path: &str,
        attempts: u32,
        slurp: bool,
    ) -> Result<Option<Vec<String>>, MetadataError> {
        let config = &self.inner.config;
        config.ensure_enabled()?;

        let endpoint = config.endpoint()?;
        let endpoint = endpoint.as_str();
        let ttl = config.token_ttl();
        let transport = self.inner.transport.as_ref();
        let policy = config.retry().with_attempts(attempts);

        let body = retry(policy, || async move {
            let token = match token::acquire(transport, endpoint, ttl).await {
                Ok(token) => token,
                Err(e) => return Attempt::Abort(e),
            };
            let request = data_request(endpoint, path, token.as_deref());
            classify_data(transport.execute(&request).await)
        })
        .await?;

        Ok(body.map(|body| split_body(body, slurp)))
    }

    /// Fetch a newline-delimited listing.
    pub async fn fetch_list(&self, path: &str) -> Result<Option<Vec<String>>, MetadataError> {
        let attempts = self.inner.config.retry().attempts();
        self.fetch_raw(path, attempts, false).await
    }

    /// Fetch a newline-delimited listing with a custom attempt budget.
    pub async fn fetch_list_with(
        &self,
        path: &str,
        attempts: u32,
    ) -> Result<Option<Vec<String>>, MetadataError> {
        self.fetch_raw(path, attempts, false).await
    }

    /// Fetch a whole document, uncached.
    pub async fn fetch_document(&self, path: &str) -> Result<Option<String>, MetadataError> {
        let attempts = self.inner.config.retry().attempts();
        let items = self.fetch_raw(path, attempts, true).await?;
        Ok(items.and_then(|items| items.into_iter().next()))
    }

    async fn meta(&self, key: &str) -> Result<Option<String>, MetadataError> {
        self.fetch_data(&format!("{METADATA_ROOT}/{key}")).await
    }

    async fn meta_list(&self, key: &str) -> Result<Vec<String>, MetadataError> {
        Ok(self
            .fetch_list(&format!("{METADATA_ROOT}/{key}"))
            .await?
            .unwrap_or_default())
    }

    /// AMI ID used to launch the instance.
    pub async fn ami_id(&self) -> Result<Option<String>, MetadataError> {
        self.meta("ami-id").await
    }

    /// Index of this instance in the reservation.
    pub async fn ami_launch_index(&self) -> Result<Option<String>, MetadataError> {
        self.meta("ami-launch-index").await
    }

    /// Path to the AMI manifest in S3.
    pub async fn ami_manifest_path(&self) -> Result<Option<String>, MetadataError> {
        self.meta("ami-manifest-path").await
    }

    /// AMI IDs of instances rebundled to create this AMI, if the manifest
    /// listed any.
    pub async fn ancestor_ami_ids(&self) -> Result<Vec<String>, MetadataError> {
        self.meta_list("ancestor-ami-ids").await
    }

    /// Pending action: `none`, `shutdown`, or `bundle-pending`.
    pub async fn instance_action(&self) -> Result<Option<String>, MetadataError> {
        self.meta("instance-action").await
    }

    /// ID of this instance.
    pub async fn instance_id(&self) -> Result<Option<String>, MetadataError> {
        self.meta("instance-id").await
    }

    /// Instance type, e.g. `m5.large`.
    pub async fn instance_type(&self) -> Result<Option<String>, MetadataError> {
        self.meta("instance-type").await
    }

    /// Local hostname of the primary interface.
    pub async fn local_hostname(&self) -> Result<Option<String>, MetadataError> {
        self.meta("local-hostname").await
    }

    /// MAC address of the primary interface.
    pub async fn mac_address(&self) -> Result<Option<String>, MetadataError> {
        self.meta("mac").await
    }

    /// Private IPv4 address of the primary interface.
    pub async fn private_ip_address(&self) -> Result<Option<String>, MetadataError> {
        self.meta("local-ipv4").await
    }

    /// Availability zone the instance runs in.
    pub async fn availability_zone(&self) -> Result<Option<String>, MetadataError> {
        self.meta("placement/availability-zone").await
    }

    /// Product codes associated with the instance.
    pub async fn product_codes(&self) -> Result<Vec<String>, MetadataError> {
        self.meta_list("product-codes").await
    }

    /// OpenSSH public key supplied at launch, if any.
    pub async fn public_key(&self) -> Result<Option<String>, MetadataError> {
        self.meta("public-keys/0/openssh-key").await
    }

    /// ID of the RAM disk specified at launch.
    pub async fn ramdisk_id(&self) -> Result<Option<String>, MetadataError> {
        self.meta("ramdisk-id").await
    }

    /// ID of the reservation.
    pub async fn reservation_id(&self) -> Result<Option<String>, MetadataError> {
        self.meta("reservation-id").await
    }

    /// Names of the security groups applied to the instance.
    pub async fn security_groups(&self) -> Result<Vec<String>, MetadataError> {
        self.meta_list("security-groups").await
    }

    /// Signature of the identity document. Cached.
    pub async fn instance_signature(&self) -> Result<Option<String>, MetadataError> {
        self.fetch_data(&format!("{DYNAMIC_DATA_ROOT}{INSTANCE_IDENTITY_SIGNATURE}"))
            .await
    }

    /// Raw instance identity document.
    pub async fn instance_identity_document(&self) -> Result<Option<String>, MetadataError> {
        self.fetch_document(&format!("{DYNAMIC_DATA_ROOT}{INSTANCE_IDENTITY_DOCUMENT}"))
            .await
    }

    /// Region of the running instance, read from the identity document.
    /// An unparsable document or missing field yields `Ok(None)`.
    pub async fn ec2_instance_region(&self) -> Result<Option<String>, MetadataError> {
        Ok(self
            .instance_identity_document()
            .await?
            .and_then(|json| document::region_from(&json)))
    }

    /// Typed view of the identity document.
    pub async fn instance_info(&self) -> Result<Option<InstanceIdentityDocument>, MetadataError> {
        Ok(self
            .instance_identity_document()
            .await?
            .and_then(|json| InstanceIdentityDocument::parse(&json)))
    }

    /// Virtual devices (ami, root, ebs, swap) mapped to device names.
    /// Devices whose value is absent are left out.
    pub async fn block_device_mapping(&self) -> Result<HashMap<String, String>, MetadataError> {
        let mut mapping = HashMap::new();
        for device in self.meta_list("block-device-mapping").await? {
            let device = device.trim();
            if device.is_empty() {
                continue;
            }
            let path = format!("{METADATA_ROOT}/block-device-mapping/{device}");
            if let Some(value) = self.fetch_document(&path).await? {
                mapping.insert(device.to_string(), value);
            }
        }
        Ok(mapping)
    }

    /// Network interfaces attached to the instance.
    pub async fn network_interfaces(&self) -> Result<Vec<NetworkInterface>, MetadataError> {
        let macs = self.meta_list("network/interfaces/macs/").await?;
        Ok(macs
            .iter()
            .map(|mac| mac.trim().trim_end_matches('/'))
            .filter(|mac| !mac.is_empty())
            .map(|mac| NetworkInterface::new(self.clone(), mac))
            .collect())
    }

    /// User data supplied at launch.
    pub async fn user_data(&self) -> Result<Option<String>, MetadataError> {
        self.fetch_document(USER_DATA_ROOT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(METADATA_ROOT, "/latest/meta-data");
        assert_eq!(USER_DATA_ROOT, "/latest/user-data/");
        assert_eq!(
            format!("{DYNAMIC_DATA_ROOT}{INSTANCE_IDENTITY_DOCUMENT}"),
            "/latest/dynamic/instance-identity/document"
        );
    }

    #[test]
    fn test_with_base_url_uses_private_cache() {
        let metadata = Ec2Metadata::with_base_url("http://localhost:8080/").unwrap();
        assert_eq!(metadata.config().endpoint().unwrap(), "http://localhost:8080");
        assert!(!Arc::ptr_eq(
            metadata.config().cache(),
            &crate::cache::MetadataCache::global()
        ));
    }
}
