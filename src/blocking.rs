//! Blocking EC2 instance metadata client.
//!
//! Same protocol, cache, and retry rules as [`Ec2Metadata`](crate::Ec2Metadata),
//! but every call runs to completion on the calling thread, backoff pauses
//! included. Must not be called from inside an async runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::config::MetadataConfig;
use crate::document::{self, InstanceIdentityDocument};
use crate::error::MetadataError;
use crate::metadata::{
    DYNAMIC_DATA_ROOT, INSTANCE_IDENTITY_DOCUMENT, INSTANCE_IDENTITY_SIGNATURE, METADATA_ROOT,
    USER_DATA_ROOT,
};
use crate::protocol::{classify_data, data_request, split_body};
use crate::retry::{retry_blocking, Attempt};
use crate::token;
use crate::transport::{BlockingTransport, PooledTransport, TransportConfig};

/// Blocking counterpart of [`Ec2Metadata`](crate::Ec2Metadata).
#[derive(Clone)]
pub struct BlockingEc2Metadata {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Box<dyn BlockingTransport>,
    config: MetadataConfig,
}

impl std::fmt::Debug for BlockingEc2Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingEc2Metadata")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl BlockingEc2Metadata {
    /// Create a client on the process-wide reactor pool.
    pub fn new(config: MetadataConfig) -> Result<Self, MetadataError> {
        let transport = PooledTransport::new(TransportConfig::default())?;
        Ok(Self::with_transport(transport, config))
    }

    /// Create a client over any blocking transport.
    pub fn with_transport(transport: impl BlockingTransport + 'static, config: MetadataConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport: Box::new(transport),
                config,
            }),
        }
    }

    /// Configuration this client was built with.
    pub fn config(&self) -> &MetadataConfig {
        &self.inner.config
    }

    /// Close the underlying transport, releasing its reactor reference.
    pub fn close(&self) {
        self.inner.transport.close();
    }

    /// Empty the response cache.
    pub fn clear_cache(&self) {
        self.inner.config.cache().clear();
    }

    /// Fetch a single value, served from the cache when present.
    pub fn fetch_data(&self, path: &str) -> Result<Option<String>, MetadataError> {
        let attempts = self.inner.config.retry().attempts();
        self.fetch_data_with(path, false, attempts)
    }

    /// See [`Ec2Metadata::fetch_data_with`](crate::Ec2Metadata::fetch_data_with).
    pub fn fetch_data_with(
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
            .fetch_raw(path, attempts, true)?
            .and_then(|items| items.into_iter().next());
        if let Some(value) = &value {
            cache.insert(path, value.clone());
        }
        Ok(value)
    }

    /// Fetch `path` without consulting or filling the cache, sleeping the
    /// calling thread between attempts.
    pub fn fetch_raw(
        &self,
        path: &str,
        attempts: u32,
        slurp: bool,
    ) -> Result<Option<Vec<String>>, MetadataError> {
        let config = &self.inner.config;
        config.ensure_enabled()?;

        let endpoint = config.endpoint()?;
        let ttl = config.token_ttl();
        let transport = self.inner.transport.as_ref();
        let policy = config.retry().with_attempts(attempts);

        let body = retry_blocking(policy, || {
            let token = match token::acquire_blocking(transport, &endpoint, ttl) {
                Ok(token) => token,
                Err(e) => return Attempt::Abort(e),
            };
            let request = data_request(&endpoint, path, token.as_deref());
            classify_data(transport.execute(&request))
        })?;

        Ok(body.map(|body| split_body(body, slurp)))
    }

    /// Fetch a newline-delimited listing.
    pub fn fetch_list(&self, path: &str) -> Result<Option<Vec<String>>, MetadataError> {
        let attempts = self.inner.config.retry().attempts();
        self.fetch_raw(path, attempts, false)
    }

    /// Fetch a newline-delimited listing with a custom attempt budget.
    pub fn fetch_list_with(
        &self,
        path: &str,
        attempts: u32,
    ) -> Result<Option<Vec<String>>, MetadataError> {
        self.fetch_raw(path, attempts, false)
    }

    /// Fetch a whole document, uncached.
    pub fn fetch_document(&self, path: &str) -> Result<Option<String>, MetadataError> {
        let attempts = self.inner.config.retry().attempts();
        Ok(self
            .fetch_raw(path, attempts, true)?
            .and_then(|items| items.into_iter().next()))
    }

    fn meta(&self, key: &str) -> Result<Option<String>, MetadataError> {
        self.fetch_data(&format!("{METADATA_ROOT}/{key}"))
    }

    fn meta_list(&self, key: &str) -> Result<Vec<String>, MetadataError> {
        Ok(self
            .fetch_list(&format!("{METADATA_ROOT}/{key}"))?
            .unwrap_or_default())
    }

    /// AMI ID used to launch the instance.
    pub fn ami_id(&self) -> Result<Option<String>, MetadataError> {
        self.meta("ami-id")
    }

    pub fn ami_launch_index(&self) -> Result<Option<String>, MetadataError> {
        self.meta("ami-launch-index")
    }

    pub fn ami_manifest_path(&self) -> Result<Option<String>, MetadataError> {
        self.meta("ami-manifest-path")
    }

    pub fn ancestor_ami_ids(&self) -> Result<Vec<String>, MetadataError> {
        self.meta_list("ancestor-ami-ids")
    }

    pub fn instance_action(&self) -> Result<Option<String>, MetadataError> {
        self.meta("instance-action")
    }

    /// ID of this instance.
    pub fn instance_id(&self) -> Result<Option<String>, MetadataError> {
        self.meta("instance-id")
    }

    pub fn instance_type(&self) -> Result<Option<String>, MetadataError> {
        self.meta("instance-type")
    }

    pub fn local_hostname(&self) -> Result<Option<String>, MetadataError> {
        self.meta("local-hostname")
    }

    /// MAC address of the primary interface.
    pub fn mac_address(&self) -> Result<Option<String>, MetadataError> {
        self.meta("mac")
    }

    pub fn private_ip_address(&self) -> Result<Option<String>, MetadataError> {
        self.meta("local-ipv4")
    }

    pub fn availability_zone(&self) -> Result<Option<String>, MetadataError> {
        self.meta("placement/availability-zone")
    }

    pub fn product_codes(&self) -> Result<Vec<String>, MetadataError> {
        self.meta_list("product-codes")
    }

    pub fn public_key(&self) -> Result<Option<String>, MetadataError> {
        self.meta("public-keys/0/openssh-key")
    }

    pub fn ramdisk_id(&self) -> Result<Option<String>, MetadataError> {
        self.meta("ramdisk-id")
    }

    pub fn reservation_id(&self) -> Result<Option<String>, MetadataError> {
        self.meta("reservation-id")
    }

    pub fn security_groups(&self) -> Result<Vec<String>, MetadataError> {
        self.meta_list("security-groups")
    }

    /// Signature of the identity document. Cached.
    pub fn instance_signature(&self) -> Result<Option<String>, MetadataError> {
        self.fetch_data(&format!("{DYNAMIC_DATA_ROOT}{INSTANCE_IDENTITY_SIGNATURE}"))
    }

    /// Raw instance identity document.
    pub fn instance_identity_document(&self) -> Result<Option<String>, MetadataError> {
        self.fetch_document(&format!("{DYNAMIC_DATA_ROOT}{INSTANCE_IDENTITY_DOCUMENT}"))
    }

    /// Region of the running instance, read from the identity document.
    pub fn ec2_instance_region(&self) -> Result<Option<String>, MetadataError> {
        Ok(self
            .instance_identity_document()?
            .and_then(|json| document::region_from(&json)))
    }

    /// Typed view of the identity document.
    pub fn instance_info(&self) -> Result<Option<InstanceIdentityDocument>, MetadataError> {
        Ok(self
            .instance_identity_document()?
            .and_then(|json| InstanceIdentityDocument::parse(&json)))
    }

    /// Virtual devices mapped to device names. Absent devices are left out.
    pub fn block_device_mapping(&self) -> Result<HashMap<String, String>, MetadataError> {
        let mut mapping = HashMap::new();
        for device in self.meta_list("block-device-mapping")? {
            let device = device.trim();
            if device.is_empty() {
                continue;
            }
            let path = format!("{METADATA_ROOT}/block-device-mapping/{device}");
            if let Some(value) = self.fetch_document(&path)? {
                mapping.insert(device.to_string(), value);
            }
        }
        Ok(mapping)
    }

    /// Network interfaces attached to the instance.
    pub fn network_interfaces(&self) -> Result<Vec<BlockingNetworkInterface>, MetadataError> {
        let macs = self.meta_list("network/interfaces/macs/")?;
        Ok(macs
            .iter()
            .map(|mac| mac.trim().trim_end_matches('/'))
            .filter(|mac| !mac.is_empty())
            .map(|mac| BlockingNetworkInterface::new(self.clone(), mac))
            .collect())
    }

    /// User data supplied at launch.
    pub fn user_data(&self) -> Result<Option<String>, MetadataError> {
        self.fetch_document(USER_DATA_ROOT)
    }
}

/// Blocking counterpart of [`NetworkInterface`](crate::NetworkInterface).
///
/// Lists its attribute keys once, answers unlisted keys without a request,
/// and remembers single-value attributes.
#[derive(Debug)]
pub struct BlockingNetworkInterface {
    client: BlockingEc2Metadata,
    mac: String,
    path: String,
    available_keys: Mutex<Option<Vec<String>>>,
    data: Mutex<HashMap<String, Option<String>>>,
}

impl BlockingNetworkInterface {
    pub fn new(client: BlockingEc2Metadata, mac: &str) -> Self {
        Self {
            client,
            mac: mac.to_string(),
            path: format!("{METADATA_ROOT}/network/interfaces/macs/{mac}/"),
            available_keys: Mutex::new(None),
            data: Mutex::new(HashMap::new()),
        }
    }

    /// The interface's MAC address.
    pub fn mac_address(&self) -> &str {
        &self.mac
    }

    /// Keys listed under the interface, fetched on first use.
    pub fn available_keys(&self) -> Result<Vec<String>, MetadataError> {
        let mut keys = self
            .available_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(keys) = keys.as_ref() {
            return Ok(keys.clone());
        }
        let fetched = self.client.fetch_list(&self.path)?.unwrap_or_default();
        *keys = Some(fetched.clone());
        Ok(fetched)
    }

    fn has_key(&self, key: &str) -> Result<bool, MetadataError> {
        Ok(self.available_keys()?.iter().any(|k| k == key))
    }

    /// Single-value attribute `key`, or `None` if the interface does not list it.
    pub fn attribute(&self, key: &str) -> Result<Option<String>, MetadataError> {
        let cached = self
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        if let Some(value) = cached {
            return Ok(value);
        }
        if !self.has_key(key)? {
            return Ok(None);
        }

        let value = self.client.fetch_document(&format!("{}{}", self.path, key))?;
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// List attribute `key`, or an empty list if the interface does not list it.
    pub fn list_attribute(&self, key: &str) -> Result<Vec<String>, MetadataError> {
        if !self.has_key(key)? {
            return Ok(Vec::new());
        }
        Ok(self
            .client
            .fetch_list(&format!("{}{}", self.path, key))?
            .unwrap_or_default())
    }

    pub fn owner_id(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("owner-id")
    }

    pub fn profile(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("profile")
    }

    pub fn hostname(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("local-hostname")
    }

    pub fn local_ipv4s(&self) -> Result<Vec<String>, MetadataError> {
        self.list_attribute("local-ipv4s")
    }

    pub fn public_hostname(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("public-hostname")
    }

    pub fn public_ipv4s(&self) -> Result<Vec<String>, MetadataError> {
        self.list_attribute("public-ipv4s")
    }

    pub fn security_groups(&self) -> Result<Vec<String>, MetadataError> {
        self.list_attribute("security-groups")
    }

    pub fn security_group_ids(&self) -> Result<Vec<String>, MetadataError> {
        self.list_attribute("security-group-ids")
    }

    pub fn subnet_ipv4_cidr_block(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("subnet-ipv4-cidr-block")
    }

    pub fn subnet_id(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("subnet-id")
    }

    pub fn vpc_ipv4_cidr_block(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("vpc-ipv4-cidr-block")
    }

    pub fn vpc_id(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("vpc-id")
    }

    /// Private IPv4 addresses associated with `public_ip` on this interface.
    pub fn ipv4_association(&self, public_ip: &str) -> Result<Vec<String>, MetadataError> {
        Ok(self
            .client
            .fetch_list(&format!("{}ipv4-associations/{public_ip}", self.path))?
            .unwrap_or_default())
    }
}
