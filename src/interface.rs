//! Per-interface metadata accessor.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::OnceCell;

use crate::error::MetadataError;
use crate::metadata::{Ec2Metadata, METADATA_ROOT};

/// All of the metadata associated with one network interface.
///
/// The set of attribute keys the interface exposes is listed once per
/// handle; attributes outside that set are answered locally without a
/// request. Single-value attributes are remembered on the handle.
#[derive(Debug)]
pub struct NetworkInterface {
    client: Ec2Metadata,
    mac: String,
    path: String,
    available_keys: OnceCell<Vec<String>>,
    data: Mutex<HashMap<String, Option<String>>>,
}

impl NetworkInterface {
    pub fn new(client: Ec2Metadata, mac: &str) -> Self {
        Self {
            client,
            mac: mac.to_string(),
            path: format!("{METADATA_ROOT}/network/interfaces/macs/{mac}/"),
            available_keys: OnceCell::new(),
            data: Mutex::new(HashMap::new()),
        }
    }

    /// The interface's MAC address.
    pub fn mac_address(&self) -> &str {
        &self.mac
    }

    /// Keys listed under the interface, fetched on first use.
    pub async fn available_keys(&self) -> Result<&[String], MetadataError> {
        let keys = self
            .available_keys
            .get_or_try_init(|| async {
                Ok::<_, MetadataError>(self.client.fetch_list(&self.path).await?.unwrap_or_default())
            })
            .await?;
        Ok(keys)
    }

    async fn has_key(&self, key: &str) -> Result<bool, MetadataError> {
        Ok(self.available_keys().await?.iter().any(|k| k == key))
    }

    /// Single-value attribute `key`, or `None` if the interface does not list it.
    pub async fn attribute(&self, key: &str) -> Result<Option<String>, MetadataError> {
        if let Some(value) = self.cached(key) {
            return Ok(value);
        }
        if !self.has_key(key).await? {
            return Ok(None);
        }

        let value = self
            .client
            .fetch_document(&format!("{}{}", self.path, key))
            .await?;
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// List attribute `key`, or an empty list if the interface does not list it.
    pub async fn list_attribute(&self, key: &str) -> Result<Vec<String>, MetadataError> {
        if !self.has_key(key).await? {
            return Ok(Vec::new());
        }
        Ok(self
            .client
            .fetch_list(&format!("{}{}", self.path, key))
            .await?
            .unwrap_or_default())
    }

    fn cached(&self, key: &str) -> Option<Option<String>> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// ID of the interface owner. An interface attached by a third party
    /// (e.g. a load balancer) is billed to that owner.
    pub async fn owner_id(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("owner-id").await
    }

    pub async fn profile(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("profile").await
    }

    pub async fn hostname(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("local-hostname").await
    }

    /// Private IPv4 addresses associated with the interface.
    pub async fn local_ipv4s(&self) -> Result<Vec<String>, MetadataError> {
        self.list_attribute("local-ipv4s").await
    }

    pub async fn public_hostname(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("public-hostname").await
    }

    /// Elastic IP addresses associated with the interface.
    pub async fn public_ipv4s(&self) -> Result<Vec<String>, MetadataError> {
        self.list_attribute("public-ipv4s").await
    }

    pub async fn security_groups(&self) -> Result<Vec<String>, MetadataError> {
        self.list_attribute("security-groups").await
    }

    /// Only present for instances launched into a VPC.
    pub async fn security_group_ids(&self) -> Result<Vec<String>, MetadataError> {
        self.list_attribute("security-group-ids").await
    }

    pub async fn subnet_ipv4_cidr_block(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("subnet-ipv4-cidr-block").await
    }

    pub async fn subnet_id(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("subnet-id").await
    }

    pub async fn vpc_ipv4_cidr_block(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("vpc-ipv4-cidr-block").await
    }

    pub async fn vpc_id(&self) -> Result<Option<String>, MetadataError> {
        self.attribute("vpc-id").await
    }

    /// Private IPv4 addresses associated with `public_ip` on this interface.
    /// Fetched directly, without consulting the key listing.
    pub async fn ipv4_association(&self, public_ip: &str) -> Result<Vec<String>, MetadataError> {
        Ok(self
            .client
            .fetch_list(&format!("{}ipv4-associations/{public_ip}", self.path))
            .await?
            .unwrap_or_default())
    }
}
