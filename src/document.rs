//! Instance identity document.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Fields of the instance identity document.
///
/// Extraction is best-effort: a field that is missing or has the wrong JSON
/// type is `None` rather than an error. Array fields keep only their string
/// elements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentityDocument {
    pub pending_time: Option<String>,
    pub instance_type: Option<String>,
    pub image_id: Option<String>,
    pub instance_id: Option<String>,
    pub billing_products: Option<Vec<String>>,
    pub architecture: Option<String>,
    pub account_id: Option<String>,
    pub kernel_id: Option<String>,
    pub ramdisk_id: Option<String>,
    pub region: Option<String>,
    pub version: Option<String>,
    pub availability_zone: Option<String>,
    pub private_ip: Option<String>,
    pub devpay_product_codes: Option<Vec<String>>,
    pub marketplace_product_codes: Option<Vec<String>>,
}

impl InstanceIdentityDocument {
    /// Parse a document. Returns `None` (and logs) if `json` is not a JSON object.
    pub fn parse(json: &str) -> Option<Self> {
        let fields = match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => {
                warn!(json, "unable to parse EC2 instance info: not a JSON object");
                return None;
            }
            Err(e) => {
                warn!(json, error = %e, "unable to parse EC2 instance info");
                return None;
            }
        };

        Some(Self {
            pending_time: string_field(&fields, "pendingTime"),
            instance_type: string_field(&fields, "instanceType"),
            image_id: string_field(&fields, "imageId"),
            instance_id: string_field(&fields, "instanceId"),
            billing_products: string_array_field(&fields, "billingProducts"),
            architecture: string_field(&fields, "architecture"),
            account_id: string_field(&fields, "accountId"),
            kernel_id: string_field(&fields, "kernelId"),
            ramdisk_id: string_field(&fields, "ramdiskId"),
            region: string_field(&fields, "region"),
            version: string_field(&fields, "version"),
            availability_zone: string_field(&fields, "availabilityZone"),
            private_ip: string_field(&fields, "privateIp"),
            devpay_product_codes: string_array_field(&fields, "devpayProductCodes"),
            marketplace_product_codes: string_array_field(&fields, "marketplaceProductCodes"),
        })
    }
}

/// Pull only the `region` field out of a document, leaving the rest unread.
pub fn region_from(json: &str) -> Option<String> {
    let parsed = match serde_json::from_str::<Value>(json) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(json, error = %e, "unable to parse EC2 instance info");
            return None;
        }
    };

    match parsed.get("region").and_then(Value::as_str) {
        Some(region) => Some(region.to_string()),
        None => {
            warn!(json, "region not included in EC2 instance info");
            None
        }
    }
}

fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields.get(name).and_then(Value::as_str).map(str::to_string)
}

fn string_array_field(fields: &Map<String, Value>, name: &str) -> Option<Vec<String>> {
    let items = fields.get(name)?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "accountId": "123456789012",
        "architecture": "x86_64",
        "availabilityZone": "us-east-1a",
        "billingProducts": null,
        "devpayProductCodes": ["dp-1", 7, "dp-2"],
        "marketplaceProductCodes": "not-an-array",
        "imageId": "ami-0abcdef1234567890",
        "instanceId": "i-1234567890abcdef0",
        "instanceType": "t3.micro",
        "kernelId": null,
        "pendingTime": "2024-01-01T00:00:00Z",
        "privateIp": "10.0.0.12",
        "ramdiskId": null,
        "region": "us-east-1",
        "version": "2017-09-30"
    }"#;

    #[test]
    fn test_parse_document() {
        let doc = InstanceIdentityDocument::parse(DOCUMENT).unwrap();
        assert_eq!(doc.account_id.as_deref(), Some("123456789012"));
        assert_eq!(doc.region.as_deref(), Some("us-east-1"));
        assert_eq!(doc.availability_zone.as_deref(), Some("us-east-1a"));
        assert_eq!(doc.instance_type.as_deref(), Some("t3.micro"));
        assert_eq!(doc.kernel_id, None);
        assert_eq!(doc.billing_products, None);
    }

    #[test]
    fn test_wrong_shapes_are_omitted() {
        let doc = InstanceIdentityDocument::parse(DOCUMENT).unwrap();
        assert_eq!(
            doc.devpay_product_codes,
            Some(vec!["dp-1".to_string(), "dp-2".to_string()])
        );
        assert_eq!(doc.marketplace_product_codes, None);

        let doc = InstanceIdentityDocument::parse(r#"{"instanceId": 42}"#).unwrap();
        assert_eq!(doc.instance_id, None);
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert_eq!(InstanceIdentityDocument::parse("not json"), None);
        assert_eq!(InstanceIdentityDocument::parse("[1, 2]"), None);
        assert_eq!(
            InstanceIdentityDocument::parse("{}"),
            Some(InstanceIdentityDocument::default())
        );
    }

    #[test]
    fn test_region_from() {
        assert_eq!(region_from(DOCUMENT).as_deref(), Some("us-east-1"));
        assert_eq!(region_from(r#"{"accountId": "1"}"#), None);
        assert_eq!(region_from(r#"{"region": 5}"#), None);
        assert_eq!(region_from("{broken"), None);
    }

    #[test]
    fn test_serializes_camel_case() {
        let doc = InstanceIdentityDocument {
            region: Some("eu-west-1".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["region"], "eu-west-1");
        assert!(json.get("availabilityZone").is_some());
    }
}
