//! Normalizes the payloads of the notifications the relay understands.
//!
//! Three producers are supported:
//! - neutron port events: `{"port": {"device_id": .., "fixed_ips": [{"ip_address": ..}]}}`
//! - versioned nova events: `{"nova_object.data": {"uuid": ..}}`
//! - legacy nova events: `{"instance_id": ..}`
//!
//! Each shape is decoded independently and merged in that order, so a later shape
//! overwrites the resource key found by an earlier one.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ExtractError {
    #[error("no resource key in payload, ip addresses: {ip_addresses:?}")]
    MissingResourceKey { ip_addresses: Option<Vec<String>> },
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// The data forwarded to the API for one notification.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedParams {
    resource_key: String,
    ip_addresses: Option<Vec<String>>,
}

impl ExtractedParams {
    pub fn new<K>(resource_key: K, ip_addresses: Option<Vec<String>>) -> Result<Self, ExtractError>
    where
        K: Into<String>,
    {
        let resource_key = resource_key.into();
        if resource_key.is_empty() {
            return Err(ExtractError::MissingResourceKey { ip_addresses });
        }

        Ok(ExtractedParams {
            resource_key,
            ip_addresses,
        })
    }

    pub fn resource_key(&self) -> &str {
        &self.resource_key
    }

    pub fn ip_addresses(&self) -> Option<&[String]> {
        self.ip_addresses.as_deref()
    }
}

#[derive(Deserialize)]
struct PortPayload {
    #[serde(default, deserialize_with = "falsy_as_none")]
    port: Option<Port>,
}

#[derive(Deserialize)]
struct Port {
    #[serde(default, deserialize_with = "falsy_as_none")]
    device_id: Option<String>,
    #[serde(default, deserialize_with = "falsy_as_none")]
    fixed_ips: Option<Vec<FixedIp>>,
}

#[derive(Deserialize)]
struct FixedIp {
    #[serde(default, deserialize_with = "falsy_as_none")]
    ip_address: Option<String>,
}

#[derive(Deserialize)]
struct NovaObjectPayload {
    #[serde(rename = "nova_object.data", default, deserialize_with = "falsy_as_none")]
    data: Option<NovaObjectData>,
}

#[derive(Deserialize)]
struct NovaObjectData {
    #[serde(default, deserialize_with = "falsy_as_none")]
    uuid: Option<String>,
}

#[derive(Deserialize)]
struct InstancePayload {
    #[serde(default, deserialize_with = "falsy_as_none")]
    instance_id: Option<String>,
}

fn decode<'a, T>(payload: &'a Value) -> Result<T, ExtractError>
where
    T: Deserialize<'a>,
{
    T::deserialize(payload).map_err(|e| ExtractError::Malformed(e.to_string()))
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

// null, false, 0, "", [] and {} read as an absent field. Any other value must
// decode as T.
fn falsy_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if is_falsy(&value) {
        return Ok(None);
    }
    T::deserialize(value).map(Some).map_err(D::Error::custom)
}

/// Extracts the resource key and the ip addresses from a notification payload.
///
/// Missing and falsy (`null`, `false`, `0`, `""`, `[]`, `{}`) fields are treated as
/// absent. Fields holding the wrong JSON type fail
/// with [`ExtractError::Malformed`].
pub fn extract(payload: &Value) -> Result<ExtractedParams, ExtractError> {
    if !payload.is_object() {
        return Err(ExtractError::Malformed(format!(
            "payload should be an object, not {payload}"
        )));
    }

    let mut resource_key = None;
    let mut ip_addresses = None;

    if let Some(port) = decode::<PortPayload>(payload)?.port {
        match port.device_id {
            Some(device_id) => resource_key = Some(device_id),
            None => tracing::warn!("port payload without device_id"),
        }

        match port.fixed_ips {
            Some(fixed_ips) => {
                let ips: Vec<String> = fixed_ips
                    .into_iter()
                    .filter_map(|fixed_ip| fixed_ip.ip_address)
                    .collect();
                if ips.is_empty() {
                    tracing::warn!("port payload with no ip_address in fixed_ips");
                } else {
                    ip_addresses = Some(ips);
                }
            }
            None => tracing::warn!("port payload without fixed_ips"),
        }
    }

    if let Some(data) = decode::<NovaObjectPayload>(payload)?.data {
        match data.uuid {
            Some(uuid) => resource_key = Some(uuid),
            None => tracing::warn!("nova object payload without uuid"),
        }
    }

    if let Some(instance_id) = decode::<InstancePayload>(payload)?.instance_id {
        resource_key = Some(instance_id);
    }

    if ip_addresses.is_none() {
        tracing::warn!("no ip addresses in payload");
    }

    let Some(resource_key) = resource_key else {
        tracing::error!("no resource key in payload");
        return Err(ExtractError::MissingResourceKey { ip_addresses });
    };

    let params = ExtractedParams::new(resource_key, ip_addresses)?;
    tracing::debug!(?params, "payload extracted");
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const UUID: &str = "12345678-1234-5678-1234-567812345678";
    const OTHER_UUID: &str = "87654321-4321-8765-4321-876543218765";

    #[test]
    fn test_neutron_port() {
        let payload = json!({
            "port": {
                "device_id": UUID,
                "fixed_ips": [
                    {"ip_address": "172.16.0.1", "subnet_id": "x"},
                    {"ip_address": "fe80::1"},
                ],
                "status": "DOWN",
            }
        });

        let params = extract(&payload).unwrap();
        assert_eq!(params.resource_key(), UUID);
        assert_eq!(
            params.ip_addresses(),
            Some(&["172.16.0.1".to_string(), "fe80::1".to_string()][..])
        );
    }

    #[test]
    fn test_nova_object() {
        let payload = json!({
            "nova_object.data": {"uuid": UUID, "host": "compute1"},
            "nova_object.version": "1.5",
        });

        let params = extract(&payload).unwrap();
        assert_eq!(params.resource_key(), UUID);
        assert_eq!(params.ip_addresses(), None);
    }

    #[test]
    fn test_instance_id() {
        let params = extract(&json!({"instance_id": UUID})).unwrap();
        assert_eq!(params, ExtractedParams::new(UUID, None).unwrap());
    }

    #[test]
    fn test_later_shapes_overwrite_resource_key() {
        let payload = json!({
            "port": {"device_id": OTHER_UUID, "fixed_ips": [{"ip_address": "10.0.0.1"}]},
            "instance_id": UUID,
        });
        let params = extract(&payload).unwrap();
        assert_eq!(params.resource_key(), UUID);
        assert_eq!(params.ip_addresses(), Some(&["10.0.0.1".to_string()][..]));

        let payload = json!({
            "port": {"device_id": OTHER_UUID},
            "nova_object.data": {"uuid": UUID},
        });
        assert_eq!(extract(&payload).unwrap().resource_key(), UUID);
    }

    #[test]
    fn test_fixed_ips_without_addresses() {
        let payload = json!({
            "port": {
                "device_id": UUID,
                "fixed_ips": [{"subnet_id": "a"}, {"ip_address": ""}, {"ip_address": null}],
            }
        });
        let params = extract(&payload).unwrap();
        assert_eq!(params.ip_addresses(), None);

        let payload = json!({"port": {"device_id": UUID, "fixed_ips": []}});
        assert_eq!(extract(&payload).unwrap().ip_addresses(), None);
    }

    #[test]
    fn test_missing_resource_key() {
        assert_eq!(
            extract(&json!({"event": "compute.instance.delete.end"})).unwrap_err(),
            ExtractError::MissingResourceKey { ip_addresses: None }
        );

        // Empty identifiers count as missing.
        assert_eq!(
            extract(&json!({"instance_id": "", "nova_object.data": {"uuid": ""}})).unwrap_err(),
            ExtractError::MissingResourceKey { ip_addresses: None }
        );

        // The addresses found so far are kept for diagnostics.
        let payload = json!({"port": {"fixed_ips": [{"ip_address": "10.0.0.1"}]}});
        assert_eq!(
            extract(&payload).unwrap_err(),
            ExtractError::MissingResourceKey {
                ip_addresses: Some(vec!["10.0.0.1".into()])
            }
        );

        assert!(matches!(
            ExtractedParams::new("", None),
            Err(ExtractError::MissingResourceKey { .. })
        ));
    }

    #[test]
    fn test_null_fields_are_absent() {
        let payload = json!({"port": null, "nova_object.data": null, "instance_id": UUID});
        assert_eq!(extract(&payload).unwrap().resource_key(), UUID);

        // Other falsy values are skipped the same way.
        for falsy in [json!(false), json!(""), json!(0), json!([]), json!({})] {
            let payload = json!({"port": falsy, "nova_object.data": falsy, "instance_id": UUID});
            let params = extract(&payload).unwrap();
            assert_eq!(params.resource_key(), UUID, "{payload}");
            assert_eq!(params.ip_addresses(), None);
        }

        let payload = json!({
            "port": {"device_id": false, "fixed_ips": 0},
            "nova_object.data": {"uuid": UUID},
        });
        assert_eq!(extract(&payload).unwrap().resource_key(), UUID);

        assert_eq!(
            extract(&json!({"instance_id": false})).unwrap_err(),
            ExtractError::MissingResourceKey { ip_addresses: None }
        );
    }

    #[test]
    fn test_malformed_payload() {
        let malformed = [
            json!("port"),
            json!(null),
            json!([{"instance_id": UUID}]),
            json!({"port": "device"}),
            json!({"port": true, "instance_id": UUID}),
            json!({"port": {"device_id": UUID, "fixed_ips": ["10.0.0.1"]}}),
            json!({"instance_id": 42}),
            json!({"nova_object.data": {"uuid": ["a"]}}),
        ];

        for payload in malformed {
            assert!(
                matches!(extract(&payload), Err(ExtractError::Malformed(_))),
                "{payload} should be malformed"
            );
        }
    }

    #[test]
    fn test_extract_is_idempotent() {
        let payload = json!({
            "port": {"device_id": UUID, "fixed_ips": [{"ip_address": "10.0.0.1"}]}
        });
        assert_eq!(extract(&payload), extract(&payload));
    }
}
