//! Translation between HTTP headers and object attributes.
//!
//! Upload requests carry user attributes as `X-Attribute-<Key>` headers. Keys
//! under the reserved `Neofs-` namespace (any case) become system attributes
//! `__NEOFS__<KEY>`. Synthetic expiration attributes are turned into an
//! absolute expiration epoch before the object is stored. On download, the
//! object's attributes are projected back onto response headers.

use crate::types::{attribute_keys, Attribute, NetworkInfo, SYSTEM_ATTRIBUTE_PREFIX};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

/// Header prefix carrying user attributes.
pub const USER_ATTRIBUTE_HEADER_PREFIX: &str = "X-Attribute-";

/// Namespace (after the user prefix) mapped onto system attributes.
const SYSTEM_HEADER_PREFIX: &str = "Neofs-";

/// Attribute map keyed by attribute name.
pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttributeError {
    #[error("key duplication error: {0}")]
    Duplicate(String),

    #[error("invalid value of header {0}")]
    InvalidValue(String),

    #[error("couldn't parse value {value} of header {header}")]
    Parse { value: String, header: String },

    #[error("value {value} of header {header} must be in the future")]
    NotInFuture { value: String, header: String },

    #[error("value {value} of header {header} must be positive")]
    NotPositive { value: String, header: String },

    #[error("network reports zero epoch duration")]
    ZeroEpochDuration,
}

/// Collect `X-Attribute-*` headers into an attribute map.
///
/// Empty keys and empty values are dropped. A key seen twice is an error.
pub fn filter_headers(headers: &HeaderMap) -> Result<Attributes, AttributeError> {
    let prefix_len = USER_ATTRIBUTE_HEADER_PREFIX.len();
    let mut result = Attributes::new();

    for (name, value) in headers {
        let name = name.as_str();
        if name.len() <= prefix_len
            || !name[..prefix_len].eq_ignore_ascii_case(USER_ATTRIBUTE_HEADER_PREFIX)
        {
            continue;
        }
        let value = std::str::from_utf8(value.as_bytes())
            .map_err(|_| AttributeError::InvalidValue(canonical_header_key(name)))?;
        if value.is_empty() {
            continue;
        }

        let key = attribute_key(&name[prefix_len..]);
        if result.contains_key(&key) {
            return Err(AttributeError::Duplicate(canonical_header_key(name)));
        }
        result.insert(key, value.to_string());
    }

    Ok(result)
}

/// Attribute key for a header name with the user prefix stripped.
fn attribute_key(raw: &str) -> String {
    let prefix_len = SYSTEM_HEADER_PREFIX.len();
    if raw.len() > prefix_len && raw[..prefix_len].eq_ignore_ascii_case(SYSTEM_HEADER_PREFIX) {
        format!(
            "{}{}",
            SYSTEM_ATTRIBUTE_PREFIX,
            raw[prefix_len..].replace('-', "_").to_ascii_uppercase()
        )
    } else {
        canonical_header_key(raw)
    }
}

/// `__NEOFS__EXPIRATION_EPOCH` -> `Neofs-Expiration-Epoch`.
fn system_header_key(key: &str) -> String {
    let mut out = String::from("Neofs");
    for word in key[SYSTEM_ATTRIBUTE_PREFIX.len()..].split('_') {
        out.push('-');
        out.push_str(&canonical_header_key(word));
    }
    out
}

/// MIME-style canonical form of a header key: the first letter and every
/// letter following a hyphen are upper-cased, the rest lower-cased. Keys with
/// characters outside the token set are returned unchanged.
pub fn canonical_header_key(key: &str) -> String {
    if !key.bytes().all(|b| is_token_byte(b) || b == b' ') {
        return key.to_string();
    }
    let mut upper = true;
    key.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

fn is_token_byte(b: u8) -> bool {
    b > b' ' && b < 0x7f && !b"()<>@,;:\\\"/[]?={}".contains(&b)
}

/// Whether `key` can be emitted as an HTTP header name without escaping.
pub fn is_valid_token(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(is_token_byte)
}

/// Whether `value` can be emitted as a header value without escaping.
pub fn is_valid_value(value: &str) -> bool {
    value.bytes().all(|b| (b' '..0x7f).contains(&b) && b != b'"')
}

/// Whether any synthetic expiration attribute is present.
pub fn needs_expiration(attributes: &Attributes) -> bool {
    [
        attribute_keys::EXPIRATION_RFC3339,
        attribute_keys::EXPIRATION_TIMESTAMP,
        attribute_keys::EXPIRATION_DURATION,
    ]
    .iter()
    .any(|key| attributes.contains_key(*key))
}

/// Replace synthetic expiration attributes with an absolute expiration epoch.
///
/// RFC 3339, Unix timestamp and duration inputs are processed in that order,
/// each overwriting the previous result. An expiration epoch set explicitly
/// by the client is kept. The synthetic inputs are always removed.
pub fn prepare_expiration(
    attributes: &mut Attributes,
    network: &NetworkInfo,
    now: DateTime<Utc>,
) -> Result<(), AttributeError> {
    let explicit = attributes.get(attribute_keys::EXPIRATION_EPOCH).cloned();

    if let Some(value) = attributes.remove(attribute_keys::EXPIRATION_RFC3339) {
        let header = attribute_keys::EXPIRATION_RFC3339;
        let at = DateTime::parse_from_rfc3339(&value)
            .map_err(|_| parse_error(&value, header))?
            .with_timezone(&Utc);
        let delta = future_delta_ms(at, now, &value, header)?;
        set_expiration_epoch(attributes, network, delta)?;
    }

    if let Some(value) = attributes.remove(attribute_keys::EXPIRATION_TIMESTAMP) {
        let header = attribute_keys::EXPIRATION_TIMESTAMP;
        let at = value
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| parse_error(&value, header))?;
        let delta = future_delta_ms(at, now, &value, header)?;
        set_expiration_epoch(attributes, network, delta)?;
    }

    if let Some(value) = attributes.remove(attribute_keys::EXPIRATION_DURATION) {
        let header = attribute_keys::EXPIRATION_DURATION;
        let duration =
            humantime::parse_duration(&value).map_err(|_| parse_error(&value, header))?;
        if duration.is_zero() {
            return Err(AttributeError::NotPositive {
                value,
                header: header.to_string(),
            });
        }
        let delta = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        set_expiration_epoch(attributes, network, delta)?;
    }

    if let Some(epoch) = explicit {
        attributes.insert(attribute_keys::EXPIRATION_EPOCH.to_string(), epoch);
    }
    Ok(())
}

fn parse_error(value: &str, header: &str) -> AttributeError {
    AttributeError::Parse {
        value: value.to_string(),
        header: header.to_string(),
    }
}

fn future_delta_ms(
    at: DateTime<Utc>,
    now: DateTime<Utc>,
    value: &str,
    header: &str,
) -> Result<i64, AttributeError> {
    if at <= now {
        return Err(AttributeError::NotInFuture {
            value: value.to_string(),
            header: header.to_string(),
        });
    }
    Ok((at - now).num_milliseconds())
}

fn set_expiration_epoch(
    attributes: &mut Attributes,
    network: &NetworkInfo,
    delta_ms: i64,
) -> Result<(), AttributeError> {
    let epoch_ms = network.epoch_duration_ms();
    if epoch_ms <= 0 {
        return Err(AttributeError::ZeroEpochDuration);
    }
    let epochs = (delta_ms / epoch_ms) as u64;
    attributes.insert(
        attribute_keys::EXPIRATION_EPOCH.to_string(),
        network.current_epoch.saturating_add(epochs).to_string(),
    );
    Ok(())
}

/// Add `FileName` and, when enabled, `Timestamp` unless already present.
pub fn add_default_attributes(
    attributes: &mut Attributes,
    file_name: &str,
    use_default_timestamp: bool,
    now: DateTime<Utc>,
) {
    if !file_name.is_empty() {
        attributes
            .entry(attribute_keys::FILE_NAME.to_string())
            .or_insert_with(|| file_name.to_string());
    }
    if use_default_timestamp {
        attributes
            .entry(attribute_keys::TIMESTAMP.to_string())
            .or_insert_with(|| now.timestamp().to_string());
    }
}

/// Attribute list for an object header.
pub fn to_attribute_list(attributes: Attributes) -> Vec<Attribute> {
    attributes
        .into_iter()
        .map(|(key, value)| Attribute { key, value })
        .collect()
}

/// Headers derived from an object's attributes on download.
#[derive(Debug, Default)]
pub struct Projection {
    pub headers: HeaderMap,
    pub file_name: Option<String>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

/// Project object attributes onto response headers.
///
/// Attributes whose key or value would need escaping are skipped.
pub fn project_attributes(attributes: &[Attribute]) -> Projection {
    let mut projection = Projection::default();

    for Attribute { key, value } in attributes {
        if !is_valid_token(key) || !is_valid_value(value) {
            continue;
        }
        let header_key = if key.starts_with(SYSTEM_ATTRIBUTE_PREFIX) {
            system_header_key(key)
        } else {
            key.clone()
        };
        let name = HeaderName::from_bytes(
            format!("{}{}", USER_ATTRIBUTE_HEADER_PREFIX, header_key).as_bytes(),
        );
        if let (Ok(name), Ok(header_value)) = (name, HeaderValue::from_str(value)) {
            projection.headers.insert(name, header_value);
        }

        match key.as_str() {
            attribute_keys::FILE_NAME => projection.file_name = Some(value.clone()),
            attribute_keys::TIMESTAMP => match value.parse::<i64>() {
                Ok(secs) => {
                    projection.last_modified = Utc
                        .timestamp_opt(secs, 0)
                        .single()
                        .map(|t| t.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
                }
                Err(err) => tracing::info!("couldn't parse creation date {:?}: {}", value, err),
            },
            attribute_keys::CONTENT_TYPE => projection.content_type = Some(value.clone()),
            _ => {}
        }
    }

    projection
}
