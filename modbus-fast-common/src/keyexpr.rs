//! Key expressions used by the poller daemon.
//!
//! ```text
//! <prefix>/<device>/<register_type>/<point>    point samples
//! <prefix>/<device>/@/availability             device connectivity
//! <prefix>/@/status                            daemon status
//! ```

use crate::error::{Error, Result};

/// Default key expression prefix.
pub const KEY_PREFIX: &str = "modbus_fast";

/// Builder for modbus-fast key expressions scoped to one device.
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
    device: String,
}

impl KeyExprBuilder {
    /// Create a builder for a device under the default prefix.
    pub fn new(device: impl Into<String>) -> Self {
        Self::with_prefix(KEY_PREFIX, device)
    }

    /// Create a builder with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
            device: sanitize(&device.into()),
        }
    }

    /// The sanitized device segment.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Key for one point.
    ///
    /// # Example
    /// ```
    /// use modbus_fast_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::new("plc01");
    /// assert_eq!(builder.point("coil", "C12"), "modbus_fast/plc01/coil/C12");
    /// ```
    pub fn point(&self, register_type: &str, point: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.prefix, self.device, register_type, point
        )
    }

    /// Key carrying the device's connectivity.
    ///
    /// # Example
    /// ```
    /// use modbus_fast_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::new("plc01");
    /// assert_eq!(builder.availability(), "modbus_fast/plc01/@/availability");
    /// ```
    pub fn availability(&self) -> String {
        format!("{}/{}/@/availability", self.prefix, self.device)
    }

    /// Wildcard matching every point of the device.
    pub fn device_wildcard(&self) -> String {
        format!("{}/{}/**", self.prefix, self.device)
    }

    /// Key carrying the daemon status.
    pub fn status(&self) -> String {
        format!("{}/@/status", self.prefix)
    }
}

/// Replace characters Zenoh reserves in key expressions.
///
/// Display names such as "Modbus Fast" become "Modbus_Fast".
pub fn sanitize(segment: &str) -> String {
    let cleaned: String = segment
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '*' | '$' | '?' | '#' | '@' | ' ' => '_',
            other => other,
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// A point key split into its segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeyExpr {
    pub device: String,
    pub register_type: String,
    pub point: String,
}

/// Parse a point key expression produced by [`KeyExprBuilder::point`].
pub fn parse_key_expr(prefix: &str, key: &str) -> Result<ParsedKeyExpr> {
    let rest = key
        .strip_prefix(prefix.trim_end_matches('/'))
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| Error::KeyExpr(format!("'{}' is not under '{}'", key, prefix)))?;

    let parts: Vec<&str> = rest.split('/').collect();
    match parts.as_slice() {
        [device, register_type, point]
            if !device.is_empty() && *register_type != "@" && !point.is_empty() =>
        {
            Ok(ParsedKeyExpr {
                device: device.to_string(),
                register_type: register_type.to_string(),
                point: point.to_string(),
            })
        }
        _ => Err(Error::KeyExpr(format!(
            "'{}' is not a point key (expected <prefix>/<device>/<type>/<point>)",
            key
        ))),
    }
}
