//! Cache key definitions.
//!
//! A [`CacheKey`] names one cacheable unit with three levels: a `base` (the
//! kind of thing cached), an `id` and an optional `sub` discriminator for
//! items cached in parts. Backends group entries by `(namespace, base, id)`
//! so a whole group can be cleaned at once.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use super::error::{CacheError, CacheResult};

/// Base used for the secondary index written when a scope closes.
pub const COMPOSITE_BASE: &str = "cacherecursive";

/// Sub-discriminator of a [`CacheKey`].
///
/// `null`, the empty string and zero all normalize to "no sub", whichever
/// way the value is built or decoded. Structured values are identified by
/// the digest of their JSON form, which is stable because `serde_json` maps
/// keep their keys sorted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub struct Sub(Repr);

#[derive(Debug, Clone, Default)]
enum Repr {
    #[default]
    None,
    Text(String),
    Structured(JsonValue),
}

impl Sub {
    /// The absent sub.
    pub const fn none() -> Self {
        Self(Repr::None)
    }

    /// Build a sub from any serializable value.
    pub fn structured<T: Serialize>(value: &T) -> CacheResult<Self> {
        let json = serde_json::to_value(value)
            .map_err(|err| CacheError::invalid_data(format!("unserializable sub: {err}")))?;
        Ok(Self::from(json))
    }

    pub fn is_none(&self) -> bool {
        matches!(self.0, Repr::None)
    }

    pub fn is_structured(&self) -> bool {
        matches!(self.0, Repr::Structured(_))
    }

    /// Text of a plain sub.
    pub fn as_text(&self) -> Option<&str> {
        match &self.0 {
            Repr::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Identifier used by backends for this sub inside its `(base, id)` group.
    pub fn storage_id(&self) -> String {
        match &self.0 {
            Repr::None => String::new(),
            Repr::Text(text) => text.clone(),
            Repr::Structured(value) => sha256_hex(value.to_string().as_bytes()),
        }
    }

    /// Mix an extra discriminator into this sub.
    pub fn extend(&self, extra: &Sub) -> Sub {
        match (&self.0, &extra.0) {
            (_, Repr::None) => self.clone(),
            (Repr::None, _) => extra.clone(),
            (Repr::Text(base), Repr::Text(more)) => Sub(Repr::Text(format!("{base}{more}"))),
            _ => Sub(Repr::Structured(serde_json::json!({
                "sub": self.to_json(),
                "extra": extra.to_json(),
            }))),
        }
    }

    fn to_json(&self) -> JsonValue {
        match &self.0 {
            Repr::None => JsonValue::Null,
            Repr::Text(text) => JsonValue::String(text.clone()),
            Repr::Structured(value) => value.clone(),
        }
    }

    fn discriminant(&self) -> u8 {
        match self.0 {
            Repr::None => 0,
            Repr::Text(_) => 1,
            Repr::Structured(_) => 2,
        }
    }
}

impl PartialEq for Sub {
    fn eq(&self, other: &Self) -> bool {
        self.discriminant() == other.discriminant() && self.storage_id() == other.storage_id()
    }
}

impl Eq for Sub {}

impl Hash for Sub {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.discriminant().hash(state);
        self.storage_id().hash(state);
    }
}

impl fmt::Display for Sub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::None => Ok(()),
            Repr::Text(text) => f.write_str(text),
            Repr::Structured(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for Sub {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<String> for Sub {
    fn from(value: String) -> Self {
        if value.is_empty() {
            Self::none()
        } else {
            Self(Repr::Text(value))
        }
    }
}

impl From<i64> for Sub {
    fn from(value: i64) -> Self {
        if value == 0 {
            Self::none()
        } else {
            Self(Repr::Text(value.to_string()))
        }
    }
}

impl From<i32> for Sub {
    fn from(value: i32) -> Self {
        Self::from(i64::from(value))
    }
}

impl From<u32> for Sub {
    fn from(value: u32) -> Self {
        Self::from(i64::from(value))
    }
}

impl From<JsonValue> for Sub {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::none(),
            JsonValue::String(text) => Self::from(text),
            JsonValue::Number(number) if number.as_f64() == Some(0.0) => Self::none(),
            other => Self(Repr::Structured(other)),
        }
    }
}

impl From<Sub> for JsonValue {
    fn from(sub: Sub) -> Self {
        sub.to_json()
    }
}

impl<T: Into<Sub>> From<Option<T>> for Sub {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

/// Identity of a cached unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    base: String,
    id: String,
    #[serde(default)]
    sub: Sub,
}

impl CacheKey {
    pub fn new(base: impl Into<String>, id: impl fmt::Display) -> Self {
        Self {
            base: base.into(),
            id: id.to_string(),
            sub: Sub::none(),
        }
    }

    pub fn with_sub(mut self, sub: impl Into<Sub>) -> Self {
        self.sub = sub.into();
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sub(&self) -> &Sub {
        &self.sub
    }

    /// Copy of this key with `extra` mixed into its sub.
    pub fn extended(&self, extra: &Sub) -> Self {
        Self {
            base: self.base.clone(),
            id: self.id.clone(),
            sub: self.sub.extend(extra),
        }
    }

    /// Reject keys backends cannot address.
    pub fn validate(&self) -> CacheResult<()> {
        if self.base.is_empty() {
            return Err(CacheError::invalid_data("cache key base must not be empty"));
        }
        Ok(())
    }

    /// Stable digest of the key outside any namespace.
    pub fn digest(&self) -> String {
        self.digest_in("")
    }

    /// Stable digest of `(namespace, base, id, sub)`.
    pub fn digest_in(&self, namespace: &str) -> String {
        digest_parts(&[namespace, &self.base, &self.id, &self.sub.storage_id()])
    }

    /// Digest of the `(namespace, base, id)` group this key belongs to.
    pub fn group_digest(&self, namespace: &str) -> String {
        group_digest(namespace, &self.base, &self.id)
    }

    /// True when `other` names the same unit.
    pub fn clashes_with(&self, other: &CacheKey) -> bool {
        self == other
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.id)?;
        if !self.sub.is_none() {
            write!(f, "/{}", self.sub)?;
        }
        Ok(())
    }
}

// ============================================================================
// Hash Utilities
// ============================================================================

/// Digest of a `(namespace, base, id)` group.
pub fn group_digest(namespace: &str, base: &str, id: &str) -> String {
    digest_parts(&[namespace, base, id])
}

/// Key of the secondary index entry for `key` and its dependency set.
pub fn composite_key(key: &CacheKey, dependencies: &[CacheKey]) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(key.digest().as_bytes());
    for dependency in dependencies {
        hasher.update(dependency.digest().as_bytes());
    }
    CacheKey::new(COMPOSITE_BASE, hex::encode(hasher.finalize()))
}

/// Hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn digest_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        // length prefix keeps ("ab", "c") and ("a", "bc") apart
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_equality_is_structural() {
        let key1 = CacheKey::new("post", 7).with_sub("summary");
        let key2 = CacheKey::new("post", "7").with_sub("summary");
        assert_eq!(key1, key2);
        assert!(key1.clashes_with(&key2));

        assert_ne!(key1, CacheKey::new("post", 7).with_sub("body"));
        assert_ne!(key1, CacheKey::new("page", 7).with_sub("summary"));
    }

    #[test]
    fn empty_zero_and_absent_sub_are_identical() {
        let absent = CacheKey::new("page", 1);
        assert_eq!(absent, CacheKey::new("page", 1).with_sub(""));
        assert_eq!(absent, CacheKey::new("page", 1).with_sub(0));
        assert_eq!(absent, CacheKey::new("page", 1).with_sub(JsonValue::Null));
        assert_eq!(absent, CacheKey::new("page", 1).with_sub(None::<String>));
        assert_eq!(absent.digest(), CacheKey::new("page", 1).with_sub(0).digest());
    }

    #[test]
    fn decoded_empty_and_zero_subs_are_absent() {
        let absent = CacheKey::new("page", 1);
        for raw in [
            r#"{"base":"page","id":"1","sub":""}"#,
            r#"{"base":"page","id":"1","sub":0}"#,
            r#"{"base":"page","id":"1","sub":null}"#,
            r#"{"base":"page","id":"1"}"#,
        ] {
            let decoded: CacheKey = serde_json::from_str(raw).expect("decode");
            assert_eq!(decoded, absent, "{raw}");
            assert!(decoded.sub().is_none());
            assert_eq!(decoded.digest(), absent.digest());
        }

        let empty_text = Sub::from(JsonValue::String(String::new()));
        assert!(empty_text.is_none());
        assert_eq!(CacheKey::new("page", 1).with_sub(empty_text), absent);
    }

    #[test]
    fn sub_wire_form_is_the_plain_value() {
        let key = CacheKey::new("page", 1).with_sub("header");
        insta::assert_snapshot!(
            serde_json::to_string(&key).expect("encode"),
            @r#"{"base":"page","id":"1","sub":"header"}"#
        );
        insta::assert_snapshot!(
            serde_json::to_string(&CacheKey::new("page", 1)).expect("encode"),
            @r#"{"base":"page","id":"1","sub":null}"#
        );
    }

    #[test]
    fn digest_is_stable_and_deterministic() {
        let key = CacheKey::new("page", 1).with_sub("header");
        assert_eq!(key.digest(), key.clone().digest());
        assert_eq!(key.digest().len(), 64);
        // pinned so persisted digests survive refactors
        assert_eq!(
            key.digest(),
            digest_parts(&["", "page", "1", "header"])
        );
    }

    #[test]
    fn digest_separates_field_boundaries() {
        let left = CacheKey::new("ab", "c");
        let right = CacheKey::new("a", "bc");
        assert_ne!(left.digest(), right.digest());
    }

    #[test]
    fn namespace_changes_digest() {
        let key = CacheKey::new("page", 1);
        assert_ne!(key.digest_in("site-a"), key.digest_in("site-b"));
        assert_eq!(key.digest_in(""), key.digest());
    }

    #[test]
    fn structured_sub_hashes_by_content() {
        let first = Sub::structured(&serde_json::json!({"lang": "en", "page": 2})).expect("sub");
        let second = Sub::structured(&serde_json::json!({"page": 2, "lang": "en"})).expect("sub");
        assert_eq!(first, second);
        assert_eq!(first.storage_id(), second.storage_id());
        assert_eq!(first.storage_id().len(), 64);

        let other = Sub::structured(&serde_json::json!({"lang": "pt", "page": 2})).expect("sub");
        assert_ne!(first, other);
    }

    #[test]
    fn extend_concatenates_text_and_wraps_structured() {
        let text = Sub::from("list").extend(&Sub::from("-mobile"));
        assert_eq!(text.as_text(), Some("list-mobile"));

        assert_eq!(Sub::none().extend(&Sub::from("x")), Sub::from("x"));
        assert_eq!(Sub::from("x").extend(&Sub::none()), Sub::from("x"));

        let mixed = Sub::from(serde_json::json!([1, 2])).extend(&Sub::from("v"));
        assert!(mixed.is_structured());
    }

    #[test]
    fn key_serde_round_trip_keeps_sub() {
        let key = CacheKey::new("widget", 3)
            .with_sub(Sub::structured(&serde_json::json!({"theme": "dark"})).expect("sub"));
        let encoded = serde_json::to_string(&key).expect("encode");
        let decoded: CacheKey = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, key);

        let plain = CacheKey::new("widget", 3);
        let decoded: CacheKey =
            serde_json::from_str(&serde_json::to_string(&plain).expect("encode")).expect("decode");
        assert_eq!(decoded, plain);
    }

    #[test]
    fn display_omits_empty_sub() {
        insta::assert_snapshot!(
            CacheKey::new("page", 1).with_sub("header").to_string(),
            @"page/1/header"
        );
        insta::assert_snapshot!(CacheKey::new("page", 1).to_string(), @"page/1");
    }

    #[test]
    fn validate_rejects_empty_base() {
        assert!(CacheKey::new("", 1).validate().is_err());
        assert!(CacheKey::new("page", "").validate().is_ok());
    }

    #[test]
    fn composite_key_depends_on_dependencies() {
        let key = CacheKey::new("page", 1);
        let deps_a = vec![CacheKey::new("widget", 1)];
        let deps_b = vec![CacheKey::new("widget", 2)];
        let first = composite_key(&key, &deps_a);
        assert_eq!(first.base(), COMPOSITE_BASE);
        assert_eq!(first, composite_key(&key, &deps_a));
        assert_ne!(first, composite_key(&key, &deps_b));
    }
}
