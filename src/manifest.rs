//! TVBox manifest types.
//!
//! These mirror the JSON schema the TVBox client expects, field for field.
//! Elements are deserialised leniently: every field is optional on input, and
//! integer fields accept either a number or a numeric string (see
//! [`FlexInt`]).

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// An integer that may arrive as `1`, `"1"` or `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlexInt(pub i64);

impl FlexInt {
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<i64> for FlexInt {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Serialize for FlexInt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for FlexInt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FlexIntVisitor;

        impl<'de> Visitor<'de> for FlexIntVisitor {
            type Value = FlexInt;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an integer or a string containing an integer")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<FlexInt, E> {
                Ok(FlexInt(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<FlexInt, E> {
                i64::try_from(v)
                    .map(FlexInt)
                    .map_err(|_| E::custom(format!("integer {v} is out of range")))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<FlexInt, E> {
                if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
                    Ok(FlexInt(v as i64))
                } else {
                    Err(E::custom(format!("{v} is not an integer")))
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<FlexInt, E> {
                v.trim()
                    .parse::<i64>()
                    .map(FlexInt)
                    .map_err(|_| E::custom(format!("{v:?} is not an integer")))
            }

            fn visit_unit<E: de::Error>(self) -> Result<FlexInt, E> {
                Ok(FlexInt(0))
            }
        }

        deserializer.deserialize_any(FlexIntVisitor)
    }
}

/// The `ext` field of a site or parser: a plain string (often a relative URL)
/// or any other JSON value, passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ext {
    Text(String),
    Json(serde_json::Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Site {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FlexInt,
    pub api: String,
    pub searchable: FlexInt,
    #[serde(rename = "quickSearch")]
    pub quick_search: FlexInt,
    pub filterable: FlexInt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Ext>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub jar: String,
    #[serde(rename = "playerType", skip_serializing_if = "FlexInt::is_zero")]
    pub player_type: FlexInt,
    #[serde(skip_serializing_if = "FlexInt::is_zero")]
    pub changeable: FlexInt,
    #[serde(skip_serializing_if = "FlexInt::is_zero")]
    pub timeout: FlexInt,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Doh {
    pub name: String,
    pub url: String,
    pub ips: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Live {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FlexInt,
    pub url: String,
    #[serde(rename = "playerType")]
    pub player_type: FlexInt,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ua: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub epg: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub logo: String,
    #[serde(skip_serializing_if = "FlexInt::is_zero")]
    pub timeout: FlexInt,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parse {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FlexInt,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Ext>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    pub name: String,
    pub hosts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub regex: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<String>,
}

/// The mixed single-repo document served at `/v1/repo`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoDocument {
    pub spider: String,
    pub lives: Vec<Live>,
    pub wallpaper: String,
    pub sites: Vec<Site>,
    pub parses: Vec<Parse>,
    pub flags: Vec<String>,
    pub doh: Vec<Doh>,
    pub rules: Vec<Rule>,
    pub ads: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub logo: String,
}

/// One entry of a multi-repo index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoUrl {
    pub url: String,
    pub name: String,
}

impl RepoUrl {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
        }
    }
}

/// The multi-repo index served at `/v1/multi_repo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiRepoDocument {
    #[serde(rename = "urls", default)]
    pub repos: Vec<RepoUrl>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flex_int_accepts_numbers_strings_and_null() {
        let parsed: Vec<FlexInt> =
            serde_json::from_value(json!([3, "4", " 5 ", null, 6.0])).unwrap();
        assert_eq!(parsed, vec![FlexInt(3), FlexInt(4), FlexInt(5), FlexInt(0), FlexInt(6)]);
    }

    #[test]
    fn flex_int_rejects_garbage() {
        assert!(serde_json::from_value::<FlexInt>(json!("abc")).is_err());
        assert!(serde_json::from_value::<FlexInt>(json!(1.5)).is_err());
        assert!(serde_json::from_value::<FlexInt>(json!({"a": 1})).is_err());
    }

    #[test]
    fn flex_int_serializes_as_number() {
        assert_eq!(serde_json::to_value(FlexInt(7)).unwrap(), json!(7));
    }

    #[test]
    fn site_reads_string_typed_integers() {
        let site: Site = serde_json::from_value(json!({
            "key": "site1",
            "name": "Site 1",
            "type": "3",
            "api": "csp_Demo",
            "searchable": 1,
            "quickSearch": "0",
            "filterable": 1,
            "playerType": "2"
        }))
        .unwrap();

        assert_eq!(site.kind, FlexInt(3));
        assert_eq!(site.quick_search, FlexInt(0));
        assert_eq!(site.player_type, FlexInt(2));
        assert!(site.ext.is_none());
    }

    #[test]
    fn ext_keeps_strings_and_objects_apart() {
        let text: Site = serde_json::from_value(json!({"key": "a", "ext": "./ext.json"})).unwrap();
        assert_eq!(text.ext, Some(Ext::Text("./ext.json".into())));

        let object: Site =
            serde_json::from_value(json!({"key": "b", "ext": {"box": [1, 2]}})).unwrap();
        assert_eq!(object.ext, Some(Ext::Json(json!({"box": [1, 2]}))));
    }

    #[test]
    fn site_omits_empty_optional_fields() {
        let site = Site {
            key: "a".into(),
            ..Site::default()
        };
        let value = serde_json::to_value(&site).unwrap();
        let object = value.as_object().unwrap();

        for present in ["key", "name", "type", "api", "searchable", "quickSearch", "filterable"] {
            assert!(object.contains_key(present), "missing {present}");
        }
        for absent in ["ext", "jar", "playerType", "changeable", "timeout"] {
            assert!(!object.contains_key(absent), "unexpected {absent}");
        }
    }

    #[test]
    fn repo_document_serializes_empty_lists_not_null() {
        let value = serde_json::to_value(RepoDocument::default()).unwrap();
        assert_eq!(value["sites"], json!([]));
        assert_eq!(value["ads"], json!([]));
        assert!(value.get("logo").is_none());
    }

    #[test]
    fn multi_repo_document_uses_urls_key() {
        let doc = MultiRepoDocument {
            repos: vec![RepoUrl::new("n1", "u1")],
        };
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({"urls": [{"url": "u1", "name": "n1"}]})
        );
    }

    #[test]
    fn rule_round_trips_through_manifest_json() {
        let rule: Rule = serde_json::from_value(json!({
            "name": "Rule 1",
            "hosts": ["example.com"],
            "regex": ["pattern1", "pattern2"]
        }))
        .unwrap();
        assert_eq!(rule.hosts, vec!["example.com"]);
        assert_eq!(rule.regex.len(), 2);
        assert!(rule.script.is_empty());
    }
}
