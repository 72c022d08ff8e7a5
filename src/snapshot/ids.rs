//! Serde helpers for ids exported as decimal strings

use super::EntityId;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn into_id<E: serde::de::Error>(self) -> Result<EntityId, E> {
        match self {
            RawId::Number(n) => Ok(n),
            RawId::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid numeric id: {s:?}"))),
        }
    }
}

pub fn serialize<S: Serializer>(id: &EntityId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<EntityId, D::Error> {
    RawId::deserialize(deserializer)?.into_id()
}

pub mod option {
    use super::{EntityId, RawId};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        id: &Option<EntityId>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.collect_str(id),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<EntityId>, D::Error> {
        Option::<RawId>::deserialize(deserializer)?
            .map(RawId::into_id)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "super")]
        id: u64,
        #[serde(default, with = "super::option")]
        parent: Option<u64>,
    }

    #[test]
    fn test_accepts_both_forms() {
        let a: Holder = serde_json::from_str(r#"{"id": "5", "parent": 6}"#).unwrap();
        assert_eq!(a, Holder { id: 5, parent: Some(6) });

        let b: Holder = serde_json::from_str(r#"{"id": 5}"#).unwrap();
        assert_eq!(b.parent, None);
    }

    #[test]
    fn test_rejects_non_numeric() {
        let result: Result<Holder, _> = serde_json::from_str(r#"{"id": "abc"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&Holder { id: 9, parent: None }).unwrap();
        assert_eq!(json, r#"{"id":"9","parent":null}"#);
    }
}
