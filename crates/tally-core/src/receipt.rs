use serde::{Deserialize, Serialize};

/// One signed, hash-chained record.
///
/// Built pending (`prev_hash = None`, empty `hash`) and filled in exactly once by the ledger
/// when it is appended. After that the ledger row is the source of truth and this value is
/// only a copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub prev_hash: Option<String>,
    pub hash: String,
    pub created_at: String,
}

impl Receipt {
    pub fn pending(
        id: impl Into<String>,
        payload: Vec<u8>,
        signature: Vec<u8>,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            payload,
            signature,
            prev_hash: None,
            hash: String::new(),
            created_at: created_at.into(),
        }
    }

    pub fn is_committed(&self) -> bool {
        !self.hash.is_empty()
    }

    pub fn is_genesis(&self) -> bool {
        self.is_committed() && self.prev_hash.is_none()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
