//! Serde helpers for the JSON wire format.

/// Hex-encode byte-like fields, e.g.:
/// ```ignore
/// #[serde(with = "gravity_core::encoding::as_hex")]
/// value: Vec<u8>,
/// ```
pub mod as_hex {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(data: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(data.as_ref()))
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: TryFrom<Vec<u8>>,
        D: Deserializer<'de>,
    {
        let hex_str = String::deserialize(deserializer)?;
        let bytes = hex::decode(&hex_str).map_err(D::Error::custom)?;
        T::try_from(bytes).map_err(|_| D::Error::custom("unexpected byte length"))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wrapper(#[serde(with = "super::as_hex")] Vec<u8>);

    #[test]
    fn hex_round_trip() {
        let value = Wrapper(vec![0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_string(&value).expect("serializes");
        assert_eq!(json, "\"deadbeef\"");
        assert_eq!(
            serde_json::from_str::<Wrapper>(&json).expect("deserializes"),
            value
        );
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(serde_json::from_str::<Wrapper>("\"zz\"").is_err());
    }
}
