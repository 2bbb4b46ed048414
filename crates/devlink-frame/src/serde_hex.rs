//! Serialize [`Bytes`] as a lowercase hex string.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&encode_hex(value))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let text = String::deserialize(deserializer)?;
    decode_hex(&text)
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}

/// Lowercase hex, two digits per byte, no separators.
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Parse hex digits. Whitespace, `:` and `-` between bytes are ignored.
pub fn decode_hex(text: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':' && *b != b'-')
        .collect();
    if digits.len() % 2 != 0 {
        return Err("expected an even number of hex digits".to_string());
    }
    digits
        .chunks(2)
        .map(|pair| {
            let high = hex_value(pair[0])?;
            let low = hex_value(pair[1])?;
            Ok((high << 4) | low)
        })
        .collect()
}

fn hex_value(digit: u8) -> Result<u8, String> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        other => Err(format!("invalid hex digit {:?}", char::from(other))),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Wrapper {
        #[serde(with = "super")]
        data: Bytes,
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(serde_json::from_str::<Wrapper>(r#"{"data":"abc"}"#).is_err());
        assert!(serde_json::from_str::<Wrapper>(r#"{"data":"zz"}"#).is_err());
        assert!(serde_json::from_str::<Wrapper>(r#"{"data":"éa"}"#).is_err());
        let ok: Wrapper = serde_json::from_str(r#"{"data":"00fe"}"#).unwrap();
        assert_eq!(ok.data.as_ref(), &[0x00, 0xFE]);
    }

    #[test]
    fn decode_ignores_separators() {
        assert_eq!(
            super::decode_hex("01 03:02-00 2c\n").unwrap(),
            vec![0x01, 0x03, 0x02, 0x00, 0x2C]
        );
        assert_eq!(super::encode_hex(&[0xB9, 0x99]), "b999");
    }
}
