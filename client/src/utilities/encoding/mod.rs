use serde::de::DeserializeOwned;
use serde::Serialize;

//JSON is the canonical form for signing and hashing. Signed structures must only
//contain ordered collections so the encoding is deterministic.
pub(crate) fn encode<M: Serialize>(message: &M) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| anyhow::anyhow!(e))
}

pub(crate) fn decode<M: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<M> {
    serde_json::from_slice(bytes).map_err(|e| anyhow::anyhow!(e))
}

pub(crate) fn to_hex<T: AsRef<[u8]>>(data: T) -> String {
    array_bytes::bytes2hex("", data.as_ref())
}

pub(crate) fn to_base58<T: AsRef<[u8]>>(data: T) -> String {
    bs58::encode(data.as_ref()).into_string()
}

pub(crate) fn from_base58<T: AsRef<[u8]>>(data: T) -> anyhow::Result<Vec<u8>> {
    bs58::decode(data.as_ref())
        .into_vec()
        .map_err(|_| anyhow::anyhow!("Invalid base58 string"))
}
