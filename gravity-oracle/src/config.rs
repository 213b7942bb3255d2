use secp256k1::{Keypair, SECP256K1, SecretKey};
use serde::{Deserialize, Serialize};

use gravity_core::types::{ChainType, NebulaId, OraclePubKey};

fn default_poll_interval_secs() -> u64 {
    5
}

/// Node configuration, loaded from a JSON file by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleConfig {
    /// Base url of a ledger node's RPC
    pub ledger_url: String,
    /// Base url of the data extraction service
    pub extractor_url: String,
    /// Base url of the target chain bridge satisfying the adaptor contract
    pub target_chain_url: String,
    pub chain_type: ChainType,
    /// The nebula this node publishes into
    pub nebula: NebulaId,
    /// This node's chain-local oracle key, as registered via `addOracle`
    pub oracle: OraclePubKey,
    /// Hex-encoded ledger-native secret key of the validator
    pub consul_secret_key: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl OracleConfig {
    pub fn consul_keypair(&self) -> anyhow::Result<Keypair> {
        let secret_key: SecretKey = self
            .consul_secret_key
            .parse()
            .map_err(|_| anyhow::format_err!("consul secret key is not valid hex key material"))?;
        Ok(Keypair::from_secret_key(SECP256K1, &secret_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let json = serde_json::json!({
            "ledgerUrl": "http://127.0.0.1:26657",
            "extractorUrl": "http://127.0.0.1:8090",
            "targetChainUrl": "http://127.0.0.1:8545",
            "chainType": "ethereum",
            "nebula": hex::encode([0xaa; 32]),
            "oracle": hex::encode([0xbb; 33]),
            "consulSecretKey": hex::encode([0x11; 32]),
        });

        let config: OracleConfig = serde_json::from_value(json).expect("parses");
        assert_eq!(config.chain_type, ChainType::Ethereum);
        assert_eq!(config.poll_interval_secs, 5);
        config.consul_keypair().expect("valid key");
    }

    #[test]
    fn rejects_garbage_key_material() {
        let config = OracleConfig {
            ledger_url: String::new(),
            extractor_url: String::new(),
            target_chain_url: String::new(),
            chain_type: ChainType::Waves,
            nebula: NebulaId::new([0; 32]),
            oracle: OraclePubKey::new([0; 33]),
            consul_secret_key: "not hex".to_owned(),
            poll_interval_secs: 5,
        };
        assert!(config.consul_keypair().is_err());
    }
}
