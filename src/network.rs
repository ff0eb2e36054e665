// SPDX-License-Identifier: CC0-1.0

//! Network parameters.
//!
//! Plain data, consumed by the address codec, payment templates and key encoding.

/// Version bytes of serialized BIP-32 extended keys.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Bip32 {
    /// Extended public key version.
    pub public: u32,
    /// Extended private key version.
    pub private: u32,
}

/// Per-chain prefixes and version bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Network {
    /// Prefix used when signing messages.
    pub message_prefix: &'static str,
    /// Human readable part of segwit addresses.
    pub bech32: &'static str,
    /// BIP-32 extended key versions.
    pub bip32: Bip32,
    /// Base58 version byte of P2PKH addresses.
    pub pub_key_hash: u8,
    /// Base58 version byte of P2SH addresses.
    pub script_hash: u8,
    /// Version byte of WIF encoded private keys.
    pub wif: u8,
}

/// Bitcoin mainnet.
pub const BITCOIN: Network = Network {
    message_prefix: "\x18Bitcoin Signed Message:\n",
    bech32: "bc",
    bip32: Bip32 { public: 0x0488_b21e, private: 0x0488_ade4 },
    pub_key_hash: 0x00,
    script_hash: 0x05,
    wif: 0x80,
};

/// Bitcoin regtest.
pub const REGTEST: Network = Network {
    message_prefix: "\x18Bitcoin Signed Message:\n",
    bech32: "bcrt",
    bip32: Bip32 { public: 0x0435_87cf, private: 0x0435_8394 },
    pub_key_hash: 0x6f,
    script_hash: 0xc4,
    wif: 0xef,
};

/// Bitcoin testnet.
pub const TESTNET: Network = Network {
    message_prefix: "\x18Bitcoin Signed Message:\n",
    bech32: "tb",
    bip32: Bip32 { public: 0x0435_87cf, private: 0x0435_8394 },
    pub_key_hash: 0x6f,
    script_hash: 0xc4,
    wif: 0xef,
};

impl Default for Network {
    fn default() -> Self { BITCOIN }
}
