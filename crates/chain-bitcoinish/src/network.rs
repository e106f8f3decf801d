use crate::fee::FeeRate;

/// Standard dust threshold for P2PKH-sized outputs at the default dust relay fee.
pub const DEFAULT_DUST_THRESHOLD: u64 = 546;

/// Decimal places of BTC and LTC (1 coin = 10^8 base units).
pub const DECIMAL_PLACES: u32 = 8;

/// BIP32 extended key version bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bip32Versions {
    pub private: [u8; 4],
    pub public: [u8; 4],
}

/// `xprv` / `xpub`
pub const BIP32_MAINNET: Bip32Versions = Bip32Versions {
    private: [0x04, 0x88, 0xad, 0xe4],
    public: [0x04, 0x88, 0xb2, 0x1e],
};

/// `tprv` / `tpub`
pub const BIP32_TESTNET: Bip32Versions = Bip32Versions {
    private: [0x04, 0x35, 0x83, 0x94],
    public: [0x04, 0x35, 0x87, 0xcf],
};

/// Immutable description of one bitcoinish chain variant.
///
/// Everything that differs between Bitcoin, Litecoin and their testnets is
/// data on this struct; the derivation, selection and assembly algorithms
/// are shared. Profiles are built once and threaded through every call, so
/// several networks can be used side by side in one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProfile {
    pub name: &'static str,
    pub coin_symbol: &'static str,
    pub coin_name: &'static str,
    pub decimals: u32,
    pub p2pkh_version: u8,
    pub p2sh_version: u8,
    pub bech32_hrp: &'static str,
    pub wif_version: u8,
    pub bip32: Bip32Versions,
    /// BIP44 coin type used in default derivation paths.
    pub coin_type: u32,
    /// Outputs below this many base units are never created.
    pub dust_threshold: u64,
    /// Floor applied to the effective fee rate, per virtual byte.
    pub min_relay_fee_rate: FeeRate,
    pub is_testnet: bool,
}

pub const BITCOIN_MAINNET: NetworkProfile = NetworkProfile {
    name: "bitcoin",
    coin_symbol: "BTC",
    coin_name: "Bitcoin",
    decimals: DECIMAL_PLACES,
    p2pkh_version: 0x00,
    p2sh_version: 0x05,
    bech32_hrp: "bc",
    wif_version: 0x80,
    bip32: BIP32_MAINNET,
    coin_type: 0,
    dust_threshold: DEFAULT_DUST_THRESHOLD,
    min_relay_fee_rate: FeeRate::from_base(1),
    is_testnet: false,
};

pub const BITCOIN_TESTNET: NetworkProfile = NetworkProfile {
    name: "bitcoin-testnet",
    coin_symbol: "BTC",
    coin_name: "Bitcoin Testnet",
    decimals: DECIMAL_PLACES,
    p2pkh_version: 0x6f,
    p2sh_version: 0xc4,
    bech32_hrp: "tb",
    wif_version: 0xef,
    bip32: BIP32_TESTNET,
    coin_type: 1,
    dust_threshold: DEFAULT_DUST_THRESHOLD,
    min_relay_fee_rate: FeeRate::from_base(1),
    is_testnet: true,
};

/// Litecoin keeps Bitcoin's `xprv`/`xpub` version bytes, which is what most
/// Litecoin wallets export.
pub const LITECOIN_MAINNET: NetworkProfile = NetworkProfile {
    name: "litecoin",
    coin_symbol: "LTC",
    coin_name: "Litecoin",
    decimals: DECIMAL_PLACES,
    p2pkh_version: 0x30,
    p2sh_version: 0x32,
    bech32_hrp: "ltc",
    wif_version: 0xb0,
    bip32: BIP32_MAINNET,
    coin_type: 2,
    dust_threshold: DEFAULT_DUST_THRESHOLD,
    min_relay_fee_rate: FeeRate::from_base(1),
    is_testnet: false,
};

pub const LITECOIN_TESTNET: NetworkProfile = NetworkProfile {
    name: "litecoin-testnet",
    coin_symbol: "LTC",
    coin_name: "Litecoin Testnet",
    decimals: DECIMAL_PLACES,
    p2pkh_version: 0x6f,
    p2sh_version: 0x3a,
    bech32_hrp: "tltc",
    wif_version: 0xef,
    bip32: BIP32_TESTNET,
    coin_type: 1,
    dust_threshold: DEFAULT_DUST_THRESHOLD,
    min_relay_fee_rate: FeeRate::from_base(1),
    is_testnet: true,
};

impl NetworkProfile {
    /// Return a copy with a different dust threshold.
    pub fn with_dust_threshold(mut self, dust_threshold: u64) -> Self {
        self.dust_threshold = dust_threshold;
        self
    }

    /// Return a copy with a different minimum relay fee rate.
    pub fn with_min_relay_fee_rate(mut self, rate: FeeRate) -> Self {
        self.min_relay_fee_rate = rate;
        self
    }

    pub fn is_dust(&self, value: u64) -> bool {
        value < self.dust_threshold
    }
}

impl std::fmt::Display for NetworkProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}
