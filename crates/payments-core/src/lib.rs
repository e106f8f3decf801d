//! HD payments over a bitcoinish chain.
//!
//! [`HdBitcoinishPayments`] derives addresses from one configured extended
//! key and composes the `chain-bitcoinish` engine with external UTXO, fee,
//! broadcast and transaction-info sources into create / sign / broadcast
//! operations.

pub mod config;
pub mod error;
pub mod source;
pub mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chain_bitcoinish::address::{is_valid_address, AddressType};
use chain_bitcoinish::amount::{to_base_units, to_main_denomination};
use chain_bitcoinish::bip44::{
    derive_address, derive_hd_node, derive_key_pair, derive_private_key, HdNode, KeyPair,
};
use chain_bitcoinish::coin_selection::{CoinSelector, SelectionOptions, SelectionTarget};
use chain_bitcoinish::fee::{FeeRate, FeeRateSpec};
use chain_bitcoinish::network::NetworkProfile;
use chain_bitcoinish::transaction::{
    build_unsigned_tx, sign_transaction, TxOutput, WeightedChangeOutput,
};
use chain_bitcoinish::utxo::UtxoInfo;
use tracing::{debug, info};

use config::HdPaymentsConfig;
use error::PaymentsError;
use source::{Broadcaster, FeeLevelSource, TxInfoSource, UtxoSource};
use types::{
    BalanceResult, BroadcastResult, CreateTransactionOptions, FeeLevel, FeeOption, FeeRateType,
    Payport, PayportOutput, SignedTransaction, TransactionInfo, TransactionStatus,
    UnsignedTransaction,
};

/// `to_address` of transactions paying more than one destination.
pub const BATCH_TO_ADDRESS: &str = "batch";

/// A payport resolved to a concrete address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPayport {
    pub address: String,
    /// Set only when the payport was an index.
    pub index: Option<u32>,
}

/// A fee option resolved against the configuration and fee source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFee {
    pub spec: FeeRateSpec,
    pub fee_rate: String,
    pub fee_rate_type: FeeRateType,
    pub fee_level: Option<FeeLevel>,
}

pub struct HdBitcoinishPayments {
    config: HdPaymentsConfig,
    profile: NetworkProfile,
    account: HdNode,
    xpub: String,
    utxo_source: Arc<dyn UtxoSource>,
    broadcaster: Arc<dyn Broadcaster>,
    tx_info: Arc<dyn TxInfoSource>,
    fee_levels: Option<Arc<dyn FeeLevelSource>>,
}

impl HdBitcoinishPayments {
    pub fn new(
        config: HdPaymentsConfig,
        utxo_source: Arc<dyn UtxoSource>,
        broadcaster: Arc<dyn Broadcaster>,
        tx_info: Arc<dyn TxInfoSource>,
    ) -> Result<Self, PaymentsError> {
        let profile = config.network_profile()?;
        let path = config.account_path(&profile);
        let account = derive_hd_node(&config.hd_key, &path, &profile)?;
        let xpub = account.to_public().to_base58(&profile);

        info!(
            network = profile.name,
            address_type = %config.address_type,
            path = %path,
            can_sign = account.is_private(),
            "initialized hd payments"
        );

        Ok(Self {
            config,
            profile,
            account,
            xpub,
            utxo_source,
            broadcaster,
            tx_info,
            fee_levels: None,
        })
    }

    /// Enable named fee levels.
    pub fn with_fee_level_source(mut self, fee_levels: Arc<dyn FeeLevelSource>) -> Self {
        self.fee_levels = Some(fee_levels);
        self
    }

    /// Extended public key of the account node.
    pub fn xpub(&self) -> &str {
        &self.xpub
    }

    pub fn network_profile(&self) -> &NetworkProfile {
        &self.profile
    }

    pub fn address_type(&self) -> AddressType {
        self.config.address_type
    }

    pub fn get_address(&self, index: u32) -> Result<String, PaymentsError> {
        Ok(derive_address(&self.account, index, &self.profile, self.config.address_type)?)
    }

    pub fn get_payport(&self, index: u32) -> Result<Payport, PaymentsError> {
        Ok(Payport::address(self.get_address(index)?))
    }

    /// WIF private key for `index`. Fails when configured with an xpub.
    pub fn get_private_key(&self, index: u32) -> Result<String, PaymentsError> {
        Ok(derive_private_key(&self.account, index, &self.profile)?)
    }

    pub fn is_valid_address(&self, address: &str) -> bool {
        is_valid_address(address, &self.profile)
    }

    pub fn resolve_payport(&self, payport: &Payport) -> Result<ResolvedPayport, PaymentsError> {
        match payport {
            Payport::Index(index) => Ok(ResolvedPayport {
                address: self.get_address(*index)?,
                index: Some(*index),
            }),
            Payport::Address { address } => {
                if !self.is_valid_address(address) {
                    return Err(chain_bitcoinish::BitcoinishError::InvalidAddress(format!(
                        "'{address}' is not a valid {} address",
                        self.profile
                    ))
                    .into());
                }
                Ok(ResolvedPayport {
                    address: address.clone(),
                    index: None,
                })
            }
        }
    }

    pub async fn get_balance(&self, payport: &Payport) -> Result<BalanceResult, PaymentsError> {
        let resolved = self.resolve_payport(payport)?;
        let balance = self.utxo_source.get_balance(&resolved.address).await?;
        let decimals = self.profile.decimals;

        Ok(BalanceResult {
            confirmed_balance: to_main_denomination(balance.confirmed, decimals)?,
            unconfirmed_balance: to_main_denomination(balance.unconfirmed, decimals)?,
            spendable_balance: to_main_denomination(balance.confirmed, decimals)?,
            sweepable: !self.profile.is_dust(balance.confirmed),
            requires_activation: false,
        })
    }

    /// Turn a caller's fee option (or the configured default level) into a
    /// rate specification for the fee estimator.
    pub async fn resolve_fee_option(
        &self,
        option: Option<&FeeOption>,
    ) -> Result<ResolvedFee, PaymentsError> {
        let level = match option {
            Some(FeeOption::Rate {
                fee_rate,
                fee_rate_type,
            }) => {
                let spec = match fee_rate_type {
                    FeeRateType::Main => {
                        // Validate now rather than at estimation time.
                        to_base_units(fee_rate, self.profile.decimals)?;
                        FeeRateSpec::FixedMain(fee_rate.clone())
                    }
                    FeeRateType::Base => FeeRateSpec::FixedBase(to_base_units(fee_rate, 0)?),
                    FeeRateType::BasePerWeight => FeeRateSpec::PerWeight(fee_rate.parse()?),
                    FeeRateType::BasePerByte => FeeRateSpec::PerByte(fee_rate.parse()?),
                };
                return Ok(ResolvedFee {
                    spec,
                    fee_rate: fee_rate.clone(),
                    fee_rate_type: *fee_rate_type,
                    fee_level: None,
                });
            }
            Some(FeeOption::Level { fee_level }) => *fee_level,
            None => self.config.fee_level,
        };

        let source = self.fee_levels.as_ref().ok_or_else(|| {
            PaymentsError::FeeLevelUnavailable(format!("no fee level source configured for '{level}'"))
        })?;
        let rate: FeeRate = source.get_fee_rate(level, self.config.network).await?;
        debug!(%level, %rate, "resolved fee level");

        Ok(ResolvedFee {
            spec: FeeRateSpec::PerWeight(rate),
            fee_rate: rate.to_string(),
            fee_rate_type: FeeRateType::BasePerWeight,
            fee_level: Some(level),
        })
    }

    /// Send `amount` (main denomination) from HD index `from` to `to`.
    pub async fn create_transaction(
        &self,
        from: u32,
        to: &Payport,
        amount: &str,
        options: &CreateTransactionOptions,
    ) -> Result<UnsignedTransaction, PaymentsError> {
        let destination = self.resolve_payport(to)?;
        let value = to_base_units(amount, self.profile.decimals)?;
        let target = SelectionTarget::Send(vec![TxOutput::new(destination.address.clone(), value)]);
        self.create(from, target, destination, options).await
    }

    /// Pay several destinations from HD index `from` in one transaction.
    pub async fn create_multi_output_transaction(
        &self,
        from: u32,
        outputs: &[PayportOutput],
        options: &CreateTransactionOptions,
    ) -> Result<UnsignedTransaction, PaymentsError> {
        let tx_outputs = outputs
            .iter()
            .map(|o| {
                let address = self.resolve_payport(&o.payport)?.address;
                let value = to_base_units(&o.amount, self.profile.decimals)?;
                Ok(TxOutput::new(address, value))
            })
            .collect::<Result<Vec<_>, PaymentsError>>()?;

        let destination = ResolvedPayport {
            address: BATCH_TO_ADDRESS.to_string(),
            index: None,
        };
        self.create(from, SelectionTarget::Send(tx_outputs), destination, options)
            .await
    }

    /// Move the whole spendable balance of HD index `from` to `to`.
    pub async fn create_sweep_transaction(
        &self,
        from: u32,
        to: &Payport,
        options: &CreateTransactionOptions,
    ) -> Result<UnsignedTransaction, PaymentsError> {
        let destination = self.resolve_payport(to)?;
        let target = SelectionTarget::Sweep {
            address: destination.address.clone(),
        };
        self.create(from, target, destination, options).await
    }

    async fn create(
        &self,
        from: u32,
        target: SelectionTarget,
        destination: ResolvedPayport,
        options: &CreateTransactionOptions,
    ) -> Result<UnsignedTransaction, PaymentsError> {
        let from_address = self.get_address(from)?;
        let fee = self.resolve_fee_option(options.fee.as_ref()).await?;
        let utxos = self.spendable_utxos(from, &from_address, options).await?;

        let selection_options = SelectionOptions {
            use_unconfirmed_utxos: options.use_unconfirmed_utxos,
            target_utxo_pool_size: options
                .target_utxo_pool_size
                .or(self.config.target_utxo_pool_size),
        };
        let change = [WeightedChangeOutput {
            address: from_address.clone(),
            weight: 1,
        }];

        let selection = CoinSelector::new(&self.profile, self.config.address_type).select(
            &utxos,
            &target,
            &fee.spec,
            &change,
            &selection_options,
        )?;
        let fee_clamped = selection.fee_clamped;
        let payment = build_unsigned_tx(
            selection.inputs,
            selection.external_outputs,
            selection.change_outputs,
            selection.fee,
            &self.profile,
        )?;

        let decimals = self.profile.decimals;
        let unsigned = UnsignedTransaction {
            status: TransactionStatus::Unsigned,
            from_address,
            to_address: destination.address,
            from_index: from,
            to_index: destination.index,
            amount: to_main_denomination(payment.external_output_total, decimals)?,
            fee: to_main_denomination(payment.fee, decimals)?,
            fee_rate: fee.fee_rate,
            fee_rate_type: fee.fee_rate_type,
            fee_level: fee.fee_level,
            fee_clamped,
            input_utxos: payment.inputs.clone(),
            external_outputs: payment.external_outputs.clone(),
            data: payment,
        };

        info!(
            network = self.profile.name,
            from = unsigned.from_index,
            to = %unsigned.to_address,
            amount = %unsigned.amount,
            fee = %unsigned.fee,
            inputs = unsigned.input_utxos.len(),
            "created transaction"
        );
        Ok(unsigned)
    }

    /// UTXOs owned by `from`, either supplied by the caller or fetched, with
    /// missing derivation indices filled in.
    async fn spendable_utxos(
        &self,
        from: u32,
        from_address: &str,
        options: &CreateTransactionOptions,
    ) -> Result<Vec<UtxoInfo>, PaymentsError> {
        let mut utxos = match &options.utxos {
            Some(utxos) => utxos.clone(),
            None => self.utxo_source.get_utxos(from_address).await?,
        };
        for utxo in &mut utxos {
            if utxo.derivation_index.is_none() {
                utxo.derivation_index = Some(from);
            }
        }
        Ok(utxos)
    }

    /// Sign with keys derived for each input's derivation index. The unsigned
    /// transaction is left untouched.
    pub async fn sign_transaction(
        &self,
        unsigned: &UnsignedTransaction,
    ) -> Result<SignedTransaction, PaymentsError> {
        if unsigned.status != TransactionStatus::Unsigned {
            return Err(PaymentsError::InvalidTransaction(format!(
                "expected an unsigned transaction, got {:?}",
                unsigned.status
            )));
        }

        let indices: BTreeSet<u32> = unsigned
            .data
            .inputs
            .iter()
            .map(|u| u.derivation_index.unwrap_or(unsigned.from_index))
            .collect();
        let keys = indices
            .into_iter()
            .map(|i| Ok((i, derive_key_pair(&self.account, i)?)))
            .collect::<Result<BTreeMap<u32, KeyPair>, PaymentsError>>()?;

        let mut payment = unsigned.data.clone();
        for utxo in &mut payment.inputs {
            if utxo.derivation_index.is_none() {
                utxo.derivation_index = Some(unsigned.from_index);
            }
        }

        let signed = sign_transaction(&payment, self.config.address_type, &keys, &self.profile)?;
        info!(network = self.profile.name, txid = %signed.txid, "signed transaction");

        Ok(SignedTransaction {
            status: TransactionStatus::Signed,
            id: signed.txid,
            from_address: unsigned.from_address.clone(),
            to_address: unsigned.to_address.clone(),
            from_index: unsigned.from_index,
            to_index: unsigned.to_index,
            amount: unsigned.amount.clone(),
            fee: unsigned.fee.clone(),
            hex: signed.hex,
            unsigned_tx_hash: signed.unsigned_tx_hash,
            data: unsigned.data.clone(),
        })
    }

    pub async fn broadcast_transaction(
        &self,
        signed: &SignedTransaction,
    ) -> Result<BroadcastResult, PaymentsError> {
        if signed.status != TransactionStatus::Signed {
            return Err(PaymentsError::InvalidTransaction(format!(
                "expected a signed transaction, got {:?}",
                signed.status
            )));
        }
        let result = self.broadcaster.broadcast(&signed.hex).await?;
        info!(network = self.profile.name, txid = %result.id, "broadcast transaction");
        Ok(result)
    }

    /// Look up a transaction. Ids that are not 64 hex characters are
    /// reported as not found without asking the source.
    pub async fn get_transaction_info(&self, txid: &str) -> Result<TransactionInfo, PaymentsError> {
        if txid.len() != 64 || hex::decode(txid).is_err() {
            return Err(PaymentsError::TransactionNotFound(txid.to_string()));
        }
        self.tx_info.get_transaction_info(txid).await
    }
}
