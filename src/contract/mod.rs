//! Contract registry and call encoding
//!
//! Maps contract names to their address and ABI, and turns method name +
//! parameters into calldata. Built once from configuration; never mutated by
//! the dispatcher.

use crate::config::ContractConfig;
use crate::error::{DispatchError, DispatchResult};

use dashmap::DashMap;
use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// One registered contract
pub struct Contract {
    pub name: String,
    pub address: Address,
    pub abi: Abi,
}

/// Name-keyed registry of contracts, read-only after construction
pub struct ContractRegistry {
    contracts: DashMap<String, Arc<Contract>>,
}

impl ContractRegistry {
    /// Build the registry from configuration, loading each ABI from disk.
    ///
    /// A malformed address or ABI file is fatal: the registry either loads
    /// completely or not at all.
    pub fn from_configs(configs: &[ContractConfig]) -> DispatchResult<Self> {
        let contracts = DashMap::new();

        for config in configs {
            let address = Address::from_str(&config.address).map_err(|e| {
                DispatchError::Config(format!(
                    "Invalid address for contract {}: {}",
                    config.name, e
                ))
            })?;

            let abi_json = std::fs::read_to_string(&config.abi_path).map_err(|e| {
                DispatchError::Config(format!(
                    "Failed to read ABI file {} for contract {}: {}",
                    config.abi_path, config.name, e
                ))
            })?;

            let abi: Abi = serde_json::from_str(&abi_json).map_err(|e| {
                DispatchError::Config(format!(
                    "Malformed ABI for contract {}: {}",
                    config.name, e
                ))
            })?;

            info!("Registered contract {} at {:?}", config.name, address);
            contracts.insert(
                config.name.clone(),
                Arc::new(Contract {
                    name: config.name.clone(),
                    address,
                    abi,
                }),
            );
        }

        Ok(Self { contracts })
    }

    /// Registry over already-parsed contracts, for wiring without ABI files
    pub fn from_contracts(entries: Vec<Contract>) -> Self {
        let contracts = DashMap::new();
        for contract in entries {
            contracts.insert(contract.name.clone(), Arc::new(contract));
        }
        Self { contracts }
    }

    /// Look up a contract by name
    pub fn get(&self, name: &str) -> DispatchResult<Arc<Contract>> {
        self.contracts
            .get(name)
            .map(|c| c.clone())
            .ok_or_else(|| DispatchError::UnknownContract(name.to_string()))
    }

    /// Resolve a contract method call into its target address and calldata
    pub fn resolve(
        &self,
        contract_name: &str,
        method: &str,
        params: &[Token],
    ) -> DispatchResult<(Address, Bytes)> {
        let contract = self.get(contract_name)?;

        let function = contract.abi.function(method).map_err(|e| {
            DispatchError::Encoding {
                contract: contract_name.to_string(),
                method: method.to_string(),
                message: e.to_string(),
            }
        })?;

        let data = function
            .encode_input(params)
            .map_err(|e| DispatchError::Encoding {
                contract: contract_name.to_string(),
                method: method.to_string(),
                message: e.to_string(),
            })?;

        debug!(
            "Encoded {}.{}: 0x{}",
            contract_name,
            method,
            hex::encode(&data)
        );

        Ok((contract.address, Bytes::from(data)))
    }

    /// Decode the raw output of a contract method call
    pub fn decode(
        &self,
        contract_name: &str,
        method: &str,
        output: &[u8],
    ) -> DispatchResult<Vec<Token>> {
        let contract = self.get(contract_name)?;

        let function = contract.abi.function(method).map_err(|e| {
            DispatchError::Encoding {
                contract: contract_name.to_string(),
                method: method.to_string(),
                message: e.to_string(),
            }
        })?;

        function
            .decode_output(output)
            .map_err(|e| DispatchError::Encoding {
                contract: contract_name.to_string(),
                method: method.to_string(),
                message: e.to_string(),
            })
    }

    /// Registered contract names
    pub fn names(&self) -> Vec<String> {
        self.contracts.iter().map(|e| e.key().clone()).collect()
    }

    /// Addresses of every registered contract, for log filters
    pub fn addresses(&self) -> Vec<Address> {
        self.contracts.iter().map(|e| e.value().address).collect()
    }
}
