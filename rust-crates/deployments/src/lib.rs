use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use lottery_abi::Address;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

pub const SEPOLIA_RPC_URL: &str = "https://sepolia.drpc.org";
pub const LOCAL_RPC_URL: &str = "http://localhost:8545";
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
pub const LOCAL_CHAIN_ID: u64 = 31_337;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Sepolia,
    Local,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Sepolia => "sepolia",
            DeploymentEnv::Local => "local",
        }
    }

    pub fn default_rpc_url(self) -> &'static str {
        match self {
            DeploymentEnv::Sepolia => SEPOLIA_RPC_URL,
            DeploymentEnv::Local => LOCAL_RPC_URL,
        }
    }

    pub fn chain_id(self) -> u64 {
        match self {
            DeploymentEnv::Sepolia => SEPOLIA_CHAIN_ID,
            DeploymentEnv::Local => LOCAL_CHAIN_ID,
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Sepolia => "Sepolia",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

/// Addresses and endpoints of one deployment of the lottery contracts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployed_at: String,
    pub network_url: String,
    pub chain_id: u64,
    pub token_address: Address,
    pub manager_address: Address,
    pub nft_address: Address,
    #[serde(default)]
    pub wallet_url: Option<String>,
    #[serde(default)]
    pub metadata_base_url: Option<String>,
}

impl DeploymentRecord {
    pub fn is_for_chain(&self, chain_id: u64) -> bool {
        self.chain_id == chain_id
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::with_root(DEPLOYMENTS_ROOT, env)
    }

    pub fn with_root(root: impl AsRef<Path>, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<DeploymentRecord>> {
        read_record(&self.path)
    }

    pub fn save(&self, record: &DeploymentRecord) -> Result<()> {
        write_record(&self.path, record)
    }
}

pub fn ensure_structure() -> Result<()> {
    for env in [DeploymentEnv::Sepolia, DeploymentEnv::Local] {
        let _ = ensure_store(Path::new(DEPLOYMENTS_ROOT), env)?;
    }
    Ok(())
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!("Failed to create {} directory", env_dir.display())
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        fs::File::create(&file_path).with_context(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
    }

    Ok(file_path)
}

fn read_record(path: impl AsRef<Path>) -> Result<Option<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).context("Failed to read deployment records")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
        return Ok(Some(record));
    }
    if let Ok(mut records) = serde_json::from_slice::<Vec<DeploymentRecord>>(&data) {
        return Ok(records.pop());
    }
    Err(anyhow!(
        "Failed to parse deployment record JSON; expected a single deployment object"
    ))
}

fn write_record(path: impl AsRef<Path>, record: &DeploymentRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)
        .context("Failed to serialize deployment record")?;
    fs::write(path.as_ref(), json).context("Failed to write deployment record")?;
    Ok(())
}

pub struct NewDeployment {
    pub token_address: Address,
    pub manager_address: Address,
    pub nft_address: Address,
    pub network_url: Option<String>,
    pub wallet_url: Option<String>,
    pub metadata_base_url: Option<String>,
}

pub fn record_deployment(
    store: &DeploymentStore,
    env: DeploymentEnv,
    deployment: NewDeployment,
) -> Result<DeploymentRecord> {
    let record = DeploymentRecord {
        deployed_at: Utc::now().to_rfc3339(),
        network_url: deployment
            .network_url
            .unwrap_or_else(|| env.default_rpc_url().to_string()),
        chain_id: env.chain_id(),
        token_address: deployment.token_address,
        manager_address: deployment.manager_address,
        nft_address: deployment.nft_address,
        wallet_url: deployment.wallet_url,
        metadata_base_url: deployment.metadata_base_url,
    };
    store.save(&record)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    fn arb_deployment() -> NewDeployment {
        NewDeployment {
            token_address: Address::new([1u8; 20]),
            manager_address: Address::new([2u8; 20]),
            nft_address: Address::new([3u8; 20]),
            network_url: None,
            wallet_url: Some("http://127.0.0.1:1248".to_string()),
            metadata_base_url: None,
        }
    }

    #[test]
    fn load__fresh_store__returns_none() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::with_root(dir.path(), DeploymentEnv::Local).unwrap();

        // when
        let record = store.load().unwrap();

        // then
        assert!(record.is_none());
        assert!(store.path().ends_with("local/deployments.json"));
    }

    #[test]
    fn record_deployment__saved_record_is_loaded_back() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store =
            DeploymentStore::with_root(dir.path(), DeploymentEnv::Sepolia).unwrap();

        // when
        let saved =
            record_deployment(&store, DeploymentEnv::Sepolia, arb_deployment()).unwrap();
        let loaded = store.load().unwrap();

        // then
        assert_eq!(Some(saved.clone()), loaded);
        assert_eq!(saved.network_url, SEPOLIA_RPC_URL);
        assert!(saved.is_for_chain(SEPOLIA_CHAIN_ID));
    }

    #[test]
    fn load__list_of_records__returns_the_last() {
        // given
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::with_root(dir.path(), DeploymentEnv::Local).unwrap();
        let first =
            record_deployment(&store, DeploymentEnv::Local, arb_deployment()).unwrap();
        let mut second = first.clone();
        second.nft_address = Address::new([9u8; 20]);
        fs::write(
            store.path(),
            serde_json::to_vec(&vec![first, second.clone()]).unwrap(),
        )
        .unwrap();

        // when
        let loaded = store.load().unwrap();

        // then
        assert_eq!(loaded, Some(second));
    }

    #[test]
    fn load__garbage__is_an_error() {
        let dir = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::with_root(dir.path(), DeploymentEnv::Local).unwrap();
        fs::write(store.path(), b"{ not json").unwrap();
        assert!(store.load().is_err());
    }
}
