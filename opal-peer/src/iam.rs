//! In-memory IAM tables and the backing-store reload contract
//!
//! Peers never author IAM state; the coordinator mutates the backing store
//! and then tells every node to reload or evict the affected entries. All
//! operations here are idempotent so replayed peer calls are harmless.

use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum IamError {
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("service account not found: {0}")]
    ServiceAccountNotFound(String),

    #[error("iam store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub name: String,
    pub document: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Regular,
    Temporary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub access_key: String,
    pub user_type: UserType,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub access_key: String,
    pub parent_user: String,
    pub enabled: bool,
}

/// The IAM backing store the coordinator writes to. Reload calls read
/// through this contract.
#[async_trait]
pub trait IamStore: Send + Sync {
    async fn load_policy(&self, name: &str) -> Result<PolicyDocument, IamError>;

    /// Resolves the policy attached to a user or group.
    async fn load_policy_mapping(
        &self,
        user_or_group: &str,
        is_group: bool,
    ) -> Result<String, IamError>;

    async fn load_user(&self, access_key: &str, user_type: UserType) -> Result<UserInfo, IamError>;

    async fn load_group(&self, name: &str) -> Result<GroupInfo, IamError>;

    async fn load_service_account(&self, access_key: &str) -> Result<ServiceAccount, IamError>;
}

/// Process-wide IAM cache.
pub struct IamSys {
    store: std::sync::Arc<dyn IamStore>,
    policies: RwLock<HashMap<String, PolicyDocument>>,
    users: RwLock<HashMap<String, UserInfo>>,
    groups: RwLock<HashMap<String, GroupInfo>>,
    service_accounts: RwLock<HashMap<String, ServiceAccount>>,
    /// user-or-group name to policy name; group mappings keyed separately.
    user_mappings: RwLock<HashMap<String, String>>,
    group_mappings: RwLock<HashMap<String, String>>,
}

impl IamSys {
    pub fn new(store: std::sync::Arc<dyn IamStore>) -> Self {
        Self {
            store,
            policies: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            service_accounts: RwLock::new(HashMap::new()),
            user_mappings: RwLock::new(HashMap::new()),
            group_mappings: RwLock::new(HashMap::new()),
        }
    }

    /// Evicts a policy and every mapping that referenced it.
    pub async fn delete_policy(&self, name: &str) -> Result<(), IamError> {
        self.policies.write().await.remove(name);
        self.user_mappings
            .write()
            .await
            .retain(|_, policy| policy != name);
        self.group_mappings
            .write()
            .await
            .retain(|_, policy| policy != name);
        Ok(())
    }

    pub async fn load_policy(&self, name: &str) -> Result<(), IamError> {
        let policy = self.store.load_policy(name).await?;
        self.policies.write().await.insert(name.to_string(), policy);
        Ok(())
    }

    pub async fn load_policy_mapping(
        &self,
        user_or_group: &str,
        is_group: bool,
    ) -> Result<(), IamError> {
        let policy = self.store.load_policy_mapping(user_or_group, is_group).await?;
        if is_group {
            self.group_mappings
                .write()
                .await
                .insert(user_or_group.to_string(), policy);
        } else {
            self.user_mappings
                .write()
                .await
                .insert(user_or_group.to_string(), policy);
        }
        Ok(())
    }

    /// Evicts a user, its policy mapping and any service accounts it owns.
    pub async fn delete_user(&self, access_key: &str) -> Result<(), IamError> {
        self.users.write().await.remove(access_key);
        self.user_mappings.write().await.remove(access_key);
        self.service_accounts
            .write()
            .await
            .retain(|_, sa| sa.parent_user != access_key);
        Ok(())
    }

    pub async fn load_user(&self, access_key: &str, user_type: UserType) -> Result<(), IamError> {
        let user = self.store.load_user(access_key, user_type).await?;
        self.users.write().await.insert(access_key.to_string(), user);
        Ok(())
    }

    pub async fn delete_service_account(&self, access_key: &str) -> Result<(), IamError> {
        self.service_accounts.write().await.remove(access_key);
        Ok(())
    }

    pub async fn load_service_account(&self, access_key: &str) -> Result<(), IamError> {
        let account = self.store.load_service_account(access_key).await?;
        self.service_accounts
            .write()
            .await
            .insert(access_key.to_string(), account);
        Ok(())
    }

    /// Reloads a group; a group gone from the store is evicted.
    pub async fn load_group(&self, name: &str) -> Result<(), IamError> {
        match self.store.load_group(name).await {
            Ok(group) => {
                self.groups.write().await.insert(name.to_string(), group);
                Ok(())
            }
            Err(IamError::GroupNotFound(_)) => {
                self.groups.write().await.remove(name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn policy(&self, name: &str) -> Option<PolicyDocument> {
        self.policies.read().await.get(name).cloned()
    }

    pub async fn user(&self, access_key: &str) -> Option<UserInfo> {
        self.users.read().await.get(access_key).cloned()
    }

    pub async fn group(&self, name: &str) -> Option<GroupInfo> {
        self.groups.read().await.get(name).cloned()
    }

    pub async fn service_account(&self, access_key: &str) -> Option<ServiceAccount> {
        self.service_accounts.read().await.get(access_key).cloned()
    }

    pub async fn user_policy(&self, user: &str) -> Option<String> {
        self.user_mappings.read().await.get(user).cloned()
    }
}

/// IAM store backed by plain maps, for tests and standalone nodes.
#[derive(Default)]
pub struct MemoryIamStore {
    pub policies: StdRwLock<HashMap<String, PolicyDocument>>,
    pub mappings: StdRwLock<HashMap<(String, bool), String>>,
    pub users: StdRwLock<HashMap<String, UserInfo>>,
    pub groups: StdRwLock<HashMap<String, GroupInfo>>,
    pub service_accounts: StdRwLock<HashMap<String, ServiceAccount>>,
}

impl MemoryIamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_policy(&self, name: &str, document: Value) {
        self.policies.write().expect("poisoned").insert(
            name.to_string(),
            PolicyDocument {
                name: name.to_string(),
                document,
            },
        );
    }

    pub fn put_user(&self, access_key: &str, user_type: UserType) {
        self.users.write().expect("poisoned").insert(
            access_key.to_string(),
            UserInfo {
                access_key: access_key.to_string(),
                user_type,
                enabled: true,
            },
        );
    }
}

#[async_trait]
impl IamStore for MemoryIamStore {
    async fn load_policy(&self, name: &str) -> Result<PolicyDocument, IamError> {
        self.policies
            .read()
            .expect("poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| IamError::PolicyNotFound(name.to_string()))
    }

    async fn load_policy_mapping(
        &self,
        user_or_group: &str,
        is_group: bool,
    ) -> Result<String, IamError> {
        self.mappings
            .read()
            .expect("poisoned")
            .get(&(user_or_group.to_string(), is_group))
            .cloned()
            .ok_or_else(|| IamError::PolicyNotFound(user_or_group.to_string()))
    }

    async fn load_user(&self, access_key: &str, _user_type: UserType) -> Result<UserInfo, IamError> {
        self.users
            .read()
            .expect("poisoned")
            .get(access_key)
            .cloned()
            .ok_or_else(|| IamError::UserNotFound(access_key.to_string()))
    }

    async fn load_group(&self, name: &str) -> Result<GroupInfo, IamError> {
        self.groups
            .read()
            .expect("poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| IamError::GroupNotFound(name.to_string()))
    }

    async fn load_service_account(&self, access_key: &str) -> Result<ServiceAccount, IamError> {
        self.service_accounts
            .read()
            .expect("poisoned")
            .get(access_key)
            .cloned()
            .ok_or_else(|| IamError::ServiceAccountNotFound(access_key.to_string()))
    }
}
