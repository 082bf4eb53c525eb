//! Users and their accounts.

use std::collections::HashSet;

use uuid::Uuid;

use crate::error::{DaemonError, DaemonResult};

use super::id::{derive_alternates, SecretKey};

/// A registered user.
#[derive(Debug, Clone)]
pub struct User {
    /// Contact address, used only for identification in logs.
    pub email: String,
    /// User level, passed through to the routing layer untouched.
    pub level: u32,
    pub account: Account,
}

/// The account attached to a user.
#[derive(Debug, Clone)]
pub enum Account {
    Vmess(VmessAccount),
    /// An account of a protocol this validator does not understand.
    Unsupported { kind: String },
}

/// A VMess account: one primary id plus derived alternate ids.
#[derive(Debug, Clone)]
pub struct VmessAccount {
    id: Uuid,
    primary: SecretKey,
    alternates: Vec<SecretKey>,
}

/// The secret keys a user authenticates with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub primary: SecretKey,
    /// Alternate keys, in derivation order.
    pub alternates: Vec<SecretKey>,
}

impl Credential {
    /// All keys, primary first.
    pub fn keys(&self) -> impl Iterator<Item = &SecretKey> {
        std::iter::once(&self.primary).chain(self.alternates.iter())
    }
}

impl VmessAccount {
    /// Create an account for `id` with `alter_id_count` derived alternate ids.
    pub fn new(id: Uuid, alter_id_count: u16) -> Self {
        let primary = SecretKey::from(id);
        Self {
            id,
            primary,
            alternates: derive_alternates(&primary, alter_id_count),
        }
    }

    /// Create an account with an explicit list of alternate keys.
    pub fn with_alternates(id: Uuid, alternates: Vec<SecretKey>) -> Self {
        Self {
            id,
            primary: SecretKey::from(id),
            alternates,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn primary(&self) -> &SecretKey {
        &self.primary
    }

    pub fn alternates(&self) -> &[SecretKey] {
        &self.alternates
    }
}

impl User {
    pub fn new(email: impl Into<String>, account: Account) -> Self {
        Self {
            email: email.into(),
            level: 0,
            account,
        }
    }

    /// Create a user holding a VMess account.
    pub fn vmess(email: impl Into<String>, id: Uuid, alter_id_count: u16) -> Self {
        Self::new(email, Account::Vmess(VmessAccount::new(id, alter_id_count)))
    }

    /// Extract the credential this user authenticates with.
    ///
    /// Fails with an account type error if the account is not a VMess account
    /// or if its keys are not pairwise distinct.
    pub fn credential(&self) -> DaemonResult<Credential> {
        let account = match &self.account {
            Account::Vmess(account) => account,
            Account::Unsupported { kind } => {
                return Err(DaemonError::account_type(&self.email, kind.as_str()));
            }
        };

        let mut seen = HashSet::with_capacity(account.alternates.len() + 1);
        seen.insert(account.primary);
        for key in &account.alternates {
            if !seen.insert(*key) {
                return Err(DaemonError::account_type(
                    &self.email,
                    "vmess account with duplicate ids",
                ));
            }
        }

        Ok(Credential {
            primary: account.primary,
            alternates: account.alternates.clone(),
        })
    }
}
