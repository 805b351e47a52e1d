use std::fmt;

use crate::config::TelegramConfig;
use crate::error::ConfigError;

/// Chat id of a privileged recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdminId(pub i64);

impl fmt::Display for AdminId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered, de-duplicated recipients, fixed for the life of the process.
///
/// The iteration order is the configured order with later duplicates
/// dropped; fan-out and the startup announcement both walk it, so logs
/// line up across runs.
#[derive(Debug, Clone)]
pub struct AdminSet {
    ids: Vec<AdminId>,
}

impl AdminSet {
    pub fn load(config: &TelegramConfig) -> Result<Self, ConfigError> {
        Self::from_ids(config.admin_ids.iter().copied())
    }

    pub fn from_ids<I>(ids: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut unique: Vec<AdminId> = Vec::new();
        for id in ids {
            let id = AdminId(id);
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        if unique.is_empty() {
            return Err(ConfigError::NoAdmins);
        }
        Ok(Self { ids: unique })
    }

    pub fn iter(&self) -> impl Iterator<Item = AdminId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}
