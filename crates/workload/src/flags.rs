//! Feature and capacity signals
//!
//! Operators flip these to drain a dataplane group or shed its load without
//! redeploying. The engine only reads them, and reads them on every check so a
//! change takes effect on the next controller tick.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::PgPool;
use tracing::warn;

use crate::workload::WorkloadPriority;

/// Group name whose row applies to every group without its own
pub const ALL_GROUPS: &str = "*";

/// Flags consulted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Whether the launch queue for a group/priority should consume work
    QueueConsumerEnabled,
    /// Whether the launcher should reject new workloads for a group
    LoadShed,
}

impl Flag {
    /// Stored flag name
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::QueueConsumerEnabled => "queue_consumer_enabled",
            Flag::LoadShed => "load_shed",
        }
    }

    /// Value when nothing is configured for the group
    pub fn default_value(&self) -> bool {
        match self {
            Flag::QueueConsumerEnabled => true,
            Flag::LoadShed => false,
        }
    }
}

/// Evaluation context for a flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagContext {
    pub dataplane_group: String,
    pub priority: Option<WorkloadPriority>,
}

impl FlagContext {
    pub fn group(dataplane_group: impl Into<String>) -> Self {
        Self {
            dataplane_group: dataplane_group.into(),
            priority: None,
        }
    }

    pub fn queue(dataplane_group: impl Into<String>, priority: WorkloadPriority) -> Self {
        Self {
            dataplane_group: dataplane_group.into(),
            priority: Some(priority),
        }
    }
}

// ============================================================================
// Flag Source
// ============================================================================

/// Source of flag values
#[async_trait]
pub trait FeatureFlagClient: Send + Sync + 'static {
    async fn is_enabled(&self, flag: Flag, context: &FlagContext) -> bool;
}

/// Flag values held in process, adjustable at runtime
///
/// Consumers are enabled and load shedding is off unless a group is listed.
#[derive(Debug, Default)]
pub struct StaticFeatureFlags {
    disabled_groups: RwLock<HashSet<String>>,
    load_shed_groups: RwLock<HashSet<String>>,
}

impl StaticFeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with consumers disabled for these groups
    pub fn with_disabled_groups<I, S>(self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled_groups
            .write()
            .extend(groups.into_iter().map(Into::into));
        self
    }

    /// Start with load shedding on for these groups
    pub fn with_load_shed_groups<I, S>(self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.load_shed_groups
            .write()
            .extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn set_consumer_enabled(&self, group: &str, enabled: bool) {
        let mut disabled = self.disabled_groups.write();
        if enabled {
            disabled.remove(group);
        } else {
            disabled.insert(group.to_string());
        }
    }

    pub fn set_load_shed(&self, group: &str, shed: bool) {
        let mut groups = self.load_shed_groups.write();
        if shed {
            groups.insert(group.to_string());
        } else {
            groups.remove(group);
        }
    }
}

#[async_trait]
impl FeatureFlagClient for StaticFeatureFlags {
    async fn is_enabled(&self, flag: Flag, context: &FlagContext) -> bool {
        match flag {
            Flag::QueueConsumerEnabled => !self
                .disabled_groups
                .read()
                .contains(&context.dataplane_group),
            Flag::LoadShed => self
                .load_shed_groups
                .read()
                .contains(&context.dataplane_group),
        }
    }
}

// ============================================================================
// PostgreSQL
// ============================================================================

/// Flags stored in the `dataplane_group_flag` table
///
/// A row for the group wins over the `*` row. With neither, or when the
/// database cannot be read, the flag's default applies.
#[derive(Clone)]
pub struct PostgresFeatureFlags {
    pool: PgPool,
}

impl PostgresFeatureFlags {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stored value for a group, `None` when no row matches
    pub async fn lookup(&self, flag: Flag, group: &str) -> Result<Option<bool>, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT enabled
            FROM dataplane_group_flag
            WHERE flag = $1 AND dataplane_group IN ($2, $3)
            ORDER BY dataplane_group = $3
            LIMIT 1
            "#,
        )
        .bind(flag.as_str())
        .bind(group)
        .bind(ALL_GROUPS)
        .fetch_optional(&self.pool)
        .await
    }

    /// Write a flag for a group, or every group with [`ALL_GROUPS`]
    pub async fn set(&self, flag: Flag, group: &str, enabled: bool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO dataplane_group_flag (flag, dataplane_group, enabled)
            VALUES ($1, $2, $3)
            ON CONFLICT (flag, dataplane_group)
            DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = NOW()
            "#,
        )
        .bind(flag.as_str())
        .bind(group)
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a group's override
    pub async fn clear(&self, flag: Flag, group: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM dataplane_group_flag WHERE flag = $1 AND dataplane_group = $2")
            .bind(flag.as_str())
            .bind(group)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FeatureFlagClient for PostgresFeatureFlags {
    async fn is_enabled(&self, flag: Flag, context: &FlagContext) -> bool {
        match self.lookup(flag, &context.dataplane_group).await {
            Ok(Some(enabled)) => enabled,
            Ok(None) => flag.default_value(),
            Err(e) => {
                warn!(
                    flag = flag.as_str(),
                    group = %context.dataplane_group,
                    "Failed to read flag, using default: {}",
                    e
                );
                flag.default_value()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sqlx::postgres::PgPoolOptions;

    use super::*;

    #[tokio::test]
    async fn test_defaults() {
        let flags = StaticFeatureFlags::new();
        assert!(
            flags
                .is_enabled(Flag::QueueConsumerEnabled, &FlagContext::group("g1"))
                .await
        );
        assert!(!flags.is_enabled(Flag::LoadShed, &FlagContext::group("g1")).await);
    }

    #[tokio::test]
    async fn test_runtime_toggles() {
        let flags = StaticFeatureFlags::new().with_load_shed_groups(["g2"]);
        let ctx = FlagContext::queue("g1", WorkloadPriority::High);

        flags.set_consumer_enabled("g1", false);
        assert!(!flags.is_enabled(Flag::QueueConsumerEnabled, &ctx).await);
        flags.set_consumer_enabled("g1", true);
        assert!(flags.is_enabled(Flag::QueueConsumerEnabled, &ctx).await);

        assert!(flags.is_enabled(Flag::LoadShed, &FlagContext::group("g2")).await);
        flags.set_load_shed("g2", false);
        assert!(!flags.is_enabled(Flag::LoadShed, &FlagContext::group("g2")).await);
    }

    #[test]
    fn test_stored_names() {
        assert_eq!(Flag::QueueConsumerEnabled.as_str(), "queue_consumer_enabled");
        assert_eq!(Flag::LoadShed.as_str(), "load_shed");
    }

    #[tokio::test]
    async fn test_unreachable_database_reads_defaults() {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://launcher@127.0.0.1:1/flags")
            .unwrap();
        let flags = PostgresFeatureFlags::new(pool);
        let ctx = FlagContext::group("g1");

        assert!(flags.is_enabled(Flag::QueueConsumerEnabled, &ctx).await);
        assert!(!flags.is_enabled(Flag::LoadShed, &ctx).await);
    }
}
