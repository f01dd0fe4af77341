//! Configuration registry: catalog storage and the read-through cache

use std::sync::Arc;

use serde::Deserialize;
use sqlx::{FromRow, PgPool};
use tokio::sync::RwLock;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::{
    CarrierEntry, CatalogScope, Catalogs, OrderType, OrderTypeEntry, StateDefinition,
};

/// Read-through cache of the catalogs
///
/// Loaded on first use and dropped by `invalidate` after every catalog write.
#[derive(Clone, Default)]
pub struct CatalogCache {
    inner: Arc<RwLock<Option<Arc<Catalogs>>>>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load(&self, db: &PgPool) -> AppResult<Arc<Catalogs>> {
        if let Some(catalogs) = self.cached().await {
            return Ok(catalogs);
        }

        let mut slot = self.inner.write().await;
        if let Some(catalogs) = slot.as_ref() {
            return Ok(catalogs.clone());
        }
        let loaded = Arc::new(CatalogService::new(db.clone()).load().await?);
        *slot = Some(loaded.clone());
        Ok(loaded)
    }

    pub async fn cached(&self) -> Option<Arc<Catalogs>> {
        self.inner.read().await.clone()
    }

    #[cfg(test)]
    async fn store(&self, catalogs: Catalogs) -> Arc<Catalogs> {
        let catalogs = Arc::new(catalogs);
        *self.inner.write().await = Some(catalogs.clone());
        catalogs
    }

    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
        tracing::debug!("Catalog cache invalidated");
    }
}

#[derive(Debug, FromRow)]
struct StateRow {
    scope: String,
    slug: String,
    label: String,
    display_order: i32,
    terminal: bool,
    active: bool,
}

#[derive(Debug, FromRow)]
struct CarrierRow {
    slug: String,
    label: String,
    own_fleet: bool,
    requires_tracking: bool,
    display_order: i32,
    active: bool,
}

#[derive(Debug, FromRow)]
struct OrderTypeRow {
    code: String,
    label: String,
    active: bool,
}

/// Input for creating or updating a workflow state label
#[derive(Debug, Deserialize, Validate)]
pub struct UpsertStateInput {
    pub scope: CatalogScope,
    #[validate(length(min = 1, max = 50, message = "slug is required"))]
    pub slug: String,
    #[validate(length(min = 1, max = 100, message = "label is required"))]
    pub label: String,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub terminal: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Input for creating or updating a carrier
#[derive(Debug, Deserialize, Validate)]
pub struct UpsertCarrierInput {
    #[validate(length(min = 1, max = 50, message = "slug is required"))]
    pub slug: String,
    #[validate(length(min = 1, max = 100, message = "label is required"))]
    pub label: String,
    #[serde(default)]
    pub own_fleet: bool,
    #[serde(default)]
    pub requires_tracking: bool,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Input for relabelling or disabling an order type
#[derive(Debug, Deserialize, Validate)]
pub struct UpsertOrderTypeInput {
    pub code: OrderType,
    #[validate(length(min = 1, max = 100, message = "label is required"))]
    pub label: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Catalog service for reading and maintaining the registry tables
#[derive(Clone)]
pub struct CatalogService {
    db: PgPool,
}

impl CatalogService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Read all catalogs, filling empty ones with the built-in defaults
    pub async fn load(&self) -> AppResult<Catalogs> {
        let states = sqlx::query_as::<_, StateRow>(
            r#"
            SELECT scope, slug, label, display_order, terminal, active
            FROM config_states
            ORDER BY scope, display_order, slug
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let carriers = sqlx::query_as::<_, CarrierRow>(
            r#"
            SELECT slug, label, own_fleet, requires_tracking, display_order, active
            FROM config_carriers
            ORDER BY display_order, slug
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let order_types = sqlx::query_as::<_, OrderTypeRow>(
            "SELECT code, label, active FROM config_order_types ORDER BY code",
        )
        .fetch_all(&self.db)
        .await?;

        let catalogs = Catalogs {
            states: states
                .into_iter()
                .filter_map(|row| match CatalogScope::from_str(&row.scope) {
                    Some(scope) => Some(StateDefinition {
                        scope,
                        slug: row.slug,
                        label: row.label,
                        display_order: row.display_order,
                        terminal: row.terminal,
                        active: row.active,
                    }),
                    None => {
                        tracing::warn!(scope = %row.scope, slug = %row.slug, "Ignoring state with unknown scope");
                        None
                    }
                })
                .collect(),
            carriers: carriers
                .into_iter()
                .map(|row| CarrierEntry {
                    slug: row.slug,
                    label: row.label,
                    own_fleet: row.own_fleet,
                    requires_tracking: row.requires_tracking,
                    display_order: row.display_order,
                    active: row.active,
                })
                .collect(),
            order_types: order_types
                .into_iter()
                .map(|row| OrderTypeEntry {
                    code: row.code,
                    label: row.label,
                    active: row.active,
                })
                .collect(),
        };

        let empty = catalogs.empty_sections();
        if !empty.is_empty() {
            tracing::warn!(sections = ?empty, "Catalogs empty, using built-in defaults");
        }

        Ok(catalogs.with_defaults_for_empty())
    }

    pub async fn upsert_state(&self, input: UpsertStateInput) -> AppResult<StateDefinition> {
        let slug = input.slug.trim().to_lowercase();
        if !input.scope.knows_slug(&slug) {
            return Err(AppError::Validation {
                field: "slug".to_string(),
                message: format!("'{}' is not a {} state", slug, input.scope.as_str()),
                message_es: format!("'{}' no es un estado válido", slug),
            });
        }

        let row = sqlx::query_as::<_, StateRow>(
            r#"
            INSERT INTO config_states (scope, slug, label, display_order, terminal, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (scope, slug) DO UPDATE
            SET label = EXCLUDED.label,
                display_order = EXCLUDED.display_order,
                terminal = EXCLUDED.terminal,
                active = EXCLUDED.active
            RETURNING scope, slug, label, display_order, terminal, active
            "#,
        )
        .bind(input.scope.as_str())
        .bind(&slug)
        .bind(input.label.trim())
        .bind(input.display_order)
        .bind(input.terminal)
        .bind(input.active)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(scope = %row.scope, slug = %row.slug, "Workflow state saved");

        Ok(StateDefinition {
            scope: input.scope,
            slug: row.slug,
            label: row.label,
            display_order: row.display_order,
            terminal: row.terminal,
            active: row.active,
        })
    }

    pub async fn upsert_carrier(&self, input: UpsertCarrierInput) -> AppResult<CarrierEntry> {
        let slug = input.slug.trim().to_uppercase().replace([' ', '-'], "_");

        let row = sqlx::query_as::<_, CarrierRow>(
            r#"
            INSERT INTO config_carriers (slug, label, own_fleet, requires_tracking, display_order, active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (slug) DO UPDATE
            SET label = EXCLUDED.label,
                own_fleet = EXCLUDED.own_fleet,
                requires_tracking = EXCLUDED.requires_tracking,
                display_order = EXCLUDED.display_order,
                active = EXCLUDED.active
            RETURNING slug, label, own_fleet, requires_tracking, display_order, active
            "#,
        )
        .bind(&slug)
        .bind(input.label.trim())
        .bind(input.own_fleet)
        .bind(input.requires_tracking)
        .bind(input.display_order)
        .bind(input.active)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(slug = %row.slug, "Carrier saved");

        Ok(CarrierEntry {
            slug: row.slug,
            label: row.label,
            own_fleet: row.own_fleet,
            requires_tracking: row.requires_tracking,
            display_order: row.display_order,
            active: row.active,
        })
    }

    pub async fn upsert_order_type(&self, input: UpsertOrderTypeInput) -> AppResult<OrderTypeEntry> {
        let row = sqlx::query_as::<_, OrderTypeRow>(
            r#"
            INSERT INTO config_order_types (code, label, active)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO UPDATE
            SET label = EXCLUDED.label, active = EXCLUDED.active
            RETURNING code, label, active
            "#,
        )
        .bind(input.code.code())
        .bind(input.label.trim())
        .bind(input.active)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(code = %row.code, "Order type saved");

        Ok(OrderTypeEntry {
            code: row.code,
            label: row.label,
            active: row.active,
        })
    }
}
