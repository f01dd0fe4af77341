//! Configuration catalogs: workflow states, carriers and order types
//!
//! The registry in the database narrows and labels the states the workflow
//! knows about. When a catalog (or one state scope) is empty the hardcoded
//! defaults below are used instead.

use serde::{Deserialize, Serialize};

use super::{LineState, OrderState, OrderType, ShipmentState};

/// Carrier used when the input is blank
pub const DEFAULT_CARRIER: &str = "PESCO";
/// Carrier used when the input matches nothing in the catalog
pub const FALLBACK_CARRIER: &str = "OTRO";

/// Which workflow a state belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogScope {
    Order,
    Line,
    Shipment,
}

impl CatalogScope {
    pub const ALL: [CatalogScope; 3] = [CatalogScope::Order, CatalogScope::Line, CatalogScope::Shipment];

    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogScope::Order => "order",
            CatalogScope::Line => "line",
            CatalogScope::Shipment => "shipment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        CatalogScope::ALL.into_iter().find(|scope| scope.as_str() == s)
    }

    /// Whether the workflow has rules for `slug` in this scope
    pub fn knows_slug(&self, slug: &str) -> bool {
        match self {
            CatalogScope::Order => OrderState::from_str(slug).is_some(),
            CatalogScope::Line => LineState::from_str(slug).is_some(),
            CatalogScope::Shipment => ShipmentState::from_str(slug).is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDefinition {
    pub scope: CatalogScope,
    pub slug: String,
    pub label: String,
    pub display_order: i32,
    pub terminal: bool,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierEntry {
    pub slug: String,
    pub label: String,
    pub own_fleet: bool,
    /// Units shipped with this carrier need a tracking number before leaving
    pub requires_tracking: bool,
    pub display_order: i32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTypeEntry {
    pub code: String,
    pub label: String,
    pub active: bool,
}

/// Snapshot of every catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalogs {
    pub states: Vec<StateDefinition>,
    pub carriers: Vec<CarrierEntry>,
    pub order_types: Vec<OrderTypeEntry>,
}

impl Catalogs {
    /// Hardcoded minimal catalogs
    pub fn defaults() -> Self {
        Self {
            states: default_states(),
            carriers: default_carriers(),
            order_types: default_order_types(),
        }
    }

    /// Fill every empty catalog, and every empty state scope, with the defaults.
    pub fn with_defaults_for_empty(mut self) -> Self {
        for scope in CatalogScope::ALL {
            if !self.states.iter().any(|s| s.scope == scope) {
                self.states
                    .extend(default_states().into_iter().filter(|s| s.scope == scope));
            }
        }
        if self.carriers.is_empty() {
            self.carriers = default_carriers();
        }
        if self.order_types.is_empty() {
            self.order_types = default_order_types();
        }
        self
    }

    /// Scopes, carriers or order types that had to be filled from defaults
    pub fn empty_sections(&self) -> Vec<&'static str> {
        let mut empty = Vec::new();
        for scope in CatalogScope::ALL {
            if !self.states.iter().any(|s| s.scope == scope) {
                empty.push(scope.as_str());
            }
        }
        if self.carriers.is_empty() {
            empty.push("carriers");
        }
        if self.order_types.is_empty() {
            empty.push("order_types");
        }
        empty
    }

    /// A state is valid when the workflow knows it and the catalog has it active.
    pub fn is_valid_state(&self, scope: CatalogScope, slug: &str) -> bool {
        scope.knows_slug(slug)
            && self
                .states
                .iter()
                .any(|s| s.scope == scope && s.slug == slug && s.active)
    }

    pub fn state_label(&self, scope: CatalogScope, slug: &str) -> String {
        self.states
            .iter()
            .find(|s| s.scope == scope && s.slug == slug)
            .map(|s| s.label.clone())
            .unwrap_or_else(|| humanize_slug(slug))
    }

    pub fn carrier(&self, slug: &str) -> Option<&CarrierEntry> {
        self.carriers.iter().find(|c| c.slug == slug)
    }

    pub fn carrier_label(&self, slug: &str) -> String {
        self.carrier(slug)
            .map(|c| c.label.clone())
            .unwrap_or_else(|| humanize_slug(slug))
    }

    /// Resolve carrier input by slug or label; blank means own fleet.
    pub fn normalize_carrier(&self, input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return DEFAULT_CARRIER.to_string();
        }
        let wanted = trimmed.to_uppercase().replace([' ', '-'], "_");
        self.carriers
            .iter()
            .filter(|c| c.active)
            .find(|c| c.slug == wanted || c.label.eq_ignore_ascii_case(trimmed))
            .map(|c| c.slug.clone())
            .unwrap_or_else(|| FALLBACK_CARRIER.to_string())
    }

    pub fn requires_tracking(&self, carrier_slug: &str) -> bool {
        self.carrier(carrier_slug).is_some_and(|c| c.requires_tracking)
    }

    pub fn order_type_allowed(&self, order_type: OrderType) -> bool {
        self.order_types
            .iter()
            .any(|t| t.code == order_type.code() && t.active)
    }

    pub fn order_type_label(&self, order_type: OrderType) -> String {
        self.order_types
            .iter()
            .find(|t| t.code == order_type.code())
            .map(|t| t.label.clone())
            .unwrap_or_else(|| order_type.label().to_string())
    }
}

/// `ready_for_dispatch` -> `Ready For Dispatch`
pub fn humanize_slug(slug: &str) -> String {
    slug.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn state(scope: CatalogScope, slug: &str, label: &str, display_order: i32, terminal: bool) -> StateDefinition {
    StateDefinition {
        scope,
        slug: slug.to_string(),
        label: label.to_string(),
        display_order,
        terminal,
        active: true,
    }
}

pub fn default_states() -> Vec<StateDefinition> {
    use CatalogScope::*;
    vec![
        state(Order, "pending", "Pendiente", 10, false),
        state(Order, "preparing", "En preparación", 20, false),
        state(Order, "ready_for_packing", "Listo para embalaje", 30, false),
        state(Order, "ready_for_dispatch", "Listo para despacho", 40, false),
        state(Order, "in_transit", "En ruta", 50, false),
        state(Order, "dispatched", "Despachado", 60, true),
        state(Order, "cancelled", "Cancelado", 70, true),
        state(Line, "pending", "Pendiente", 10, false),
        state(Line, "preparing", "Preparando", 20, false),
        state(Line, "prepared", "Preparado", 30, false),
        state(Shipment, "pending", "Pendiente", 10, false),
        state(Shipment, "packed", "Embalado", 20, false),
        state(Shipment, "ready_for_dispatch", "Listo para despacho", 30, false),
        state(Shipment, "in_transit", "En ruta", 40, false),
        state(Shipment, "delivered", "Entregado", 50, false),
        state(Shipment, "finalized", "Finalizado", 60, true),
        state(Shipment, "cancelled", "Cancelado", 70, true),
    ]
}

pub fn default_carriers() -> Vec<CarrierEntry> {
    [
        ("PESCO", "Camión PESCO", true, false, 10),
        ("VARMONTT", "Varmontt", false, false, 20),
        ("STARKEN", "Starken", false, true, 30),
        ("KAIZEN", "Kaizen", false, true, 40),
        ("RETIRA_CLIENTE", "Retira cliente", false, false, 50),
        ("OTRO", "Otro coordinado", false, true, 60),
    ]
    .into_iter()
    .map(|(slug, label, own_fleet, requires_tracking, display_order)| CarrierEntry {
        slug: slug.to_string(),
        label: label.to_string(),
        own_fleet,
        requires_tracking,
        display_order,
        active: true,
    })
    .collect()
}

pub fn default_order_types() -> Vec<OrderTypeEntry> {
    OrderType::ALL
        .into_iter()
        .map(|t| OrderTypeEntry {
            code: t.code().to_string(),
            label: t.label().to_string(),
            active: true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_catalogs_fall_back_to_defaults() {
        let catalogs = Catalogs::default();
        assert_eq!(catalogs.empty_sections().len(), 5);
        let filled = catalogs.with_defaults_for_empty();
        assert_eq!(filled, Catalogs::defaults());
        assert!(filled.empty_sections().is_empty());
    }

    #[test]
    fn test_only_empty_scope_is_filled() {
        let catalogs = Catalogs {
            states: vec![state(CatalogScope::Order, "pending", "Abierta", 1, false)],
            ..Default::default()
        }
        .with_defaults_for_empty();

        let in_scope = |scope: CatalogScope| catalogs.states.iter().filter(|s| s.scope == scope).count();
        assert_eq!(in_scope(CatalogScope::Order), 1);
        assert_eq!(catalogs.state_label(CatalogScope::Order, "pending"), "Abierta");
        assert_eq!(in_scope(CatalogScope::Line), 3);
    }

    #[test]
    fn test_valid_state_needs_known_and_active_slug() {
        let mut catalogs = Catalogs::defaults();
        assert!(catalogs.is_valid_state(CatalogScope::Shipment, "finalized"));
        assert!(!catalogs.is_valid_state(CatalogScope::Shipment, "lost"));

        catalogs.states.push(state(CatalogScope::Shipment, "lost", "Perdido", 80, true));
        assert!(!catalogs.is_valid_state(CatalogScope::Shipment, "lost"));

        for s in catalogs.states.iter_mut() {
            if s.scope == CatalogScope::Shipment && s.slug == "delivered" {
                s.active = false;
            }
        }
        assert!(!catalogs.is_valid_state(CatalogScope::Shipment, "delivered"));
    }

    #[test]
    fn test_state_label_falls_back_to_humanized_slug() {
        let catalogs = Catalogs::default();
        assert_eq!(
            catalogs.state_label(CatalogScope::Order, "ready_for_dispatch"),
            "Ready For Dispatch"
        );
    }

    #[test]
    fn test_normalize_carrier() {
        let catalogs = Catalogs::defaults();
        assert_eq!(catalogs.normalize_carrier(""), "PESCO");
        assert_eq!(catalogs.normalize_carrier("starken"), "STARKEN");
        assert_eq!(catalogs.normalize_carrier("Retira cliente"), "RETIRA_CLIENTE");
        assert_eq!(catalogs.normalize_carrier("retira-cliente"), "RETIRA_CLIENTE");
        assert_eq!(catalogs.normalize_carrier("DHL"), "OTRO");
    }

    #[test]
    fn test_carrier_flags() {
        let catalogs = Catalogs::defaults();
        assert!(catalogs.requires_tracking("STARKEN"));
        assert!(!catalogs.requires_tracking("PESCO"));
        assert!(catalogs.carrier("PESCO").is_some_and(|c| c.own_fleet));
    }

    #[test]
    fn test_order_type_catalog() {
        let mut catalogs = Catalogs::defaults();
        assert!(catalogs.order_type_allowed(OrderType::Emergency));
        catalogs.order_types.retain(|t| t.code != "EM");
        assert!(!catalogs.order_type_allowed(OrderType::Emergency));
    }
}
