//! Workflow rules linking lines, shipment units and the order state
//!
//! Nothing here touches storage. The backend loads the rows involved, asks
//! these functions what should happen and writes the result in the same
//! transaction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{DomainError, DomainResult};
use crate::models::{
    Actor, CatalogScope, Catalogs, LineItem, LineItemChanges, LineState, OrderState,
    ShipmentState, ShipmentUnit, UnitTimestamps,
};

// ============================================================================
// Order state projection
// ============================================================================

/// Counts the order projection is computed from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderProgress {
    pub total_lines: usize,
    pub preparing_lines: usize,
    pub prepared_lines: usize,
    /// Lines linked to a shipment unit
    pub packed_lines: usize,
    /// Most advanced state among the order's non-cancelled units
    pub furthest_unit: Option<ShipmentState>,
}

impl OrderProgress {
    pub fn from_parts(lines: &[LineItem], units: &[ShipmentUnit]) -> Self {
        Self {
            total_lines: lines.len(),
            preparing_lines: lines.iter().filter(|l| l.state == LineState::Preparing).count(),
            prepared_lines: lines.iter().filter(|l| l.state == LineState::Prepared).count(),
            packed_lines: lines.iter().filter(|l| l.is_packed()).count(),
            furthest_unit: units
                .iter()
                .map(|u| u.state)
                .filter(|s| *s != ShipmentState::Cancelled)
                .max_by_key(|s| s.rank()),
        }
    }

    pub fn unlinked_lines(&self) -> usize {
        self.total_lines.saturating_sub(self.packed_lines)
    }
}

fn state_from_units(furthest: Option<ShipmentState>) -> Option<OrderState> {
    match furthest? {
        ShipmentState::Finalized | ShipmentState::Delivered => Some(OrderState::Dispatched),
        ShipmentState::InTransit => Some(OrderState::InTransit),
        ShipmentState::ReadyForDispatch => Some(OrderState::ReadyForDispatch),
        ShipmentState::Pending | ShipmentState::Packed | ShipmentState::Cancelled => None,
    }
}

fn state_from_lines(progress: &OrderProgress) -> OrderState {
    let total = progress.total_lines;
    if total > 0 && progress.packed_lines >= total {
        OrderState::ReadyForDispatch
    } else if total > 0 && progress.prepared_lines >= total {
        OrderState::ReadyForPacking
    } else if progress.prepared_lines + progress.preparing_lines > 0 {
        OrderState::Preparing
    } else {
        OrderState::Pending
    }
}

/// Recompute an order's state from its lines and units.
///
/// The result never ranks below `current`, and a cancelled order stays
/// cancelled.
pub fn project_order_state(current: OrderState, progress: &OrderProgress) -> OrderState {
    if current == OrderState::Cancelled {
        return current;
    }
    let mut projected = current;
    for candidate in [Some(state_from_lines(progress)), state_from_units(progress.furthest_unit)]
        .into_iter()
        .flatten()
    {
        if candidate.rank() > projected.rank() {
            projected = candidate;
        }
    }
    projected
}

// ============================================================================
// Line preparation
// ============================================================================

fn ensure_order_open(order_state: OrderState) -> DomainResult<()> {
    if order_state.is_terminal() {
        return Err(DomainError::State(format!(
            "order is {} and can no longer change",
            order_state
        )));
    }
    Ok(())
}

fn ensure_line_needs_preparation(line: &LineItem, actor: &Actor) -> DomainResult<()> {
    if line.is_staged() {
        return Err(DomainError::State(
            "line already sits in the staging warehouse and needs no preparation".to_string(),
        ));
    }
    if !line.has_warehouse() {
        return Err(DomainError::validation(
            "warehouse_code",
            "assign a warehouse before preparing the line",
        ));
    }
    actor.ensure_can_prepare(&line.warehouse_code)
}

/// Check that `actor` may move `line` from pending to preparing.
pub fn check_start_preparation(
    line: &LineItem,
    order_state: OrderState,
    actor: &Actor,
) -> DomainResult<()> {
    ensure_order_open(order_state)?;
    ensure_line_needs_preparation(line, actor)?;
    if line.state != LineState::Pending {
        return Err(DomainError::State(format!(
            "line is {}; only pending lines can start preparation",
            line.state
        )));
    }
    Ok(())
}

/// Check that `actor` may mark `line` prepared.
pub fn check_mark_prepared(
    line: &LineItem,
    order_state: OrderState,
    actor: &Actor,
) -> DomainResult<()> {
    ensure_order_open(order_state)?;
    ensure_line_needs_preparation(line, actor)?;
    if line.state == LineState::Prepared {
        return Err(DomainError::Conflict(format!("line {} is already prepared", line.id)));
    }
    Ok(())
}

// ============================================================================
// Line maintenance
// ============================================================================

/// Apply an administrator's edit to a line, returning the updated line.
///
/// Moving a line onto the staging warehouse makes it prepared. Prepared or
/// packed lines keep their item, warehouse and quantity: their stock already
/// sits in staging under that item.
pub fn apply_line_changes(
    line: &LineItem,
    changes: &LineItemChanges,
    order_state: OrderState,
    actor: &Actor,
) -> DomainResult<LineItem> {
    actor.ensure_admin("edit order lines")?;
    ensure_order_open(order_state)?;

    let mut updated = line.clone();

    if let Some(item_code) = &changes.item_code {
        let item_code = item_code.trim();
        if item_code.is_empty() {
            return Err(DomainError::validation("item_code", "item code cannot be blank"));
        }
        updated.item_code = item_code.to_string();
    }
    if let Some(description) = &changes.description {
        updated.description = description.trim().to_string();
    }

    let warehouse_changed = changes
        .warehouse_code
        .as_deref()
        .is_some_and(|w| w.trim() != line.warehouse_code.trim());
    let quantity_changed = changes.quantity.is_some_and(|q| q != line.quantity);
    let item_changed = changes
        .item_code
        .as_deref()
        .is_some_and(|c| c.trim() != line.item_code.trim());

    if (item_changed || warehouse_changed || quantity_changed)
        && (line.state == LineState::Prepared || line.is_packed())
    {
        return Err(DomainError::State(
            "prepared or packed lines cannot change item, warehouse or quantity".to_string(),
        ));
    }

    if let Some(quantity) = changes.quantity {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity", "quantity must be greater than zero"));
        }
        updated.quantity = quantity;
    }
    if let Some(warehouse_code) = &changes.warehouse_code {
        updated.warehouse_code = warehouse_code.trim().to_string();
        if updated.is_staged() {
            updated.state = LineState::Prepared;
        }
    }

    Ok(updated)
}

pub fn check_line_deletion(line: &LineItem, actor: &Actor) -> DomainResult<()> {
    actor.ensure_admin("delete order lines")?;
    if line.is_packed() {
        return Err(DomainError::Conflict(format!(
            "line {} is packed in a shipment unit",
            line.id
        )));
    }
    Ok(())
}

// ============================================================================
// Shipment units
// ============================================================================

/// A locked line considered for packing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCandidate {
    pub line_id: i64,
    pub order_id: i64,
    pub state: LineState,
    pub shipment_unit_id: Option<i64>,
    pub order_affects_stock: bool,
}

/// Validate the lines selected for a new unit and return their order id.
pub fn validate_unit_selection(requested: &[i64], found: &[UnitCandidate]) -> DomainResult<i64> {
    if requested.is_empty() {
        return Err(DomainError::validation("line_ids", "select at least one line"));
    }

    if let Some(missing) = requested
        .iter()
        .find(|id| !found.iter().any(|c| c.line_id == **id))
    {
        return Err(DomainError::NotFound(format!("Line item {}", missing)));
    }

    if let Some(linked) = found.iter().find(|c| c.shipment_unit_id.is_some()) {
        return Err(DomainError::Conflict(format!(
            "line {} already belongs to a shipment unit",
            linked.line_id
        )));
    }

    if let Some(unprepared) = found
        .iter()
        .find(|c| c.order_affects_stock && c.state != LineState::Prepared)
    {
        return Err(DomainError::State(format!(
            "line {} is {} and must be prepared before packing",
            unprepared.line_id, unprepared.state
        )));
    }

    let mut orders: Vec<i64> = found.iter().map(|c| c.order_id).collect();
    orders.sort_unstable();
    orders.dedup();
    match orders.as_slice() {
        [order_id] => Ok(*order_id),
        _ => Err(DomainError::validation(
            "line_ids",
            "all lines of a shipment unit must belong to the same order",
        )),
    }
}

/// Writes that follow from moving a unit to a new state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitTransition {
    pub from: ShipmentState,
    pub to: ShipmentState,
    pub timestamps: UnitTimestamps,
    /// Staging stock for the unit's lines must be decremented
    pub decrement_stock: bool,
}

/// Decide whether a unit may move to `target`.
///
/// Units only move forward. Re-setting the current state is accepted so
/// retries are harmless; cancellation is open to any non-terminal unit. Units
/// of a cancelled order can only be cancelled.
pub fn plan_unit_transition(
    unit: &ShipmentUnit,
    order_state: OrderState,
    target: &str,
    actor: &Actor,
    catalogs: &Catalogs,
    now: DateTime<Utc>,
) -> DomainResult<UnitTransition> {
    actor.ensure_can_dispatch()?;

    let to = ShipmentState::from_str(target)
        .filter(|_| catalogs.is_valid_state(CatalogScope::Shipment, target))
        .ok_or_else(|| {
            DomainError::validation("state", format!("'{}' is not a shipment state", target))
        })?;

    if order_state == OrderState::Cancelled && to != ShipmentState::Cancelled {
        return Err(DomainError::State(format!(
            "unit {} belongs to a cancelled order and can only be cancelled",
            unit.code
        )));
    }

    if to == ShipmentState::Finalized {
        actor.ensure_admin("finalize shipment units")?;
    }

    let from = unit.state;
    if from != to {
        if from.is_terminal() {
            return Err(DomainError::State(format!("unit {} is already {}", unit.code, from)));
        }
        if to != ShipmentState::Cancelled && to.rank() < from.rank() {
            return Err(DomainError::State(format!(
                "unit {} cannot move back from {} to {}",
                unit.code, from, to
            )));
        }
        let leaves_warehouse = from.rank() < ShipmentState::InTransit.rank()
            && to.rank() >= ShipmentState::InTransit.rank()
            && to != ShipmentState::Cancelled;
        if leaves_warehouse && catalogs.requires_tracking(&unit.carrier) && !unit.has_tracking() {
            return Err(DomainError::validation(
                "tracking_reference",
                format!("carrier {} requires a tracking number", unit.carrier),
            ));
        }
    }

    Ok(UnitTransition {
        from,
        to,
        timestamps: UnitTimestamps::of(unit).stamp(to, now),
        decrement_stock: to == ShipmentState::Finalized,
    })
}

/// Staging decrement for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchDecrement {
    pub item_code: String,
    pub quantity: i32,
    /// Lines to mark as decremented
    pub line_ids: Vec<i64>,
}

/// Aggregate the decrements owed for `lines`, skipping lines already decremented.
pub fn plan_dispatch_decrements(lines: &[LineItem]) -> Vec<DispatchDecrement> {
    let mut by_item: BTreeMap<&str, DispatchDecrement> = BTreeMap::new();
    for line in lines.iter().filter(|l| l.dispatch_decremented_at.is_none()) {
        let entry = by_item
            .entry(line.item_code.as_str())
            .or_insert_with(|| DispatchDecrement {
                item_code: line.item_code.clone(),
                quantity: 0,
                line_ids: Vec::new(),
            });
        entry.quantity = entry.quantity.saturating_add(line.quantity.max(0));
        entry.line_ids.push(line.id);
    }
    by_item.into_values().collect()
}

// ============================================================================
// Administrative order operations
// ============================================================================

pub fn check_cancellation(current: OrderState, actor: &Actor) -> DomainResult<()> {
    actor.ensure_admin("cancel orders")?;
    if current.is_terminal() {
        return Err(DomainError::State(format!("order is already {}", current)));
    }
    Ok(())
}

/// Validate a manual correction of an order's state and return the target.
pub fn check_state_correction(
    current: OrderState,
    target: &str,
    actor: &Actor,
    catalogs: &Catalogs,
) -> DomainResult<OrderState> {
    actor.ensure_admin("correct order states")?;

    let to = OrderState::from_str(target)
        .filter(|_| catalogs.is_valid_state(CatalogScope::Order, target))
        .ok_or_else(|| {
            DomainError::validation("state", format!("'{}' is not an order state", target))
        })?;

    if to == OrderState::Cancelled {
        return Err(DomainError::State("use the cancel operation to cancel an order".to_string()));
    }
    if current.is_terminal() && to != current {
        return Err(DomainError::State(format!("order is already {}", current)));
    }
    if to.rank() < current.rank() {
        return Err(DomainError::State(format!(
            "order cannot move back from {} to {}",
            current, to
        )));
    }
    Ok(to)
}

// ============================================================================
// Sequential codes
// ============================================================================

pub const TRANSFER_PREFIX: &str = "TRANSFER";
pub const UNIT_PREFIX: &str = "UNIT";

/// `TRANSFER-2026-`
pub fn code_prefix(kind: &str, year: i32) -> String {
    format!("{}-{}-", kind, year)
}

/// One past the highest numeric suffix among `existing` codes carrying `prefix`.
///
/// Gaps are never refilled and codes with a non-numeric suffix are ignored.
pub fn next_sequence<'a>(prefix: &str, existing: impl IntoIterator<Item = &'a str>) -> u32 {
    existing
        .into_iter()
        .filter_map(|code| code.strip_prefix(prefix))
        .filter(|suffix| !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

pub fn transfer_reference(year: i32, sequence: u32) -> String {
    format!("{}{:03}", code_prefix(TRANSFER_PREFIX, year), sequence)
}

pub fn unit_code(year: i32, sequence: u32) -> String {
    format!("{}{:04}", code_prefix(UNIT_PREFIX, year), sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dimensions, Role, UnitKind};
    use chrono::Duration;
    use proptest::prelude::*;
    use uuid::Uuid;

    const OPEN: OrderState = OrderState::ReadyForDispatch;

    fn line(id: i64, state: LineState, warehouse: &str) -> LineItem {
        LineItem {
            id,
            order_id: 5,
            item_code: "X".to_string(),
            description: "Valvula".to_string(),
            quantity: 2,
            warehouse_code: warehouse.to_string(),
            state,
            shipment_unit_id: None,
            prepared_by: None,
            prepared_at: None,
            dispatch_decremented_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn unit(state: ShipmentState, carrier: &str) -> ShipmentUnit {
        ShipmentUnit {
            id: 1,
            code: "UNIT-2026-0001".to_string(),
            order_id: 5,
            kind: UnitKind::Box,
            carrier: carrier.to_string(),
            tracking_reference: None,
            dimensions: Dimensions::default(),
            note: None,
            state,
            packed_at: None,
            dispatched_at: None,
            delivered_at: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn actor(role: Role) -> Actor {
        Actor::new(Uuid::new_v4(), role, vec!["001".to_string()])
    }

    fn candidate(line_id: i64, order_id: i64, state: LineState) -> UnitCandidate {
        UnitCandidate {
            line_id,
            order_id,
            state,
            shipment_unit_id: None,
            order_affects_stock: true,
        }
    }

    #[test]
    fn test_all_prepared_lines_project_ready_for_packing() {
        let progress = OrderProgress {
            total_lines: 2,
            prepared_lines: 2,
            ..Default::default()
        };
        assert_eq!(
            project_order_state(OrderState::Preparing, &progress),
            OrderState::ReadyForPacking
        );
    }

    #[test]
    fn test_partial_preparation_projects_preparing() {
        let progress = OrderProgress {
            total_lines: 3,
            prepared_lines: 1,
            ..Default::default()
        };
        assert_eq!(project_order_state(OrderState::Pending, &progress), OrderState::Preparing);
    }

    #[test]
    fn test_unit_states_drive_order_state() {
        let mut progress = OrderProgress {
            total_lines: 2,
            prepared_lines: 2,
            packed_lines: 2,
            furthest_unit: Some(ShipmentState::InTransit),
            ..Default::default()
        };
        assert_eq!(
            project_order_state(OrderState::ReadyForDispatch, &progress),
            OrderState::InTransit
        );
        progress.furthest_unit = Some(ShipmentState::Delivered);
        assert_eq!(project_order_state(OrderState::InTransit, &progress), OrderState::Dispatched);
    }

    #[test]
    fn test_cancelled_order_stays_cancelled() {
        let progress = OrderProgress {
            total_lines: 1,
            prepared_lines: 1,
            packed_lines: 1,
            furthest_unit: Some(ShipmentState::Finalized),
            ..Default::default()
        };
        assert_eq!(project_order_state(OrderState::Cancelled, &progress), OrderState::Cancelled);
    }

    #[test]
    fn test_progress_ignores_cancelled_units() {
        let lines = vec![line(1, LineState::Prepared, "001")];
        let units = vec![unit(ShipmentState::Cancelled, "PESCO"), unit(ShipmentState::Packed, "PESCO")];
        let progress = OrderProgress::from_parts(&lines, &units);
        assert_eq!(progress.furthest_unit, Some(ShipmentState::Packed));
    }

    #[test]
    fn test_staged_line_cannot_be_prepared() {
        let staged = line(1, LineState::Prepared, "013");
        let result = check_mark_prepared(&staged, OrderState::Pending, &actor(Role::Admin));
        assert!(matches!(result, Err(DomainError::State(_))));
    }

    #[test]
    fn test_prepare_requires_assigned_warehouse() {
        let blank = line(1, LineState::Pending, "");
        let result = check_mark_prepared(&blank, OrderState::Pending, &actor(Role::Admin));
        assert!(matches!(result, Err(DomainError::Validation { .. })));

        let elsewhere = line(2, LineState::Pending, "002");
        let result = check_mark_prepared(&elsewhere, OrderState::Pending, &actor(Role::Warehouse));
        assert!(matches!(result, Err(DomainError::Permission(_))));

        let own = line(3, LineState::Preparing, "001");
        assert!(check_mark_prepared(&own, OrderState::Preparing, &actor(Role::Warehouse)).is_ok());
    }

    #[test]
    fn test_second_prepare_conflicts() {
        let prepared = line(1, LineState::Prepared, "001");
        let result = check_mark_prepared(&prepared, OrderState::Preparing, &actor(Role::Admin));
        assert!(matches!(result, Err(DomainError::Conflict(_))));
    }

    #[test]
    fn test_start_preparation_only_from_pending() {
        let preparing = line(1, LineState::Preparing, "001");
        let result = check_start_preparation(&preparing, OrderState::Preparing, &actor(Role::Admin));
        assert!(matches!(result, Err(DomainError::State(_))));
        let cancelled = check_start_preparation(
            &line(2, LineState::Pending, "001"),
            OrderState::Cancelled,
            &actor(Role::Admin),
        );
        assert!(matches!(cancelled, Err(DomainError::State(_))));
    }

    #[test]
    fn test_moving_line_to_staging_marks_it_prepared() {
        let changes = LineItemChanges {
            warehouse_code: Some("013".to_string()),
            ..Default::default()
        };
        let updated = apply_line_changes(
            &line(1, LineState::Pending, "001"),
            &changes,
            OrderState::Pending,
            &actor(Role::Admin),
        )
        .unwrap();
        assert_eq!(updated.state, LineState::Prepared);
        assert_eq!(updated.warehouse_code, "013");
    }

    #[test]
    fn test_prepared_line_keeps_quantity() {
        let changes = LineItemChanges {
            quantity: Some(9),
            ..Default::default()
        };
        let result = apply_line_changes(
            &line(1, LineState::Prepared, "001"),
            &changes,
            OrderState::ReadyForPacking,
            &actor(Role::Admin),
        );
        assert!(matches!(result, Err(DomainError::State(_))));
    }

    #[test]
    fn test_prepared_or_packed_line_keeps_item() {
        let changes = LineItemChanges {
            item_code: Some("B".to_string()),
            ..Default::default()
        };
        let prepared = line(1, LineState::Prepared, "001");
        let result = apply_line_changes(&prepared, &changes, OrderState::ReadyForPacking, &actor(Role::Admin));
        assert!(matches!(result, Err(DomainError::State(_))));

        let mut packed = line(2, LineState::Prepared, "001");
        packed.quantity = 4;
        packed.shipment_unit_id = Some(9);
        let result = apply_line_changes(&packed, &changes, OPEN, &actor(Role::Admin));
        assert!(matches!(result, Err(DomainError::State(_))));
        assert_eq!(plan_dispatch_decrements(&[packed])[0].item_code, "X");

        let pending = line(3, LineState::Pending, "001");
        let updated = apply_line_changes(&pending, &changes, OrderState::Pending, &actor(Role::Admin))
            .unwrap();
        assert_eq!(updated.item_code, "B");

        let same_item = LineItemChanges {
            item_code: Some(" X ".to_string()),
            description: Some("Cilindro".to_string()),
            ..Default::default()
        };
        let updated = apply_line_changes(&prepared, &same_item, OrderState::ReadyForPacking, &actor(Role::Admin))
            .unwrap();
        assert_eq!(updated.description, "Cilindro");
    }

    #[test]
    fn test_packed_line_cannot_be_deleted() {
        let mut packed = line(1, LineState::Prepared, "001");
        packed.shipment_unit_id = Some(4);
        assert!(matches!(
            check_line_deletion(&packed, &actor(Role::Admin)),
            Err(DomainError::Conflict(_))
        ));
        assert!(matches!(
            check_line_deletion(&line(2, LineState::Pending, "001"), &actor(Role::Dispatch)),
            Err(DomainError::Permission(_))
        ));
    }

    #[test]
    fn test_unit_selection_rules() {
        assert!(matches!(
            validate_unit_selection(&[], &[]),
            Err(DomainError::Validation { .. })
        ));

        let mut linked = candidate(1, 5, LineState::Prepared);
        linked.shipment_unit_id = Some(9);
        assert!(matches!(
            validate_unit_selection(&[1], &[linked]),
            Err(DomainError::Conflict(_))
        ));

        assert!(matches!(
            validate_unit_selection(&[1], &[candidate(1, 5, LineState::Preparing)]),
            Err(DomainError::State(_))
        ));

        let mut exempt = candidate(1, 5, LineState::Pending);
        exempt.order_affects_stock = false;
        assert_eq!(validate_unit_selection(&[1], &[exempt]), Ok(5));

        let spanning = [candidate(1, 5, LineState::Prepared), candidate(2, 6, LineState::Prepared)];
        assert!(matches!(
            validate_unit_selection(&[1, 2], &spanning),
            Err(DomainError::Validation { .. })
        ));

        assert!(matches!(
            validate_unit_selection(&[1, 3], &[candidate(1, 5, LineState::Prepared)]),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn test_only_admin_finalizes() {
        let catalogs = Catalogs::defaults();
        let delivered = unit(ShipmentState::Delivered, "PESCO");
        let result = plan_unit_transition(&delivered, OPEN, "finalized", &actor(Role::Dispatch), &catalogs, Utc::now());
        assert!(matches!(result, Err(DomainError::Permission(_))));

        let plan = plan_unit_transition(&delivered, OPEN, "finalized", &actor(Role::Admin), &catalogs, Utc::now())
            .unwrap();
        assert!(plan.decrement_stock);
    }

    #[test]
    fn test_unit_cannot_move_backward() {
        let catalogs = Catalogs::defaults();
        let in_transit = unit(ShipmentState::InTransit, "PESCO");
        let result = plan_unit_transition(&in_transit, OPEN, "packed", &actor(Role::Dispatch), &catalogs, Utc::now());
        assert!(matches!(result, Err(DomainError::State(_))));

        let same = plan_unit_transition(&in_transit, OPEN, "in_transit", &actor(Role::Dispatch), &catalogs, Utc::now());
        assert!(same.is_ok());
    }

    #[test]
    fn test_cancelled_order_units_only_cancel() {
        let catalogs = Catalogs::defaults();
        let packed = unit(ShipmentState::Packed, "PESCO");
        for target in ["ready_for_dispatch", "in_transit", "delivered", "finalized", "packed"] {
            let result = plan_unit_transition(
                &packed,
                OrderState::Cancelled,
                target,
                &actor(Role::Admin),
                &catalogs,
                Utc::now(),
            );
            assert!(matches!(result, Err(DomainError::State(_))), "{} was allowed", target);
        }

        let plan = plan_unit_transition(
            &packed,
            OrderState::Cancelled,
            "cancelled",
            &actor(Role::Dispatch),
            &catalogs,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(plan.to, ShipmentState::Cancelled);
        assert!(!plan.decrement_stock);
    }

    #[test]
    fn test_dispatched_order_units_keep_moving() {
        let catalogs = Catalogs::defaults();
        let in_transit = unit(ShipmentState::InTransit, "PESCO");
        let plan = plan_unit_transition(
            &in_transit,
            OrderState::Dispatched,
            "finalized",
            &actor(Role::Admin),
            &catalogs,
            Utc::now(),
        )
        .unwrap();
        assert!(plan.decrement_stock);
    }

    #[test]
    fn test_unknown_shipment_state_is_rejected() {
        let catalogs = Catalogs::defaults();
        let packed = unit(ShipmentState::Packed, "PESCO");
        let result = plan_unit_transition(&packed, OPEN, "lost", &actor(Role::Admin), &catalogs, Utc::now());
        assert!(matches!(result, Err(DomainError::Validation { .. })));
    }

    #[test]
    fn test_tracking_required_before_transit() {
        let catalogs = Catalogs::defaults();
        let mut packed = unit(ShipmentState::Packed, "STARKEN");
        let result = plan_unit_transition(&packed, OPEN, "in_transit", &actor(Role::Dispatch), &catalogs, Utc::now());
        assert!(matches!(result, Err(DomainError::Validation { .. })));

        packed.tracking_reference = Some("OT-4471".to_string());
        let plan = plan_unit_transition(&packed, OPEN, "in_transit", &actor(Role::Dispatch), &catalogs, Utc::now())
            .unwrap();
        assert!(plan.timestamps.dispatched_at.is_some());
        assert!(!plan.decrement_stock);
    }

    #[test]
    fn test_finalize_stamps_missing_timestamps_only() {
        let catalogs = Catalogs::defaults();
        let earlier = Utc::now() - Duration::days(1);
        let mut delivered = unit(ShipmentState::Delivered, "PESCO");
        delivered.delivered_at = Some(earlier);
        let now = Utc::now();
        let plan = plan_unit_transition(&delivered, OPEN, "finalized", &actor(Role::Admin), &catalogs, now).unwrap();
        assert_eq!(plan.timestamps.delivered_at, Some(earlier));
        assert_eq!(plan.timestamps.dispatched_at, Some(now));
    }

    #[test]
    fn test_dispatch_decrements_skip_marked_lines() {
        let mut first = line(1, LineState::Prepared, "001");
        first.quantity = 3;
        let mut second = line(2, LineState::Prepared, "001");
        second.quantity = 1;
        let mut done = line(3, LineState::Prepared, "001");
        done.dispatch_decremented_at = Some(Utc::now());

        let plan = plan_dispatch_decrements(&[first, second, done]);
        assert_eq!(
            plan,
            vec![DispatchDecrement {
                item_code: "X".to_string(),
                quantity: 4,
                line_ids: vec![1, 2],
            }]
        );
    }

    #[test]
    fn test_state_correction_rules() {
        let catalogs = Catalogs::defaults();
        let admin = actor(Role::Admin);
        assert_eq!(
            check_state_correction(OrderState::Preparing, "ready_for_dispatch", &admin, &catalogs),
            Ok(OrderState::ReadyForDispatch)
        );
        assert!(matches!(
            check_state_correction(OrderState::InTransit, "ready_for_dispatch", &admin, &catalogs),
            Err(DomainError::State(_))
        ));
        assert!(matches!(
            check_state_correction(OrderState::Pending, "cancelled", &admin, &catalogs),
            Err(DomainError::State(_))
        ));
        assert!(matches!(
            check_state_correction(OrderState::Pending, "preparing", &actor(Role::Warehouse), &catalogs),
            Err(DomainError::Permission(_))
        ));
    }

    #[test]
    fn test_cancellation_rules() {
        assert!(check_cancellation(OrderState::InTransit, &actor(Role::Admin)).is_ok());
        assert!(matches!(
            check_cancellation(OrderState::Dispatched, &actor(Role::Admin)),
            Err(DomainError::State(_))
        ));
        assert!(matches!(
            check_cancellation(OrderState::Pending, &actor(Role::Dispatch)),
            Err(DomainError::Permission(_))
        ));
    }

    #[test]
    fn test_next_sequence_is_gap_tolerant() {
        let prefix = code_prefix(TRANSFER_PREFIX, 2026);
        let existing = ["TRANSFER-2026-001", "TRANSFER-2026-004", "TRANSFER-2025-099", "TRANSFER-2026-abc"];
        assert_eq!(next_sequence(&prefix, existing), 5);
        assert_eq!(next_sequence(&prefix, Vec::<&str>::new()), 1);
    }

    #[test]
    fn test_code_formats() {
        assert_eq!(transfer_reference(2026, 3), "TRANSFER-2026-003");
        assert_eq!(unit_code(2026, 7), "UNIT-2026-0007");
        assert_eq!(unit_code(2026, 12345), "UNIT-2026-12345");
    }

    fn any_shipment_state() -> impl Strategy<Value = Option<ShipmentState>> {
        prop::option::of(prop::sample::select(ShipmentState::ALL.to_vec()))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The projection never moves an order backward
        #[test]
        fn prop_projection_is_monotonic(
            current in prop::sample::select(OrderState::ALL.to_vec()),
            total in 0usize..6,
            prepared in 0usize..6,
            preparing in 0usize..6,
            packed in 0usize..6,
            furthest in any_shipment_state(),
        ) {
            let progress = OrderProgress {
                total_lines: total,
                prepared_lines: prepared.min(total),
                preparing_lines: preparing.min(total - prepared.min(total)),
                packed_lines: packed.min(total),
                furthest_unit: furthest,
            };
            let projected = project_order_state(current, &progress);
            prop_assert!(projected.rank() >= current.rank());
            if current == OrderState::Cancelled {
                prop_assert_eq!(projected, OrderState::Cancelled);
            }
            prop_assert_eq!(project_order_state(projected, &progress), projected);
        }

        /// The next code is always strictly greater than every existing one
        #[test]
        fn prop_next_sequence_exceeds_existing(seqs in prop::collection::vec(1u32..5000, 0..20)) {
            let codes: Vec<String> = seqs.iter().map(|s| transfer_reference(2026, *s)).collect();
            let next = next_sequence(&code_prefix(TRANSFER_PREFIX, 2026), codes.iter().map(String::as_str));
            prop_assert!(seqs.iter().all(|s| next > *s));
            prop_assert!(!codes.contains(&transfer_reference(2026, next)));
        }
    }
}
