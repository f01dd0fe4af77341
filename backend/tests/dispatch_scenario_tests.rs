//! Dispatch flow scenario tests
//!
//! Drives the shared workflow rules through an in-memory floor (ledger,
//! lines, units, reservations) applying the writes the services perform:
//! - Scenario A: transfer references continue the year's sequence
//! - Scenario B: staged lines are born prepared
//! - Scenario C: lines without stock anywhere are excluded with a warning
//! - Scenario D: packing every line makes the order ready for dispatch
//! - Scenario E: finalization decrements staging exactly once, however many
//!   units the order is split into
//! - Cancelled orders and prepared lines keep staging consistent

use std::collections::HashMap;

use chrono::Utc;
use proptest::prelude::*;
use shared::{
    apply_line_changes, check_cancellation, check_mark_prepared, next_sequence,
    plan_dispatch_decrements, plan_line_intake, plan_reservation_sync, plan_unit_transition,
    project_order_state, transfer_reference, validate_unit_selection, Actor, Catalogs, Dimensions,
    DomainError, IntakeLine, LineItem, LineItemChanges, LineState, NewLineItem, OrderProgress,
    OrderState, Reservation, ReservationState, ReservationSync, Role, ShipmentState, ShipmentUnit,
    StockEntry, UnitCandidate, UnitKind, STAGING_WAREHOUSE,
};
use uuid::Uuid;

// ============================================================================
// In-memory floor
// ============================================================================

struct Floor {
    stock: HashMap<(String, String), StockEntry>,
    order_state: OrderState,
    affects_stock: bool,
    lines: Vec<LineItem>,
    units: Vec<ShipmentUnit>,
    reservations: HashMap<i64, Reservation>,
    catalogs: Catalogs,
}

impl Floor {
    fn new(affects_stock: bool) -> Self {
        Self {
            stock: HashMap::new(),
            order_state: OrderState::Pending,
            affects_stock,
            lines: Vec::new(),
            units: Vec::new(),
            reservations: HashMap::new(),
            catalogs: Catalogs::defaults(),
        }
    }

    fn put_stock(&mut self, item: &str, warehouse: &str, available: i32) {
        let mut entry = StockEntry::new(item, warehouse);
        entry.quantity_available = available;
        self.stock.insert((item.to_string(), warehouse.to_string()), entry);
    }

    fn available(&self, item: &str, warehouse: &str) -> i32 {
        self.stock
            .get(&(item.to_string(), warehouse.to_string()))
            .map_or(0, |e| e.quantity_available)
    }

    fn add_line(&mut self, new_line: NewLineItem) -> i64 {
        let id = self.lines.len() as i64 + 1;
        let line = LineItem {
            id,
            order_id: 5,
            state: new_line.initial_state(),
            item_code: new_line.item_code,
            description: new_line.description,
            quantity: new_line.quantity,
            warehouse_code: new_line.warehouse_code,
            shipment_unit_id: None,
            prepared_by: None,
            prepared_at: None,
            dispatch_decremented_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.lines.push(line);
        self.sync_reservation(id);
        self.refresh();
        id
    }

    fn line(&self, id: i64) -> &LineItem {
        self.lines.iter().find(|l| l.id == id).unwrap()
    }

    fn sync_reservation(&mut self, line_id: i64) {
        let line = self.line(line_id).clone();
        match plan_reservation_sync(&line, self.reservations.get(&line_id)) {
            ReservationSync::Unchanged => {}
            ReservationSync::Release => {
                if let Some(r) = self.reservations.get_mut(&line_id) {
                    r.state = ReservationState::Released;
                }
            }
            ReservationSync::Create(values) | ReservationSync::Update(values) => {
                self.reservations.insert(
                    line_id,
                    Reservation {
                        id: line_id,
                        line_item_id: Some(line_id),
                        order_id: line.order_id,
                        item_code: values.item_code,
                        warehouse_code: values.warehouse_code,
                        quantity: values.quantity,
                        state: values.state,
                        created_at: Utc::now(),
                        updated_at: Utc::now(),
                    },
                );
            }
        }
    }

    fn refresh(&mut self) {
        let progress = OrderProgress::from_parts(&self.lines, &self.units);
        self.order_state = project_order_state(self.order_state, &progress);
    }

    fn prepare(&mut self, line_id: i64, actor: &Actor) -> Result<(), DomainError> {
        let line = self.line(line_id).clone();
        check_mark_prepared(&line, self.order_state, actor)?;

        if self.affects_stock {
            let key = (line.item_code.clone(), line.warehouse_code.clone());
            if let Some(origin) = self.stock.get_mut(&key) {
                origin.withdraw(line.quantity);
            }
            self.stock
                .entry((line.item_code.clone(), STAGING_WAREHOUSE.to_string()))
                .or_insert_with(|| StockEntry::new(line.item_code.clone(), STAGING_WAREHOUSE))
                .deposit(line.quantity);
        }

        let stored = self.lines.iter_mut().find(|l| l.id == line_id).unwrap();
        stored.state = LineState::Prepared;
        stored.prepared_by = Some(actor.user_id);
        stored.prepared_at = Some(Utc::now());
        self.sync_reservation(line_id);
        self.refresh();
        Ok(())
    }

    fn pack(&mut self, line_ids: &[i64]) -> Result<i64, DomainError> {
        let candidates: Vec<UnitCandidate> = self
            .lines
            .iter()
            .filter(|l| line_ids.contains(&l.id))
            .map(|l| UnitCandidate {
                line_id: l.id,
                order_id: l.order_id,
                state: l.state,
                shipment_unit_id: l.shipment_unit_id,
                order_affects_stock: self.affects_stock,
            })
            .collect();
        let order_id = validate_unit_selection(line_ids, &candidates)?;

        let unit_id = self.units.len() as i64 + 1;
        self.units.push(ShipmentUnit {
            id: unit_id,
            code: format!("UNIT-2026-{:04}", unit_id),
            order_id,
            kind: UnitKind::Box,
            carrier: "PESCO".to_string(),
            tracking_reference: None,
            dimensions: Dimensions::default(),
            note: None,
            state: ShipmentState::Packed,
            packed_at: Some(Utc::now()),
            dispatched_at: None,
            delivered_at: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        for line in self.lines.iter_mut().filter(|l| line_ids.contains(&l.id)) {
            line.shipment_unit_id = Some(unit_id);
        }
        self.refresh();
        Ok(unit_id)
    }

    fn advance(&mut self, unit_id: i64, target: &str, actor: &Actor) -> Result<(), DomainError> {
        let unit = self.units.iter().find(|u| u.id == unit_id).unwrap().clone();
        let transition = plan_unit_transition(
            &unit,
            self.order_state,
            target,
            actor,
            &self.catalogs,
            Utc::now(),
        )?;

        if transition.decrement_stock && self.affects_stock {
            let unit_lines: Vec<LineItem> = self
                .lines
                .iter()
                .filter(|l| l.shipment_unit_id == Some(unit_id))
                .cloned()
                .collect();
            for decrement in plan_dispatch_decrements(&unit_lines) {
                if let Some(staging) = self
                    .stock
                    .get_mut(&(decrement.item_code.clone(), STAGING_WAREHOUSE.to_string()))
                {
                    staging.withdraw(decrement.quantity);
                }
                for line in self
                    .lines
                    .iter_mut()
                    .filter(|l| decrement.line_ids.contains(&l.id))
                {
                    line.dispatch_decremented_at.get_or_insert(Utc::now());
                }
            }
        }

        let stored = self.units.iter_mut().find(|u| u.id == unit_id).unwrap();
        stored.state = transition.to;
        stored.packed_at = transition.timestamps.packed_at;
        stored.dispatched_at = transition.timestamps.dispatched_at;
        stored.delivered_at = transition.timestamps.delivered_at;
        self.refresh();
        Ok(())
    }

    fn edit(&mut self, line_id: i64, changes: &LineItemChanges) -> Result<(), DomainError> {
        let updated = apply_line_changes(self.line(line_id), changes, self.order_state, &admin())?;
        let stored = self.lines.iter_mut().find(|l| l.id == line_id).unwrap();
        *stored = updated;
        self.sync_reservation(line_id);
        self.refresh();
        Ok(())
    }

    fn cancel(&mut self, actor: &Actor) -> Result<(), DomainError> {
        check_cancellation(self.order_state, actor)?;
        self.order_state = OrderState::Cancelled;
        for reservation in self.reservations.values_mut() {
            if reservation.state == ReservationState::Reserved {
                reservation.state = ReservationState::Released;
            }
        }
        Ok(())
    }
}

fn admin() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Admin, vec![])
}

fn dispatcher() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Dispatch, vec![])
}

fn new_line(item: &str, warehouse: &str, quantity: i32) -> NewLineItem {
    NewLineItem {
        item_code: item.to_string(),
        description: String::new(),
        quantity,
        warehouse_code: warehouse.to_string(),
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[cfg(test)]
mod scenario_tests {
    use super::*;

    /// Scenario A
    #[test]
    fn test_transfer_reference_continues_year_sequence() {
        let prefix = "TRANSFER-2026-";
        let existing = ["TRANSFER-2026-001", "TRANSFER-2026-002", "TRANSFER-2025-009"];
        let sequence = next_sequence(prefix, existing);
        assert_eq!(transfer_reference(2026, sequence), "TRANSFER-2026-003");
    }

    /// Scenario A, with a deleted reference in the middle
    #[test]
    fn test_transfer_reference_does_not_reuse_gaps() {
        let sequence = next_sequence("TRANSFER-2026-", ["TRANSFER-2026-001", "TRANSFER-2026-004"]);
        assert_eq!(transfer_reference(2026, sequence), "TRANSFER-2026-005");
    }

    /// Scenario B
    #[test]
    fn test_staged_line_is_born_prepared() {
        let mut floor = Floor::new(true);
        let id = floor.add_line(new_line("X", STAGING_WAREHOUSE, 2));

        let line = floor.line(id);
        assert_eq!(line.state, LineState::Prepared);
        assert!(line.prepared_by.is_none());
        assert!(line.prepared_at.is_none());
        assert_eq!(floor.reservations[&id].state, ReservationState::Consumed);

        let result = floor.prepare(id, &admin());
        assert!(matches!(result, Err(DomainError::State(_))));
    }

    /// Scenario C
    #[test]
    fn test_line_without_stock_is_excluded_with_warning() {
        let mut stock_a = StockEntry::new("A", "001");
        stock_a.quantity_available = 10;

        let submitted = vec![
            IntakeLine {
                item_code: Some("A".to_string()),
                quantity: Some(3),
                warehouse_code: Some("001".to_string()),
                ..Default::default()
            },
            IntakeLine {
                item_code: Some("B".to_string()),
                quantity: Some(2),
                ..Default::default()
            },
        ];

        let plan = plan_line_intake(&submitted, true, &[stock_a]).unwrap();
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].item_code, "A");
        assert_eq!(plan.excluded.len(), 1);

        let warnings = plan.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("(B)"));
    }

    /// Scenario C, stock-exempt orders keep lines without a warehouse
    #[test]
    fn test_stock_exempt_order_keeps_unassigned_lines() {
        let submitted = vec![IntakeLine {
            item_code: Some("B".to_string()),
            quantity: Some(2),
            ..Default::default()
        }];
        let plan = plan_line_intake(&submitted, false, &[]).unwrap();
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].warehouse_code, "");
    }

    /// Scenario D
    #[test]
    fn test_packing_every_line_makes_order_ready_for_dispatch() {
        let mut floor = Floor::new(true);
        floor.put_stock("X", "001", 10);
        floor.put_stock("Y", "002", 10);
        let first = floor.add_line(new_line("X", "001", 3));
        let second = floor.add_line(new_line("Y", "002", 1));

        floor.prepare(first, &admin()).unwrap();
        assert_eq!(floor.order_state, OrderState::Preparing);
        floor.prepare(second, &admin()).unwrap();
        assert_eq!(floor.order_state, OrderState::ReadyForPacking);

        let unit_id = floor.pack(&[first, second]).unwrap();
        assert_eq!(floor.units[0].code, "UNIT-2026-0001");
        assert_eq!(floor.line(first).shipment_unit_id, Some(unit_id));
        assert_eq!(floor.line(second).shipment_unit_id, Some(unit_id));

        let progress = OrderProgress::from_parts(&floor.lines, &floor.units);
        assert_eq!(progress.unlinked_lines(), 0);
        assert_eq!(floor.order_state, OrderState::ReadyForDispatch);
    }

    /// Scenario D, a line cannot join a second unit
    #[test]
    fn test_packed_line_conflicts_on_second_unit() {
        let mut floor = Floor::new(true);
        let id = floor.add_line(new_line("X", STAGING_WAREHOUSE, 1));
        floor.pack(&[id]).unwrap();

        assert!(matches!(floor.pack(&[id]), Err(DomainError::Conflict(_))));
    }

    /// Scenario E
    #[test]
    fn test_finalize_decrements_staging_once() {
        let mut floor = Floor::new(true);
        floor.put_stock("X", "001", 20);
        let first = floor.add_line(new_line("X", "001", 3));
        let second = floor.add_line(new_line("X", "001", 1));
        floor.prepare(first, &admin()).unwrap();
        floor.prepare(second, &admin()).unwrap();
        assert_eq!(floor.available("X", STAGING_WAREHOUSE), 4);
        assert_eq!(floor.available("X", "001"), 16);

        // Recount: staging holds goods from other orders too
        floor.put_stock("X", STAGING_WAREHOUSE, 10);
        let unit_id = floor.pack(&[first, second]).unwrap();

        floor.advance(unit_id, "finalized", &admin()).unwrap();
        assert_eq!(floor.available("X", STAGING_WAREHOUSE), 6);
        assert_eq!(floor.order_state, OrderState::Dispatched);

        floor.advance(unit_id, "finalized", &admin()).unwrap();
        assert_eq!(floor.available("X", STAGING_WAREHOUSE), 6);
    }

    /// Scenario E, lines split across two units of the same order
    #[test]
    fn test_finalizing_every_unit_decrements_each_line_once() {
        let mut floor = Floor::new(true);
        floor.put_stock("X", STAGING_WAREHOUSE, 10);
        floor.put_stock("Y", STAGING_WAREHOUSE, 5);
        let first = floor.add_line(new_line("X", STAGING_WAREHOUSE, 3));
        let second = floor.add_line(new_line("X", STAGING_WAREHOUSE, 1));
        let third = floor.add_line(new_line("Y", STAGING_WAREHOUSE, 2));

        let unit_a = floor.pack(&[first]).unwrap();
        assert_eq!(floor.order_state, OrderState::ReadyForPacking);
        let unit_b = floor.pack(&[second, third]).unwrap();
        assert_eq!(floor.order_state, OrderState::ReadyForDispatch);

        floor.advance(unit_b, "finalized", &admin()).unwrap();
        assert_eq!(floor.available("X", STAGING_WAREHOUSE), 9);
        assert_eq!(floor.available("Y", STAGING_WAREHOUSE), 3);
        assert_eq!(floor.order_state, OrderState::Dispatched);

        floor.advance(unit_a, "finalized", &admin()).unwrap();
        assert_eq!(floor.available("X", STAGING_WAREHOUSE), 6);

        floor.advance(unit_b, "finalized", &admin()).unwrap();
        floor.advance(unit_a, "finalized", &admin()).unwrap();
        assert_eq!(floor.available("X", STAGING_WAREHOUSE), 6);
        assert_eq!(floor.available("Y", STAGING_WAREHOUSE), 3);
        assert!(floor.lines.iter().all(|l| l.dispatch_decremented_at.is_some()));
    }

    /// Units of a cancelled order cannot leave the warehouse
    #[test]
    fn test_cancelled_order_unit_cannot_finalize() {
        let mut floor = Floor::new(true);
        floor.put_stock("X", STAGING_WAREHOUSE, 10);
        let id = floor.add_line(new_line("X", STAGING_WAREHOUSE, 4));
        let unit_id = floor.pack(&[id]).unwrap();

        floor.cancel(&admin()).unwrap();
        assert_eq!(floor.order_state, OrderState::Cancelled);

        for target in ["in_transit", "finalized"] {
            assert!(matches!(
                floor.advance(unit_id, target, &admin()),
                Err(DomainError::State(_))
            ));
        }
        assert_eq!(floor.available("X", STAGING_WAREHOUSE), 10);
        assert!(floor.line(id).dispatch_decremented_at.is_none());

        floor.advance(unit_id, "cancelled", &admin()).unwrap();
        assert_eq!(floor.units[0].state, ShipmentState::Cancelled);
        assert_eq!(floor.order_state, OrderState::Cancelled);
    }

    /// A prepared line keeps the item its stock was moved under
    #[test]
    fn test_prepared_line_item_cannot_be_swapped() {
        let mut floor = Floor::new(true);
        floor.put_stock("A", "001", 10);
        let id = floor.add_line(new_line("A", "001", 4));
        floor.prepare(id, &admin()).unwrap();
        let unit_id = floor.pack(&[id]).unwrap();

        let swap = LineItemChanges {
            item_code: Some("B".to_string()),
            ..Default::default()
        };
        assert!(matches!(floor.edit(id, &swap), Err(DomainError::State(_))));

        floor.advance(unit_id, "finalized", &admin()).unwrap();
        assert_eq!(floor.available("A", STAGING_WAREHOUSE), 0);
        assert_eq!(floor.available("B", STAGING_WAREHOUSE), 0);
        assert_eq!(floor.reservations[&id].item_code, "A");
    }

    /// Dispatch staff move units but only administrators finalize
    #[test]
    fn test_dispatcher_cannot_finalize() {
        let mut floor = Floor::new(true);
        let id = floor.add_line(new_line("X", STAGING_WAREHOUSE, 1));
        let unit_id = floor.pack(&[id]).unwrap();

        floor.advance(unit_id, "in_transit", &dispatcher()).unwrap();
        assert_eq!(floor.order_state, OrderState::InTransit);
        assert!(matches!(
            floor.advance(unit_id, "finalized", &dispatcher()),
            Err(DomainError::Permission(_))
        ));
    }

    /// Stock-exempt orders pack unprepared lines and never touch the ledger
    #[test]
    fn test_stock_exempt_order_skips_ledger() {
        let mut floor = Floor::new(false);
        floor.put_stock("X", STAGING_WAREHOUSE, 10);
        let id = floor.add_line(new_line("X", "001", 4));

        let unit_id = floor.pack(&[id]).unwrap();
        floor.advance(unit_id, "finalized", &admin()).unwrap();
        assert_eq!(floor.available("X", STAGING_WAREHOUSE), 10);
    }
}

// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Re-finalizing any number of times decrements staging exactly once
        #[test]
        fn prop_finalize_is_idempotent(
            quantities in prop::collection::vec(1i32..20, 1..6),
            staging in 0i32..200,
            repeats in 1usize..4,
        ) {
            let mut floor = Floor::new(true);
            floor.put_stock("X", STAGING_WAREHOUSE, staging);
            let ids: Vec<i64> = quantities
                .iter()
                .map(|q| floor.add_line(new_line("X", STAGING_WAREHOUSE, *q)))
                .collect();
            let unit_id = floor.pack(&ids).unwrap();

            floor.advance(unit_id, "finalized", &admin()).unwrap();
            let after_first = floor.available("X", STAGING_WAREHOUSE);
            let total: i32 = quantities.iter().sum();
            prop_assert_eq!(after_first, (staging - total).max(0));

            for _ in 0..repeats {
                floor.advance(unit_id, "finalized", &admin()).unwrap();
            }
            prop_assert_eq!(floor.available("X", STAGING_WAREHOUSE), after_first);
        }

        /// Staging drops by each unit's lines once, whatever order units are finalized in
        #[test]
        fn prop_split_units_finalize_in_any_order(
            lines in prop::collection::vec((1i32..20, any::<bool>()), 2..8),
            staging in 0i32..200,
            sequence in prop::collection::vec(0usize..2, 0..8),
        ) {
            let mut floor = Floor::new(true);
            floor.put_stock("X", STAGING_WAREHOUSE, staging);
            let mut groups: [Vec<i64>; 2] = [Vec::new(), Vec::new()];
            let mut totals = [0i32; 2];
            for (position, (quantity, to_second)) in lines.iter().enumerate() {
                let id = floor.add_line(new_line("X", STAGING_WAREHOUSE, *quantity));
                // First two lines seed both units so neither is empty
                let group = match position {
                    0 => 0,
                    1 => 1,
                    _ => usize::from(*to_second),
                };
                groups[group].push(id);
                totals[group] += quantity;
            }
            let units = [floor.pack(&groups[0]).unwrap(), floor.pack(&groups[1]).unwrap()];

            let mut finalized = [false; 2];
            for group in sequence.into_iter().chain([1, 0]) {
                floor.advance(units[group], "finalized", &admin()).unwrap();
                finalized[group] = true;

                let owed: i32 = (0..2).filter(|g| finalized[*g]).map(|g| totals[g]).sum();
                prop_assert_eq!(floor.available("X", STAGING_WAREHOUSE), (staging - owed).max(0));
            }
            prop_assert_eq!(floor.order_state, OrderState::Dispatched);
        }

        /// Preparing moves exactly the line quantity out of origin, floored at zero
        #[test]
        fn prop_prepare_transfers_into_staging(origin in 0i32..100, quantity in 1i32..50) {
            let mut floor = Floor::new(true);
            floor.put_stock("X", "001", origin);
            let id = floor.add_line(new_line("X", "001", quantity));

            floor.prepare(id, &admin()).unwrap();
            prop_assert_eq!(floor.available("X", "001"), (origin - quantity).max(0));
            prop_assert_eq!(floor.available("X", STAGING_WAREHOUSE), quantity);
            prop_assert!(floor.prepare(id, &admin()).is_err());
            prop_assert_eq!(floor.available("X", STAGING_WAREHOUSE), quantity);
        }
    }
}
