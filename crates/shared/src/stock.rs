//! Pharmacy stock — per-medication cells with a two-phase
//! reserve/commit protocol.
//!
//! Invariant per cell: `0 <= reserved <= current_stock <= max_capacity`,
//! and `reserved == 0` whenever no pharmacy worker is in flight for it.

use parking_lot::Mutex;

use common::config::SystemConfig;
use common::types::MedId;

#[derive(Debug, Clone, Copy)]
struct StockLevels {
    current: u32,
    reserved: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct StockSnapshot {
    pub current: u32,
    pub reserved: u32,
}

#[derive(Debug)]
pub struct MedicationCell {
    name: String,
    threshold: u32,
    max_capacity: u32,
    levels: Mutex<StockLevels>,
}

/// What a commit did to one cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOutcome {
    pub depleted: bool,
    /// Units credited by auto-restock, if it fired.
    pub restocked: Option<u32>,
}

impl MedicationCell {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn snapshot(&self) -> StockSnapshot {
        let levels = self.levels.lock();
        StockSnapshot {
            current: levels.current,
            reserved: levels.reserved,
        }
    }

    /// Reserve `qty` units if `current - reserved` covers them.
    fn try_reserve(&self, qty: u32) -> bool {
        let mut levels = self.levels.lock();
        if levels.current - levels.reserved >= qty {
            levels.reserved += qty;
            true
        } else {
            false
        }
    }

    fn unreserve(&self, qty: u32) {
        let mut levels = self.levels.lock();
        debug_assert!(levels.reserved >= qty);
        levels.reserved -= qty;
    }

    /// Consume a prior reservation of `qty` units, applying auto-restock
    /// when enabled and the remaining stock dropped below the threshold.
    fn commit(&self, qty: u32, auto_restock: Option<u32>) -> CommitOutcome {
        let mut levels = self.levels.lock();
        debug_assert!(levels.reserved >= qty && levels.current >= qty);
        levels.current -= qty;
        levels.reserved -= qty;

        let mut outcome = CommitOutcome {
            depleted: levels.current == 0,
            restocked: None,
        };
        if let Some(multiplier) = auto_restock {
            if levels.current < self.threshold {
                let credit = (self.threshold * multiplier).min(self.max_capacity - levels.current);
                if credit > 0 {
                    levels.current += credit;
                    outcome.restocked = Some(credit);
                }
            }
        }
        outcome
    }

    /// Manual restock; the credit is clamped to capacity. Returns the
    /// units actually added.
    pub fn restock(&self, qty: u32) -> u32 {
        let mut levels = self.levels.lock();
        let credit = qty.min(self.max_capacity - levels.current);
        levels.current += credit;
        credit
    }
}

#[derive(Debug)]
pub struct PharmacyStock {
    cells: Vec<MedicationCell>,
}

impl PharmacyStock {
    pub fn new(config: &SystemConfig) -> Self {
        let cells = config
            .medications
            .iter()
            .map(|m| {
                // Capacity bound: room for one full restock credit on top
                // of the initial stock.
                let max_capacity = m
                    .initial_stock
                    .saturating_add(m.threshold.saturating_mul(config.restock_qty_multiplier))
                    .max(1);
                MedicationCell {
                    name: m.name.clone(),
                    threshold: m.threshold,
                    max_capacity,
                    levels: Mutex::new(StockLevels {
                        current: m.initial_stock,
                        reserved: 0,
                    }),
                }
            })
            .collect();
        PharmacyStock { cells }
    }

    pub fn cell(&self, med: MedId) -> Option<&MedicationCell> {
        self.cells.get(med)
    }

    pub fn cells(&self) -> &[MedicationCell] {
        &self.cells
    }

    /// Reserve every item or nothing: on the first shortage all prior
    /// reservations are rolled back and the offending medication returned.
    pub fn reserve(&self, items: &[(MedId, u32)]) -> Result<(), MedId> {
        for (i, &(med, qty)) in items.iter().enumerate() {
            let ok = self.cells.get(med).is_some_and(|c| c.try_reserve(qty));
            if !ok {
                for &(done_med, done_qty) in &items[..i] {
                    self.cells[done_med].unreserve(done_qty);
                }
                return Err(med);
            }
        }
        Ok(())
    }

    /// Drop the reservations of `items` without dispensing (failure path).
    pub fn release_reservation(&self, items: &[(MedId, u32)]) {
        for &(med, qty) in items {
            self.cells[med].unreserve(qty);
        }
    }

    /// Dispense previously reserved items. Returns per-item outcomes in
    /// input order.
    pub fn commit(&self, items: &[(MedId, u32)], auto_restock: Option<u32>) -> Vec<CommitOutcome> {
        items
            .iter()
            .map(|&(med, qty)| self.cells[med].commit(qty, auto_restock))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::MedConfig;

    fn stock_with(meds: &[(&str, u32, u32)]) -> PharmacyStock {
        let mut config = SystemConfig::default();
        config.restock_qty_multiplier = 3;
        config.medications = meds
            .iter()
            .map(|&(name, initial_stock, threshold)| MedConfig {
                name: name.to_string(),
                initial_stock,
                threshold,
            })
            .collect();
        PharmacyStock::new(&config)
    }

    #[test]
    fn test_reserve_commit_roundtrip() {
        let stock = stock_with(&[("A", 10, 2), ("B", 5, 1)]);
        stock.reserve(&[(0, 3), (1, 2)]).unwrap();
        assert_eq!(stock.cell(0).unwrap().snapshot().reserved, 3);

        let outcomes = stock.commit(&[(0, 3), (1, 2)], None);
        assert!(!outcomes[0].depleted);
        let a = stock.cell(0).unwrap().snapshot();
        assert_eq!((a.current, a.reserved), (7, 0));
        let b = stock.cell(1).unwrap().snapshot();
        assert_eq!((b.current, b.reserved), (3, 0));
    }

    #[test]
    fn test_reserve_shortage_rolls_back() {
        let stock = stock_with(&[("A", 10, 2), ("B", 1, 0)]);
        let err = stock.reserve(&[(0, 5), (1, 2)]).unwrap_err();
        assert_eq!(err, 1);
        // A's reservation was rolled back
        assert_eq!(stock.cell(0).unwrap().snapshot().reserved, 0);
    }

    #[test]
    fn test_reserved_units_not_double_booked() {
        let stock = stock_with(&[("A", 5, 0)]);
        stock.reserve(&[(0, 4)]).unwrap();
        assert!(stock.reserve(&[(0, 2)]).is_err());
        assert!(stock.reserve(&[(0, 1)]).is_ok());
    }

    #[test]
    fn test_depletion_and_auto_restock() {
        let stock = stock_with(&[("A", 2, 2)]);
        stock.reserve(&[(0, 2)]).unwrap();
        let outcomes = stock.commit(&[(0, 2)], Some(3));
        assert!(outcomes[0].depleted);
        assert_eq!(outcomes[0].restocked, Some(6));
        assert_eq!(stock.cell(0).unwrap().snapshot().current, 6);
    }

    #[test]
    fn test_depletion_without_restock() {
        let stock = stock_with(&[("A", 1, 0)]);
        stock.reserve(&[(0, 1)]).unwrap();
        let outcomes = stock.commit(&[(0, 1)], None);
        assert!(outcomes[0].depleted);
        assert_eq!(outcomes[0].restocked, None);
        assert_eq!(stock.cell(0).unwrap().snapshot().current, 0);
    }

    #[test]
    fn test_manual_restock_clamped_to_capacity() {
        let stock = stock_with(&[("A", 10, 2)]); // capacity 16
        let added = stock.cell(0).unwrap().restock(100);
        assert_eq!(added, 6);
        assert_eq!(stock.cell(0).unwrap().snapshot().current, 16);
    }

    #[test]
    fn test_release_reservation() {
        let stock = stock_with(&[("A", 5, 0)]);
        stock.reserve(&[(0, 3)]).unwrap();
        stock.release_reservation(&[(0, 3)]);
        let snap = stock.cell(0).unwrap().snapshot();
        assert_eq!((snap.current, snap.reserved), (5, 0));
    }

    #[test]
    fn test_unknown_med_fails_reserve() {
        let stock = stock_with(&[("A", 5, 0)]);
        assert_eq!(stock.reserve(&[(9, 1)]), Err(9));
    }
}
