use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::LoadConfig;

/// A switchable consumer wired to one relay pin.
///
/// Whether it is on is tracked by the controller, never by the load itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Load {
    pub pin: u32,
    pub power_w: u32,
}

impl Load {
    pub fn new(pin: u32, power_w: u32) -> Self {
        Self { pin, power_w }
    }

    pub fn power(&self) -> f64 {
        f64::from(self.power_w)
    }
}

/// Immutable, ordered set of every controllable load.
#[derive(Debug, Clone, Default)]
pub struct LoadRegistry {
    loads: Vec<Load>,
}

impl LoadRegistry {
    pub fn new(loads: Vec<Load>) -> Self {
        Self { loads }
    }

    /// Build from the `[loads.*]` configuration sections, ordered by key.
    pub fn from_config(loads: &BTreeMap<String, LoadConfig>) -> Self {
        Self::new(
            loads
                .values()
                .map(|l| Load::new(l.pin, l.power))
                .collect(),
        )
    }

    pub fn loads(&self) -> &[Load] {
        &self.loads
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    /// Loads not present in `active`, in registry order.
    pub fn inactive<'a>(&'a self, active: &'a [Load]) -> impl Iterator<Item = &'a Load> + 'a {
        self.loads.iter().filter(move |l| !active.contains(l))
    }

    /// Smallest rated power among inactive loads, 0 when all are active.
    pub fn minimum_inactive_power(&self, active: &[Load]) -> f64 {
        self.inactive(active)
            .map(|l| l.power_w)
            .min()
            .map(f64::from)
            .unwrap_or(0.0)
    }

    /// Largest inactive load whose rated power fits in `available_w`.
    /// Ties go to the first one in registry order.
    pub fn best_fit(&self, available_w: f64, active: &[Load]) -> Option<Load> {
        self.inactive(active)
            .filter(|l| l.power() <= available_w)
            .fold(None, |best: Option<&Load>, l| match best {
                Some(b) if b.power_w >= l.power_w => Some(b),
                _ => Some(l),
            })
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn registry() -> LoadRegistry {
        LoadRegistry::new(vec![Load::new(1, 1000), Load::new(2, 2000)])
    }

    #[test]
    fn test_from_config_orders_by_key() {
        let mut cfg = BTreeMap::new();
        cfg.insert("load_2".to_string(), LoadConfig { pin: 2, power: 2000 });
        cfg.insert("load_1".to_string(), LoadConfig { pin: 1, power: 1000 });
        let reg = LoadRegistry::from_config(&cfg);
        assert_eq!(reg.loads(), &[Load::new(1, 1000), Load::new(2, 2000)]);
    }

    #[test]
    fn test_inactive_preserves_order() {
        let reg = LoadRegistry::new(vec![
            Load::new(3, 500),
            Load::new(1, 1000),
            Load::new(2, 2000),
        ]);
        let active = [Load::new(1, 1000)];
        let inactive: Vec<_> = reg.inactive(&active).map(|l| l.pin).collect();
        assert_eq!(inactive, vec![3, 2]);
    }

    #[test]
    fn test_minimum_inactive_power() {
        let reg = registry();
        assert_eq!(reg.minimum_inactive_power(&[]), 1000.0);
        assert_eq!(reg.minimum_inactive_power(&[Load::new(1, 1000)]), 2000.0);
        assert_eq!(
            reg.minimum_inactive_power(&[Load::new(1, 1000), Load::new(2, 2000)]),
            0.0
        );
    }

    #[rstest]
    #[case(2999.0, &[], Some(2))]
    #[case(1800.0, &[], Some(1))]
    #[case(999.0, &[], None)]
    #[case(2000.0, &[Load::new(2, 2000)], Some(1))]
    #[case(5000.0, &[Load::new(1, 1000), Load::new(2, 2000)], None)]
    #[case(-300.0, &[], None)]
    fn test_best_fit(
        #[case] available: f64,
        #[case] active: &[Load],
        #[case] expected_pin: Option<u32>,
    ) {
        let reg = registry();
        assert_eq!(reg.best_fit(available, active).map(|l| l.pin), expected_pin);
    }

    #[test]
    fn test_best_fit_tie_goes_to_registry_order() {
        let reg = LoadRegistry::new(vec![
            Load::new(4, 1500),
            Load::new(5, 1500),
            Load::new(6, 700),
        ]);
        assert_eq!(reg.best_fit(1600.0, &[]).map(|l| l.pin), Some(4));
        assert_eq!(reg.best_fit(1600.0, &[Load::new(4, 1500)]).map(|l| l.pin), Some(5));
    }
}
