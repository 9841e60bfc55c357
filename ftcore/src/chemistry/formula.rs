use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Display, Formatter};

use bincode::{Decode, Encode};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chemistry::elements::{element_valences, monoisotopic_masses};
use crate::error::FtError;

/// An immutable molecular formula, mapping element symbols to positive counts.
///
/// The representation is canonical: no element is ever stored with a count of
/// zero, so equality and hashing are structural. The monoisotopic mass is a
/// derived quantity and never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode, Decode)]
pub struct MolecularFormula {
    counts: BTreeMap<String, u16>,
}

impl MolecularFormula {
    /// Constructs a formula from element/count pairs.
    ///
    /// Zero counts are dropped, duplicate symbols are accumulated and unknown
    /// element symbols are rejected.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use ftcore::chemistry::formula::MolecularFormula;
    /// let water = MolecularFormula::new(&[("H", 2), ("O", 1)]).unwrap();
    /// assert_eq!(water.to_string(), "H2O");
    /// ```
    pub fn new(pairs: &[(&str, u16)]) -> Result<Self, FtError> {
        let masses = monoisotopic_masses();
        let mut counts: BTreeMap<String, u16> = BTreeMap::new();
        for (symbol, count) in pairs {
            if !masses.contains_key(symbol) {
                return Err(FtError::InvalidInput(format!("unknown element: {}", symbol)));
            }
            if *count > 0 {
                *counts.entry((*symbol).to_string()).or_insert(0) += count;
            }
        }
        Ok(MolecularFormula { counts })
    }

    /// Parses a formula string such as `C6H12O6`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use ftcore::chemistry::formula::MolecularFormula;
    /// let glucose = MolecularFormula::parse("C6H12O6").unwrap();
    /// assert_eq!(glucose.count_of("C"), 6);
    /// assert!((glucose.monoisotopic_mass() - 180.0633881).abs() < 1e-4);
    /// ```
    pub fn parse(formula: &str) -> Result<Self, FtError> {
        let pattern = Regex::new(r"([A-Z][a-z]?)(\d*)").unwrap();
        let mut pairs: Vec<(String, u16)> = Vec::new();
        let mut consumed = 0;
        for captures in pattern.captures_iter(formula) {
            let whole = captures.get(0).unwrap();
            if whole.start() != consumed {
                return Err(FtError::InvalidInput(format!("malformed formula: {}", formula)));
            }
            consumed = whole.end();
            let symbol = captures.get(1).unwrap().as_str();
            let count = captures.get(2).unwrap().as_str();
            let count = if count.is_empty() {
                1
            } else {
                count.parse::<u16>().map_err(|_| {
                    FtError::InvalidInput(format!("element count out of range in: {}", formula))
                })?
            };
            pairs.push((symbol.to_string(), count));
        }
        if consumed != formula.len() {
            return Err(FtError::InvalidInput(format!("malformed formula: {}", formula)));
        }
        let borrowed: Vec<(&str, u16)> = pairs.iter().map(|(s, c)| (s.as_str(), *c)).collect();
        MolecularFormula::new(&borrowed)
    }

    /// The monoisotopic mass, the sum of per element count times exact
    /// isotope mass.
    pub fn monoisotopic_mass(&self) -> f64 {
        let masses = monoisotopic_masses();
        self.counts.iter().fold(0.0, |acc, (element, count)| {
            acc + masses[element.as_str()] * *count as f64
        })
    }

    pub fn count_of(&self, element: &str) -> u16 {
        self.counts.get(element).copied().unwrap_or(0)
    }

    pub fn num_atoms(&self) -> u32 {
        self.counts.values().map(|&c| c as u32).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// True if the formula contains nothing but hydrogen.
    pub fn is_hydrogen_only(&self) -> bool {
        !self.counts.is_empty() && self.counts.keys().all(|e| e.as_str() == "H")
    }

    /// Iterates element/count pairs in sorted element order.
    pub fn elements(&self) -> impl Iterator<Item = (&str, u16)> {
        self.counts.iter().map(|(e, c)| (e.as_str(), *c))
    }

    /// True if `other` is a sub-formula, element-wise.
    pub fn contains(&self, other: &MolecularFormula) -> bool {
        other
            .counts
            .iter()
            .all(|(element, count)| self.count_of(element) >= *count)
    }

    /// Element-wise subtraction. Returns `None` if any count would become
    /// negative, which is how loss candidates are rejected during graph
    /// construction.
    pub fn checked_sub(&self, other: &MolecularFormula) -> Option<MolecularFormula> {
        let mut counts = BTreeMap::new();
        for (element, count) in &self.counts {
            let remaining = count.checked_sub(other.count_of(element))?;
            if remaining > 0 {
                counts.insert(element.clone(), remaining);
            }
        }
        if !other.counts.keys().all(|e| self.counts.contains_key(e)) {
            return None;
        }
        Some(MolecularFormula { counts })
    }

    /// Element-wise addition.
    pub fn add(&self, other: &MolecularFormula) -> MolecularFormula {
        let mut counts = self.counts.clone();
        for (element, count) in &other.counts {
            *counts.entry(element.clone()).or_insert(0) += count;
        }
        MolecularFormula { counts }
    }

    /// Ring double bond equivalent, `1 + sum(count * (valence - 2)) / 2`.
    ///
    /// Chemically sound neutral molecules have an RDBE of at least -0.5,
    /// which is used to filter decomposition candidates.
    pub fn rdbe(&self) -> f64 {
        let valences = element_valences();
        let weighted: i32 = self
            .counts
            .iter()
            .map(|(element, count)| {
                let valence = valences.get(element.as_str()).copied().unwrap_or(2);
                *count as i32 * (valence - 2)
            })
            .sum();
        1.0 + weighted as f64 / 2.0
    }
}

impl Display for MolecularFormula {
    /// Formats in Hill order: carbon first, then hydrogen, then the
    /// remaining elements alphabetically.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut write_element = |element: &str, count: u16| -> fmt::Result {
            if count == 1 {
                write!(f, "{}", element)
            } else {
                write!(f, "{}{}", element, count)
            }
        };
        for element in ["C", "H"] {
            let count = self.count_of(element);
            if count > 0 {
                write_element(element, count)?;
            }
        }
        for (element, count) in &self.counts {
            if element.as_str() != "C" && element.as_str() != "H" {
                write_element(element, *count)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let caffeine = MolecularFormula::parse("C8H10N4O2").unwrap();
        assert_eq!(caffeine.count_of("N"), 4);
        assert_eq!(caffeine.to_string(), "C8H10N4O2");

        let salt = MolecularFormula::parse("NaCl").unwrap();
        assert_eq!(salt.count_of("Na"), 1);
        assert_eq!(salt.count_of("Cl"), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MolecularFormula::parse("C6H12O6x").is_err());
        assert!(MolecularFormula::parse("Xy2").is_err());
        assert!(MolecularFormula::parse("1H2").is_err());
    }

    #[test]
    fn test_zero_counts_are_canonical() {
        let a = MolecularFormula::new(&[("C", 2), ("O", 0)]).unwrap();
        let b = MolecularFormula::new(&[("C", 2)]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_monoisotopic_mass() {
        let glucose = MolecularFormula::parse("C6H12O6").unwrap();
        assert!((glucose.monoisotopic_mass() - 180.06338810).abs() < 1e-5);
        let water = MolecularFormula::parse("H2O").unwrap();
        assert!((water.monoisotopic_mass() - 18.0105646863).abs() < 1e-5);
    }

    #[test]
    fn test_subtraction_defines_losses() {
        let parent = MolecularFormula::parse("C6H12O6").unwrap();
        let child = MolecularFormula::parse("C6H10O5").unwrap();
        let loss = parent.checked_sub(&child).unwrap();
        assert_eq!(loss, MolecularFormula::parse("H2O").unwrap());

        // negative counts reject the pair
        let other = MolecularFormula::parse("C5H12N").unwrap();
        assert!(parent.checked_sub(&other).is_none());

        // subtraction of itself yields the empty formula
        let empty = parent.checked_sub(&parent).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_contains_is_a_partial_order() {
        let parent = MolecularFormula::parse("C6H12O6").unwrap();
        let child = MolecularFormula::parse("C2H4O2").unwrap();
        assert!(parent.contains(&child));
        assert!(!child.contains(&parent));
        assert!(parent.contains(&parent));
    }

    #[test]
    fn test_rdbe() {
        let benzene = MolecularFormula::parse("C6H6").unwrap();
        assert!((benzene.rdbe() - 4.0).abs() < 1e-9);
        let water = MolecularFormula::parse("H2O").unwrap();
        assert!((water.rdbe() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_hydrogen_only() {
        assert!(MolecularFormula::parse("H2").unwrap().is_hydrogen_only());
        assert!(!MolecularFormula::parse("H2O").unwrap().is_hydrogen_only());
    }
}
