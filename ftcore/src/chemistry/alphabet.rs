use std::collections::HashMap;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::chemistry::elements::monoisotopic_masses;
use crate::chemistry::formula::MolecularFormula;
use crate::error::FtError;

/// Per element count interval used to prune the decomposition search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ElementBounds {
    pub min: u16,
    pub max: u16,
}

impl Default for ElementBounds {
    fn default() -> Self {
        ElementBounds { min: 0, max: u16::MAX }
    }
}

/// An ordered set of elements a mass is decomposed over, with optional per
/// element bounds.
///
/// The alphabet is built once per analysis and shared; every mutation of the
/// bounds bumps an internal generation counter so that decomposers holding
/// precomputed residue tables can detect staleness and rebuild instead of
/// silently serving results for outdated bounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct ChemicalAlphabet {
    elements: Vec<String>,
    masses: Vec<f64>,
    bounds: HashMap<String, ElementBounds>,
    generation: u64,
}

impl ChemicalAlphabet {
    /// Builds an alphabet over the given element symbols, unbounded.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use ftcore::chemistry::alphabet::ChemicalAlphabet;
    /// let alphabet = ChemicalAlphabet::new(&["C", "H", "N", "O"]).unwrap();
    /// assert_eq!(alphabet.len(), 4);
    /// ```
    pub fn new(symbols: &[&str]) -> Result<Self, FtError> {
        let known = monoisotopic_masses();
        let mut elements = Vec::with_capacity(symbols.len());
        let mut masses = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match known.get(symbol) {
                Some(&mass) => {
                    if elements.iter().any(|e: &String| e.as_str() == *symbol) {
                        return Err(FtError::InvalidInput(format!(
                            "duplicate element in alphabet: {}",
                            symbol
                        )));
                    }
                    elements.push((*symbol).to_string());
                    masses.push(mass);
                }
                None => {
                    return Err(FtError::InvalidInput(format!("unknown element: {}", symbol)))
                }
            }
        }
        Ok(ChemicalAlphabet { elements, masses, bounds: HashMap::new(), generation: 0 })
    }

    /// Restricts the count interval of one element. Bumps the generation so
    /// that stale residue tables are never served.
    pub fn set_bounds(&mut self, symbol: &str, min: u16, max: u16) -> Result<(), FtError> {
        if min > max {
            return Err(FtError::InvalidInput(format!(
                "inverted bounds for {}: [{}, {}]",
                symbol, min, max
            )));
        }
        if !self.elements.iter().any(|e| e.as_str() == symbol) {
            return Err(FtError::InvalidInput(format!("element not in alphabet: {}", symbol)));
        }
        self.bounds.insert(symbol.to_string(), ElementBounds { min, max });
        self.generation += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn element(&self, index: usize) -> &str {
        &self.elements[index]
    }

    pub fn mass_of(&self, index: usize) -> f64 {
        self.masses[index]
    }

    pub fn bounds_of(&self, symbol: &str) -> ElementBounds {
        self.bounds.get(symbol).copied().unwrap_or_default()
    }

    /// Monotonically increasing counter; changes whenever bounds change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Builds a formula from per element counts given in alphabet order.
    pub fn formula_from_counts(&self, counts: &[u16]) -> Result<MolecularFormula, FtError> {
        if counts.len() != self.elements.len() {
            return Err(FtError::InvalidInput(format!(
                "expected {} counts, got {}",
                self.elements.len(),
                counts.len()
            )));
        }
        let pairs: Vec<(&str, u16)> = self
            .elements
            .iter()
            .zip(counts.iter())
            .map(|(e, c)| (e.as_str(), *c))
            .collect();
        MolecularFormula::new(&pairs)
    }
}
