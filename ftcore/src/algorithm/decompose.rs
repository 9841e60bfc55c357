use rayon::prelude::*;

use crate::algorithm::scoring::{mass_deviation_score, mass_deviation_sigma};
use crate::chemistry::alphabet::ChemicalAlphabet;
use crate::chemistry::constants::MASS_DISCRETIZATION_PRECISION;
use crate::chemistry::formula::MolecularFormula;
use crate::data::peak::{AnnotatedPeak, Peak, ScoredCandidate};
use crate::error::FtError;

/// Minimal ring double bond equivalent accepted by the candidate filter.
pub const MIN_RDBE: f64 = -0.5;

const INFINITY: u64 = u64::MAX;

#[derive(Clone, Debug)]
struct Weight {
    element_index: usize,
    mass: f64,
    integer_mass: u64,
}

/// Decomposes masses over a chemical alphabet: enumerates all molecular
/// formulas whose monoisotopic mass matches a target within tolerance and
/// whose element counts respect the alphabet bounds.
///
/// The construction discretizes element masses with a fixed blowup, reduces
/// them by their greatest common divisor and precomputes an extended residue
/// table indexed by residues modulo the lightest element's integer mass.
/// The table stores, per element prefix, the smallest integer mass
/// decomposable in each residue class, which turns the feasibility check
/// during enumeration into a single lookup.
///
/// The table is built once per alphabet and read-only afterwards, so a
/// decomposer can be shared across threads. If the alphabet bounds change,
/// the instance reports itself stale via `alphabet_still_valid` and must be
/// replaced by a freshly constructed one; stale tables are never patched in
/// place.
#[derive(Clone, Debug)]
pub struct MassDecomposer {
    alphabet: ChemicalAlphabet,
    generation: u64,
    precision: f64,
    weights: Vec<Weight>,
    ert: Vec<Vec<u64>>,
    min_error: f64,
    max_error: f64,
    validate_rdbe: bool,
}

impl MassDecomposer {
    /// Builds the residue table for the given alphabet.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use ftcore::chemistry::alphabet::ChemicalAlphabet;
    /// # use ftcore::algorithm::decompose::MassDecomposer;
    /// let alphabet = ChemicalAlphabet::new(&["C", "H", "N", "O"]).unwrap();
    /// let decomposer = MassDecomposer::new(&alphabet).unwrap();
    /// let formulas = decomposer.decompose(18.0105646863, 0.001).unwrap();
    /// assert!(formulas.iter().any(|f| f.to_string() == "H2O"));
    /// ```
    pub fn new(alphabet: &ChemicalAlphabet) -> Result<Self, FtError> {
        let mut precision = MASS_DISCRETIZATION_PRECISION;

        let mut order: Vec<usize> = (0..alphabet.len()).collect();
        order.sort_by(|&a, &b| {
            alphabet
                .mass_of(a)
                .partial_cmp(&alphabet.mass_of(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut weights: Vec<Weight> = order
            .into_iter()
            .map(|element_index| {
                let mass = alphabet.mass_of(element_index);
                Weight {
                    element_index,
                    mass,
                    integer_mass: (mass / precision) as u64,
                }
            })
            .collect();
        if weights.iter().any(|w| w.integer_mass == 0) {
            return Err(FtError::InvalidInput(
                "element mass too small for discretization".to_string(),
            ));
        }

        // reduce the integer masses by their common divisor
        if weights.len() > 1 {
            let mut d = gcd(weights[0].integer_mass, weights[1].integer_mass);
            for weight in weights.iter().skip(2) {
                d = gcd(d, weight.integer_mass);
                if d == 1 {
                    break;
                }
            }
            if d > 1 {
                precision *= d as f64;
                for weight in weights.iter_mut() {
                    weight.integer_mass /= d;
                }
            }
        }

        let ert = if weights.is_empty() { Vec::new() } else { calc_ert(&weights) };

        // rounding errors of the discretization widen the integer interval
        let mut min_error = 0.0f64;
        let mut max_error = 0.0f64;
        for weight in &weights {
            let error = (precision * weight.integer_mass as f64 - weight.mass) / weight.mass;
            min_error = min_error.min(error);
            max_error = max_error.max(error);
        }

        Ok(MassDecomposer {
            alphabet: alphabet.clone(),
            generation: alphabet.generation(),
            precision,
            weights,
            ert,
            min_error,
            max_error,
            validate_rdbe: true,
        })
    }

    /// Disables or re-enables the ring double bond equivalent filter on
    /// returned candidates.
    pub fn with_rdbe_filter(mut self, validate: bool) -> Self {
        self.validate_rdbe = validate;
        self
    }

    /// True while the alphabet this decomposer was built from is unchanged.
    /// A stale decomposer must be replaced by a fresh instance, never
    /// mutated in place.
    pub fn alphabet_still_valid(&self, alphabet: &ChemicalAlphabet) -> bool {
        self.generation == alphabet.generation() && self.alphabet == *alphabet
    }

    pub fn alphabet(&self) -> &ChemicalAlphabet {
        &self.alphabet
    }

    /// Constant time feasibility check: true if some integer mass in the
    /// target window is decomposable, ignoring element bounds. A `true`
    /// result does not guarantee that a valid decomposition exists.
    pub fn maybe_decomposable(&self, target_mass: f64, tolerance: f64) -> bool {
        if self.weights.is_empty() || tolerance < 0.0 || target_mass <= 0.0 {
            return false;
        }
        let (min, max) = self.integer_bound(target_mass - tolerance, target_mass + tolerance);
        let a = self.weights[0].integer_mass;
        let last = self.weights.len() - 1;
        (min..=max).any(|m| {
            let r = (m % a) as usize;
            self.ert[r][last] <= m
        })
    }

    /// Enumerates all formulas with `|mass(f) - target_mass| <= tolerance`
    /// respecting the alphabet bounds.
    ///
    /// Returns an empty set when nothing matches; only malformed input is an
    /// error.
    pub fn decompose(
        &self,
        target_mass: f64,
        tolerance: f64,
    ) -> Result<Vec<MolecularFormula>, FtError> {
        if tolerance < 0.0 {
            return Err(FtError::InvalidInput(format!("negative tolerance: {}", tolerance)));
        }
        if self.weights.is_empty() || target_mass <= 0.0 {
            return Ok(Vec::new());
        }

        let k = self.weights.len();
        let mut min_values = vec![0u32; k];
        let mut bounds = vec![0u32; k];
        let mut min_all_zero = true;
        let mut calc_target = target_mass;
        for (i, weight) in self.weights.iter().enumerate() {
            let element_bounds = self.alphabet.bounds_of(self.alphabet.element(weight.element_index));
            bounds[i] = (element_bounds.max - element_bounds.min) as u32;
            min_values[i] = element_bounds.min as u32;
            if min_values[i] > 0 {
                min_all_zero = false;
                calc_target -= weight.mass * min_values[i] as f64;
            }
        }

        let mut results = Vec::new();
        if !min_all_zero && calc_target.abs() <= tolerance {
            self.collect_candidate(&min_values, target_mass, tolerance, &mut results)?;
        }

        let (min_int, max_int) = self.integer_bound(calc_target - tolerance, calc_target + tolerance);
        let mut m = min_int;
        while m <= max_int {
            for raw in self.integer_decompose(m, &bounds) {
                let counts: Vec<u32> =
                    raw.iter().zip(min_values.iter()).map(|(c, min)| c + min).collect();
                self.collect_candidate(&counts, target_mass, tolerance, &mut results)?;
            }
            m += 1;
        }
        Ok(results)
    }

    /// Decomposes a batch of peaks in parallel and scores every candidate by
    /// its mass deviation likelihood against the originating peak.
    pub fn annotate_peaks(
        &self,
        peaks: &[Peak],
        tolerance: f64,
    ) -> Result<Vec<AnnotatedPeak>, FtError> {
        let sigma = mass_deviation_sigma(tolerance);
        peaks
            .par_iter()
            .map(|&peak| {
                let formulas = self.decompose(peak.mass, tolerance)?;
                let candidates = formulas
                    .into_iter()
                    .map(|formula| {
                        let score =
                            mass_deviation_score(peak.mass, formula.monoisotopic_mass(), sigma);
                        ScoredCandidate::new(formula, score)
                    })
                    .collect();
                Ok(AnnotatedPeak::new(peak, candidates))
            })
            .collect()
    }

    fn collect_candidate(
        &self,
        counts_in_weight_order: &[u32],
        target_mass: f64,
        tolerance: f64,
        results: &mut Vec<MolecularFormula>,
    ) -> Result<(), FtError> {
        let mut counts = vec![0u16; self.alphabet.len()];
        for (weight, &count) in self.weights.iter().zip(counts_in_weight_order.iter()) {
            counts[weight.element_index] = count as u16;
        }
        let formula = self.alphabet.formula_from_counts(&counts)?;
        if formula.is_empty() {
            return Ok(());
        }
        // the integer walk can overshoot by rounding, verify the real mass
        if (formula.monoisotopic_mass() - target_mass).abs() > tolerance {
            return Ok(());
        }
        if self.validate_rdbe && formula.rdbe() < MIN_RDBE {
            return Ok(());
        }
        results.push(formula);
        Ok(())
    }

    fn integer_bound(&self, from: f64, to: f64) -> (u64, u64) {
        let from = from.max(0.0);
        let to = to.max(0.0);
        let min = (((1.0 + self.min_error) * from) / self.precision).ceil().max(0.0) as u64;
        let max = (((1.0 + self.max_error) * to) / self.precision).floor().max(0.0) as u64;
        (min, max)
    }

    fn decomposable(&self, i: usize, m: i64, a: u64) -> bool {
        m >= 0 && self.ert[(m as u64 % a) as usize][i] <= m as u64
    }

    /// Walks the search tree over all elements heavier than the lightest
    /// one, using the residue table to skip infeasible branches outright.
    fn integer_decompose(&self, mass: u64, bounds: &[u32]) -> Vec<Vec<u32>> {
        let k = self.weights.len() - 1;
        let a = self.weights[0].integer_mass;
        let mut result = Vec::new();
        let mut c = vec![0u32; k + 1];
        let mut m = mass as i64;
        let mut i = k;

        while i <= k {
            if !self.decomposable(i, m, a) {
                // jump back in the search tree until a feasible branch exists
                while i <= k && !self.decomposable(i, m, a) {
                    m += c[i] as i64 * self.weights[i].integer_mass as i64;
                    c[i] = 0;
                    i += 1;
                }
                while i <= k && c[i] >= bounds[i] {
                    m += c[i] as i64 * self.weights[i].integer_mass as i64;
                    c[i] = 0;
                    i += 1;
                }
                if i <= k {
                    m -= self.weights[i].integer_mass as i64;
                    c[i] += 1;
                }
            } else {
                // descend as deep as possible
                while i > 0 && self.decomposable(i - 1, m, a) {
                    i -= 1;
                }
                if i == 0 {
                    c[0] = (m / a as i64) as u32;
                    if c[0] <= bounds[0] {
                        result.push(c.clone());
                    }
                    i += 1;
                }
                while i <= k && c[i] >= bounds[i] {
                    m += c[i] as i64 * self.weights[i].integer_mass as i64;
                    c[i] = 0;
                    i += 1;
                }
                if i <= k {
                    m -= self.weights[i].integer_mass as i64;
                    c[i] += 1;
                }
            }
        }
        result
    }
}

/// Extended residue table: `ert[r][i]` is the smallest integer mass with
/// residue `r` modulo the lightest element that is decomposable over the
/// first `i + 1` elements, or infinity if that residue class is unreachable.
fn calc_ert(weights: &[Weight]) -> Vec<Vec<u64>> {
    let a = weights[0].integer_mass;
    let k = weights.len();
    let mut ert = vec![vec![INFINITY; k]; a as usize];

    ert[0][0] = 0;

    for j in 1..k {
        ert[0][j] = 0;
        let d = gcd(a, weights[j].integer_mass);
        // one round robin loop per residue class modulo gcd
        for p in 0..d {
            let mut n;
            if p == 0 {
                n = 0;
            } else {
                n = INFINITY;
                let mut argmin = p;
                let mut r = p;
                while r < a {
                    if ert[r as usize][j - 1] < n {
                        n = ert[r as usize][j - 1];
                        argmin = r;
                    }
                    r += d;
                }
                ert[argmin as usize][j] = n;
            }
            if n == INFINITY {
                let mut r = p;
                while r < a {
                    ert[r as usize][j] = INFINITY;
                    r += d;
                }
            } else {
                for _ in 1..(a / d) {
                    n += weights[j].integer_mass;
                    let r = (n % a) as usize;
                    if ert[r][j - 1] < n {
                        n = ert[r][j - 1];
                    }
                    ert[r][j] = n;
                }
            }
        }
    }
    ert
}

fn gcd(u: u64, v: u64) -> u64 {
    let (mut u, mut v) = (u, v);
    while v != 0 {
        let r = u % v;
        u = v;
        v = r;
    }
    u
}
