use std::collections::HashMap;

/// Monoisotopic masses of the elements commonly observed in small molecule
/// fragmentation data.
pub fn monoisotopic_masses() -> HashMap<&'static str, f64> {
    let mut map = HashMap::new();
    map.insert("H", 1.00782503207);
    map.insert("B", 11.0093054);
    map.insert("C", 12.0);
    map.insert("N", 14.0030740048);
    map.insert("O", 15.9949146196);
    map.insert("F", 18.99840322);
    map.insert("Na", 22.9897692809);
    map.insert("Mg", 23.985041699);
    map.insert("Si", 27.9769265325);
    map.insert("P", 30.97376163);
    map.insert("S", 31.97207100);
    map.insert("Cl", 34.96885268);
    map.insert("K", 38.96370668);
    map.insert("Ca", 39.96259098);
    map.insert("Fe", 55.9349375);
    map.insert("Zn", 63.9291422);
    map.insert("Se", 73.9224764);
    map.insert("As", 74.9215965);
    map.insert("Br", 78.9183371);
    map.insert("I", 126.904473);
    map
}

/// Default valences used for the ring double bond equivalent of a formula.
pub fn element_valences() -> HashMap<&'static str, i32> {
    let mut map = HashMap::new();
    map.insert("H", 1);
    map.insert("B", 3);
    map.insert("C", 4);
    map.insert("N", 3);
    map.insert("O", 2);
    map.insert("F", 1);
    map.insert("Na", 1);
    map.insert("Mg", 2);
    map.insert("Si", 4);
    map.insert("P", 3);
    map.insert("S", 2);
    map.insert("Cl", 1);
    map.insert("K", 1);
    map.insert("Ca", 2);
    map.insert("Fe", 2);
    map.insert("Zn", 2);
    map.insert("Se", 2);
    map.insert("As", 3);
    map.insert("Br", 1);
    map.insert("I", 1);
    map
}
