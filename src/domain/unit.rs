const SI_UNITS: [char; 3] = ['g', 'l', 'm'];
const SI_PREFIXES: [char; 5] = ['k', 'd', 'c', 'm', 'µ'];

/// Whether an amount and this unit are separated by a space when displayed.
///
/// SI units attach directly (`250g`, `0.5l`, `2kg`); everything else gets a
/// space (`2 EL`, `1 Prise`).
pub fn unit_needs_space(unit: &str) -> bool {
    let mut chars = unit.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    let base = if SI_PREFIXES.contains(&first) {
        match chars.next() {
            Some(ch) => ch,
            None => return !SI_UNITS.contains(&first),
        }
    } else {
        first
    };

    !(SI_UNITS.contains(&base) && chars.next().is_none())
}
